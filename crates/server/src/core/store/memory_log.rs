//! In-process message log, used with `RELAY_STORAGE=memory` and in tests.

use super::{LogError, LogResult, MessageLog};
use crate::core::models::{ConversationSummary, Message, Page};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct LogState {
    /// Insertion order doubles as the tie-breaker for equal timestamps.
    messages: Vec<Message>,
    ids: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryMessageLog {
    state: RwLock<LogState>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(&self, message: &Message) -> LogResult<()> {
        let mut state = self.state.write();
        if !state.ids.insert(message.message_id.clone()) {
            return Err(LogError::DuplicateMessageId(message.message_id.clone()));
        }
        state.messages.push(message.clone());
        Ok(())
    }

    async fn history(&self, user_a: &str, user_b: &str, page: Page) -> LogResult<Vec<Message>> {
        let state = self.state.read();
        let mut thread: Vec<(usize, &Message)> = state
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_between(user_a, user_b))
            .collect();

        // Newest first for paging.
        thread.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });

        let mut page: Vec<Message> = thread
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|(_, m)| m.clone())
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn conversations(&self, user_id: &str) -> LogResult<Vec<ConversationSummary>> {
        let state = self.state.read();
        let mut latest: HashMap<&str, (usize, &Message)> = HashMap::new();
        let mut unread: HashMap<&str, u64> = HashMap::new();

        for (seq, message) in state.messages.iter().enumerate() {
            if message.sender != user_id && message.receiver_id != user_id {
                continue;
            }
            let other = message.counterpart_of(user_id);

            let newer = match latest.get(other) {
                Some((best_seq, best)) => {
                    (message.created_at, seq) > (best.created_at, *best_seq)
                }
                None => true,
            };
            if newer {
                latest.insert(other, (seq, message));
            }

            if message.receiver_id == user_id && message.sender == other && !message.read {
                *unread.entry(other).or_default() += 1;
            }
        }

        let mut summaries: Vec<(usize, ConversationSummary)> = latest
            .into_iter()
            .map(|(other, (seq, message))| {
                (
                    seq,
                    ConversationSummary {
                        other_user_id: other.to_string(),
                        last_message: message.clone(),
                        unread_count: unread.get(other).copied().unwrap_or(0),
                    },
                )
            })
            .collect();

        summaries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.last_message
                .created_at
                .cmp(&a.last_message.created_at)
                .then(seq_b.cmp(seq_a))
        });

        Ok(summaries.into_iter().map(|(_, s)| s).collect())
    }

    async fn mark_read(&self, receiver_id: &str, sender_id: &str) -> LogResult<u64> {
        let mut state = self.state.write();
        let mut updated = 0;
        for message in state
            .messages
            .iter_mut()
            .filter(|m| m.receiver_id == receiver_id && m.sender == sender_id && !m.read)
        {
            message.read = true;
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn message(id: &str, sender: &str, receiver: &str, offset_secs: i64) -> Message {
        Message {
            message_id: id.into(),
            sender: sender.into(),
            sender_name: sender.into(),
            receiver_id: receiver.into(),
            content: format!("content of {id}"),
            room_id: None,
            attachment: None,
            created_at: Utc::now() + Duration::seconds(offset_secs),
            read: false,
        }
    }

    #[tokio::test]
    async fn test_duplicate_append_keeps_original() {
        let log = MemoryMessageLog::new();
        log.append(&message("m1", "a", "b", 0)).await.unwrap();

        let mut dup = message("m1", "a", "b", 1);
        dup.content = "overwritten".into();
        let err = log.append(&dup).await.unwrap_err();
        assert!(matches!(err, LogError::DuplicateMessageId(id) if id == "m1"));

        let history = log.history("a", "b", Page::new(10, 0)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "content of m1");
    }

    #[tokio::test]
    async fn test_history_pages_newest_first_but_returns_oldest_first() {
        let log = MemoryMessageLog::new();
        for i in 0..5 {
            let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
            log.append(&message(&format!("m{i}"), from, to, i)).await.unwrap();
        }
        log.append(&message("other", "a", "c", 10)).await.unwrap();

        let first = log.history("a", "b", Page::new(2, 0)).await.unwrap();
        let ids: Vec<_> = first.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4"]);

        let second = log.history("b", "a", Page::new(2, 2)).await.unwrap();
        let ids: Vec<_> = second.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_mark_read_only_touches_pair() {
        let log = MemoryMessageLog::new();
        log.append(&message("1", "y", "x", 0)).await.unwrap();
        log.append(&message("2", "z", "x", 1)).await.unwrap();
        log.append(&message("3", "x", "y", 2)).await.unwrap();

        assert_eq!(log.mark_read("x", "y").await.unwrap(), 1);
        assert_eq!(log.mark_read("x", "y").await.unwrap(), 0);

        let summaries = log.conversations("x").await.unwrap();
        let z = summaries.iter().find(|s| s.other_user_id == "z").unwrap();
        assert_eq!(z.unread_count, 1);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let log = MemoryMessageLog::new();
        let at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        for (id, sender) in [("y1", "y"), ("z1", "z"), ("y2", "y")] {
            let mut msg = message(id, sender, "x", 0);
            msg.created_at = at;
            log.append(&msg).await.unwrap();
        }

        let history = log.history("x", "y", Page::new(10, 0)).await.unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["y1", "y2"]);

        let newest = log.history("x", "y", Page::new(1, 0)).await.unwrap();
        assert_eq!(newest[0].message_id, "y2");

        let summaries = log.conversations("x").await.unwrap();
        let order: Vec<_> = summaries
            .iter()
            .map(|s| (s.other_user_id.as_str(), s.last_message.message_id.as_str()))
            .collect();
        assert_eq!(order, vec![("y", "y2"), ("z", "z1")]);
        assert_eq!(summaries[0].unread_count, 2);
    }
}
