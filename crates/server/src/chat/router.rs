//! Message router
//!
//! Persist first, deliver second: a message is only pushed to the receiver
//! after the log accepted it, so history is always a superset of what was
//! ever delivered. Sends from the same sender are serialized through a
//! per-sender lane; different senders proceed in parallel.

use crate::chat::events::{ErrorKind, MessageError, OutboundEvent, SendMessage};
use crate::chat::presence::PresenceRegistry;
use crate::core::models::Message;
use crate::core::store::{LogError, MessageLog};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Persisted and pushed to the receiver's live connection.
    Delivered(Message),
    /// Persisted; the receiver will find it through history.
    QueuedOffline(Message),
}

impl RouteOutcome {
    pub fn message(&self) -> &Message {
        match self {
            RouteOutcome::Delivered(m) | RouteOutcome::QueuedOffline(m) => m,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("{0}")]
    Validation(String),

    #[error("message {0} was already stored")]
    DuplicateMessageId(String),

    #[error("message could not be stored: {0}")]
    PersistenceFailure(String),
}

impl RouteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouteError::Validation(_) => ErrorKind::ValidationError,
            RouteError::DuplicateMessageId(_) => ErrorKind::DuplicateMessageId,
            RouteError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
        }
    }

    pub fn to_wire(&self, message_id: Option<String>) -> MessageError {
        MessageError::new(self.kind(), self.to_string()).for_message(message_id)
    }
}

/// Per-sender FIFO lanes. A lane exists only while someone holds or waits on it.
#[derive(Default)]
struct SenderLanes {
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SenderLanes {
    async fn run<F, Fut, T>(&self, sender: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lane = self
            .lanes
            .lock()
            .entry(sender.to_string())
            .or_default()
            .clone();

        let out = {
            let _turn = lane.lock().await;
            work().await
        };

        // Waiters clone under the map lock, so the count is exact while it is held.
        let mut lanes = self.lanes.lock();
        drop(lane);
        if lanes
            .get(sender)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(sender);
        }
        out
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.lanes.lock().len()
    }
}

pub struct MessageRouter {
    log: Arc<dyn MessageLog>,
    registry: Arc<PresenceRegistry>,
    lanes: SenderLanes,
    max_content_len: usize,
}

impl MessageRouter {
    pub fn new(
        log: Arc<dyn MessageLog>,
        registry: Arc<PresenceRegistry>,
        max_content_len: usize,
    ) -> Self {
        Self {
            log,
            registry,
            lanes: SenderLanes::default(),
            max_content_len,
        }
    }

    fn validate(&self, send: &SendMessage) -> Result<(), RouteError> {
        if send.sender.trim().is_empty() {
            return Err(RouteError::Validation("sender is required".into()));
        }
        if send.receiver_id.trim().is_empty() {
            return Err(RouteError::Validation("receiverId is required".into()));
        }
        if send.content.trim().is_empty() {
            return Err(RouteError::Validation("content is required".into()));
        }
        if send.content.len() > self.max_content_len {
            return Err(RouteError::Validation(format!(
                "content exceeds {} bytes",
                self.max_content_len
            )));
        }
        if matches!(&send.message_id, Some(id) if id.trim().is_empty()) {
            return Err(RouteError::Validation("messageId must not be blank".into()));
        }
        Ok(())
    }

    /// Validate, persist and deliver one message.
    pub async fn route(&self, send: SendMessage) -> Result<RouteOutcome, RouteError> {
        self.validate(&send)?;

        let sender = send.sender.clone();
        self.lanes
            .run(&sender, || self.persist_and_deliver(send))
            .await
    }

    async fn persist_and_deliver(&self, send: SendMessage) -> Result<RouteOutcome, RouteError> {
        let sender_name = if send.sender_name.trim().is_empty() {
            send.sender.clone()
        } else {
            send.sender_name
        };

        // Stored timestamps have millisecond precision; deliver the same value.
        let now = Utc::now();
        let created_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);

        let message = Message {
            message_id: send
                .message_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            sender: send.sender,
            sender_name,
            receiver_id: send.receiver_id,
            content: send.content,
            room_id: send.room_id.filter(|r| !r.trim().is_empty()),
            attachment: send.attachment,
            created_at,
            read: false,
        };

        match self.log.append(&message).await {
            Ok(()) => {}
            Err(LogError::DuplicateMessageId(id)) => {
                debug!("duplicate message id {} from {}", id, message.sender);
                return Err(RouteError::DuplicateMessageId(id));
            }
            Err(LogError::Backend(reason)) => {
                error!(
                    "failed to persist message {} from {}: {}",
                    message.message_id, message.sender, reason
                );
                return Err(RouteError::PersistenceFailure(reason));
            }
        }

        // The receiver may have left since the send started; absent or gone
        // means the offline path.
        let delivered = match self.registry.lookup(&message.receiver_id) {
            Some(receiver) => receiver
                .handle
                .push(OutboundEvent::ReceiveMessage(message.clone()))
                .is_ok(),
            None => false,
        };

        debug!(
            "message {} {} -> {} {}",
            message.message_id,
            message.sender,
            message.receiver_id,
            if delivered { "delivered" } else { "stored for history" }
        );

        if delivered {
            Ok(RouteOutcome::Delivered(message))
        } else {
            Ok(RouteOutcome::QueuedOffline(message))
        }
    }

    #[cfg(test)]
    fn active_lanes(&self) -> usize {
        self.lanes.active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::presence::{ConnectionEntry, ConnectionHandle, ConnectionId};
    use crate::core::models::{Attachment, ConversationSummary, Page};
    use crate::core::store::{LogResult, MemoryMessageLog};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct BrokenLog;

    #[async_trait]
    impl MessageLog for BrokenLog {
        async fn append(&self, _message: &Message) -> LogResult<()> {
            Err(LogError::Backend("disk full".into()))
        }
        async fn history(&self, _: &str, _: &str, _: Page) -> LogResult<Vec<Message>> {
            Err(LogError::Backend("disk full".into()))
        }
        async fn conversations(&self, _: &str) -> LogResult<Vec<ConversationSummary>> {
            Err(LogError::Backend("disk full".into()))
        }
        async fn mark_read(&self, _: &str, _: &str) -> LogResult<u64> {
            Err(LogError::Backend("disk full".into()))
        }
    }

    fn send(sender: &str, receiver: &str, content: &str, id: Option<&str>) -> SendMessage {
        SendMessage {
            sender: sender.into(),
            sender_name: String::new(),
            receiver_id: receiver.into(),
            content: content.into(),
            message_id: id.map(str::to_string),
            ..SendMessage::default()
        }
    }

    fn online(registry: &PresenceRegistry, user: &str) -> mpsc::Receiver<OutboundEvent> {
        let (tx, rx) = mpsc::channel(16);
        registry.register(ConnectionEntry::new(
            user,
            ConnectionHandle::new(ConnectionId::new(), tx),
            user,
            "",
        ));
        rx
    }

    #[tokio::test]
    async fn test_delivers_to_online_receiver() {
        let log = Arc::new(MemoryMessageLog::new());
        let registry = Arc::new(PresenceRegistry::new());
        let mut bob = online(&registry, "bob");
        let router = MessageRouter::new(log.clone(), registry, 1024);

        let outcome = router.route(send("alice", "bob", "hi", Some("m1"))).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Delivered(_)));
        assert_eq!(outcome.message().sender_name, "alice");

        match bob.try_recv().unwrap() {
            OutboundEvent::ReceiveMessage(m) => {
                assert_eq!(m.message_id, "m1");
                assert_eq!(m.content, "hi");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(log.len(), 1);
        assert_eq!(router.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_offline_receiver_still_persists() {
        let log = Arc::new(MemoryMessageLog::new());
        let router = MessageRouter::new(log.clone(), Arc::new(PresenceRegistry::new()), 1024);

        let outcome = router.route(send("alice", "carol", "later", None)).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::QueuedOffline(_)));
        assert!(!outcome.message().message_id.is_empty());

        let history = log.history("alice", "carol", Page::new(10, 0)).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_receiver_falls_back_to_offline() {
        let log = Arc::new(MemoryMessageLog::new());
        let registry = Arc::new(PresenceRegistry::new());
        drop(online(&registry, "bob"));
        let router = MessageRouter::new(log, registry, 1024);

        let outcome = router.route(send("alice", "bob", "hi", None)).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::QueuedOffline(_)));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_not_delivered_twice() {
        let log = Arc::new(MemoryMessageLog::new());
        let registry = Arc::new(PresenceRegistry::new());
        let mut bob = online(&registry, "bob");
        let router = MessageRouter::new(log.clone(), registry, 1024);

        router.route(send("alice", "bob", "hi", Some("m1"))).await.unwrap();
        let err = router.route(send("alice", "bob", "hi again", Some("m1"))).await.unwrap_err();
        assert_eq!(err, RouteError::DuplicateMessageId("m1".into()));
        assert_eq!(err.kind(), ErrorKind::DuplicateMessageId);

        assert!(bob.try_recv().is_ok());
        assert!(bob.try_recv().is_err());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_persisting() {
        let log = Arc::new(MemoryMessageLog::new());
        let router = MessageRouter::new(log.clone(), Arc::new(PresenceRegistry::new()), 4);

        for bad in [
            send("", "bob", "hi", None),
            send("alice", "", "hi", None),
            send("alice", "bob", "   ", None),
            send("alice", "bob", "too long", None),
            send("alice", "bob", "hi", Some(" ")),
        ] {
            let err = router.route(bad).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError);
        }
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_attachment_does_not_replace_content() {
        let log = Arc::new(MemoryMessageLog::new());
        let router = MessageRouter::new(log.clone(), Arc::new(PresenceRegistry::new()), 1024);

        let mut attachment_only = send("A", "B", "", Some("m1"));
        attachment_only.attachment = Some(Attachment {
            url: "files/cat.png".into(),
            kind: "image".into(),
        });

        let err = router.route(attachment_only).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_created_at_has_millisecond_precision() {
        let router = MessageRouter::new(
            Arc::new(MemoryMessageLog::new()),
            Arc::new(PresenceRegistry::new()),
            1024,
        );

        let outcome = router.route(send("alice", "bob", "hi", None)).await.unwrap();
        assert_eq!(outcome.message().created_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lanes_are_released_under_contention() {
        let log = Arc::new(MemoryMessageLog::new());
        let router = Arc::new(MessageRouter::new(log.clone(), Arc::new(PresenceRegistry::new()), 1024));

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    let sender = format!("user{}", i % 4);
                    router.route(send(&sender, "bob", "hi", None)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(log.len(), 64);
        assert_eq!(router.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_delivery() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut bob = online(&registry, "bob");
        let router = MessageRouter::new(Arc::new(BrokenLog), registry, 1024);

        let err = router.route(send("alice", "bob", "hi", None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_sender_order_is_preserved() {
        let log = Arc::new(MemoryMessageLog::new());
        let registry = Arc::new(PresenceRegistry::new());
        let mut bob = online(&registry, "bob");
        let router = Arc::new(MessageRouter::new(log.clone(), registry, 1024));

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .route(send("alice", "bob", &format!("n{i}"), Some(&format!("m{i}"))))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let history = log.history("alice", "bob", Page::new(50, 0)).await.unwrap();
        let mut delivered = Vec::new();
        while let Ok(OutboundEvent::ReceiveMessage(m)) = bob.try_recv() {
            delivered.push(m.message_id);
        }
        let persisted: Vec<_> = history.into_iter().map(|m| m.message_id).collect();
        assert_eq!(delivered.len(), 10);
        assert_eq!(persisted, delivered);
        assert_eq!(router.active_lanes(), 0);
    }
}
