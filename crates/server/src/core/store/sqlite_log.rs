//! SQLite message log
//!
//! Messages live in `messages.sqlite` under the configured data directory.
//! `created_at` is stored as epoch milliseconds and `seq` is an
//! autoincrement column, so `(created_at, seq)` gives a stable total order
//! even when two messages share a millisecond.

use super::{LogError, LogResult, MessageLog};
use crate::core::models::{Attachment, ConversationSummary, Message, Page};
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const MESSAGE_COLUMNS: &str = "message_id, sender, sender_name, receiver_id, content, room_id, \
     attachment_url, attachment_kind, created_at, is_read";

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    message_id: String,
    sender: String,
    sender_name: String,
    receiver_id: String,
    content: String,
    room_id: Option<String>,
    attachment_url: Option<String>,
    attachment_kind: Option<String>,
    created_at: i64,
    is_read: bool,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let attachment = match (row.attachment_url, row.attachment_kind) {
            (Some(url), Some(kind)) => Some(Attachment { url, kind }),
            _ => None,
        };
        Message {
            message_id: row.message_id,
            sender: row.sender,
            sender_name: row.sender_name,
            receiver_id: row.receiver_id,
            content: row.content,
            room_id: row.room_id,
            attachment,
            created_at: DateTime::from_timestamp_millis(row.created_at).unwrap_or_default(),
            read: row.is_read,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    #[sqlx(flatten)]
    message: MessageRow,
    other_user_id: String,
    unread_count: i64,
}

pub struct SqliteMessageLog {
    pool: SqlitePool,
}

impl SqliteMessageLog {
    /// Open (creating if missing) `messages.sqlite` inside `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("messages.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let log = Self { pool };
        log.init_db().await?;

        info!("[MessageLog] Opened {:?}", db_path);
        Ok(log)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                sender TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                room_id TEXT,
                attachment_url TEXT,
                attachment_kind TEXT,
                created_at INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages (sender, receiver_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages (receiver_id, sender, is_read)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn append(&self, message: &Message) -> LogResult<()> {
        let (attachment_url, attachment_kind) = match &message.attachment {
            Some(a) => (Some(a.url.as_str()), Some(a.kind.as_str())),
            None => (None, None),
        };

        let result = sqlx::query(
            "INSERT INTO messages (message_id, sender, sender_name, receiver_id, content, room_id, \
             attachment_url, attachment_kind, created_at, is_read) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.message_id)
        .bind(&message.sender)
        .bind(&message.sender_name)
        .bind(&message.receiver_id)
        .bind(&message.content)
        .bind(&message.room_id)
        .bind(attachment_url)
        .bind(attachment_kind)
        .bind(message.created_at.timestamp_millis())
        .bind(message.read)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LogError::DuplicateMessageId(message.message_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn history(&self, user_a: &str, user_b: &str, page: Page) -> LogResult<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE (sender = ? AND receiver_id = ?) OR (sender = ? AND receiver_id = ?) \
             ORDER BY created_at DESC, seq DESC \
             LIMIT ? OFFSET ?"
        );

        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(user_a)
            .bind(user_b)
            .bind(user_b)
            .bind(user_a)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await?;

        let mut messages: Vec<Message> = rows.into_iter().map(Message::from).collect();
        messages.reverse();
        Ok(messages)
    }

    async fn conversations(&self, user_id: &str) -> LogResult<Vec<ConversationSummary>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            WITH threads AS (
                SELECT m.*,
                       CASE WHEN m.sender = ? THEN m.receiver_id ELSE m.sender END AS other_user_id
                FROM messages m
                WHERE m.sender = ? OR m.receiver_id = ?
            ),
            ranked AS (
                SELECT t.*,
                       ROW_NUMBER() OVER (
                           PARTITION BY t.other_user_id
                           ORDER BY t.created_at DESC, t.seq DESC
                       ) AS rn
                FROM threads t
            )
            SELECT r.message_id, r.sender, r.sender_name, r.receiver_id, r.content, r.room_id,
                   r.attachment_url, r.attachment_kind, r.created_at, r.is_read,
                   r.other_user_id,
                   (SELECT COUNT(*) FROM messages u
                     WHERE u.receiver_id = ? AND u.sender = r.other_user_id AND u.is_read = 0
                   ) AS unread_count
            FROM ranked r
            WHERE r.rn = 1
            ORDER BY r.created_at DESC, r.seq DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                other_user_id: row.other_user_id,
                last_message: row.message.into(),
                unread_count: u64::try_from(row.unread_count).unwrap_or(0),
            })
            .collect())
    }

    async fn mark_read(&self, receiver_id: &str, sender_id: &str) -> LogResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE receiver_id = ? AND sender = ? AND is_read = 0",
        )
        .bind(receiver_id)
        .bind(sender_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use tempfile::TempDir;

    fn message(id: &str, sender: &str, receiver: &str, offset_secs: i64) -> Message {
        Message {
            message_id: id.into(),
            sender: sender.into(),
            sender_name: format!("{sender} name"),
            receiver_id: receiver.into(),
            content: format!("content of {id}"),
            room_id: Some("lobby".into()),
            attachment: None,
            created_at: Utc::now() + Duration::seconds(offset_secs),
            read: false,
        }
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_id() {
        let temp_dir = TempDir::new().unwrap();
        let log = SqliteMessageLog::open(temp_dir.path()).await.unwrap();

        log.append(&message("m1", "a", "b", 0)).await.unwrap();
        let mut dup = message("m1", "a", "b", 5);
        dup.content = "changed".into();

        let err = log.append(&dup).await.unwrap_err();
        assert!(matches!(err, LogError::DuplicateMessageId(_)));

        let history = log.history("a", "b", Page::new(10, 0)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "content of m1");
        assert_eq!(history[0].room_id.as_deref(), Some("lobby"));
    }

    #[tokio::test]
    async fn test_history_is_chronological_per_page() {
        let temp_dir = TempDir::new().unwrap();
        let log = SqliteMessageLog::open(temp_dir.path()).await.unwrap();

        for i in 0..4 {
            let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
            log.append(&message(&format!("m{i}"), from, to, i)).await.unwrap();
        }
        log.append(&message("noise", "a", "c", 9)).await.unwrap();

        let newest = log.history("a", "b", Page::new(3, 0)).await.unwrap();
        let ids: Vec<_> = newest.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);

        let oldest = log.history("a", "b", Page::new(3, 3)).await.unwrap();
        assert_eq!(oldest.len(), 1);
        assert_eq!(oldest[0].message_id, "m0");
    }

    #[tokio::test]
    async fn test_attachment_survives_storage() {
        let temp_dir = TempDir::new().unwrap();
        let log = SqliteMessageLog::open(temp_dir.path()).await.unwrap();

        let mut msg = message("pic", "a", "b", 0);
        msg.attachment = Some(Attachment {
            url: "https://files.example/pic.png".into(),
            kind: "image".into(),
        });
        log.append(&msg).await.unwrap();

        let history = log.history("b", "a", Page::new(1, 0)).await.unwrap();
        assert_eq!(history[0].attachment, msg.attachment);
    }

    #[tokio::test]
    async fn test_conversations_and_mark_read() {
        let temp_dir = TempDir::new().unwrap();
        let log = SqliteMessageLog::open(temp_dir.path()).await.unwrap();

        log.append(&message("y1", "y", "x", 0)).await.unwrap();
        log.append(&message("y2", "y", "x", 1)).await.unwrap();
        log.append(&message("z1", "z", "x", 2)).await.unwrap();
        log.append(&message("x1", "x", "y", 3)).await.unwrap();

        let summaries = log.conversations("x").await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].other_user_id, "y");
        assert_eq!(summaries[0].last_message.message_id, "x1");
        assert_eq!(summaries[0].unread_count, 2);
        assert_eq!(summaries[1].other_user_id, "z");
        assert_eq!(summaries[1].unread_count, 1);

        assert_eq!(log.mark_read("x", "y").await.unwrap(), 2);
        assert_eq!(log.mark_read("x", "y").await.unwrap(), 0);

        let summaries = log.conversations("x").await.unwrap();
        let y = summaries.iter().find(|s| s.other_user_id == "y").unwrap();
        let z = summaries.iter().find(|s| s.other_user_id == "z").unwrap();
        assert_eq!(y.unread_count, 0);
        assert_eq!(z.unread_count, 1);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let temp_dir = TempDir::new().unwrap();
        let log = SqliteMessageLog::open(temp_dir.path()).await.unwrap();
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
