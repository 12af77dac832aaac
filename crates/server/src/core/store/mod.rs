//! Persistent message log
//!
//! Append-only record of directed messages. The only mutation after
//! append is flipping `read` from false to true.

pub mod memory_log;
pub mod sqlite_log;

use crate::core::models::{ConversationSummary, Message, Page};
use async_trait::async_trait;

pub use memory_log::MemoryMessageLog;
pub use sqlite_log::SqliteMessageLog;

/// Errors surfaced by a message log backend.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("message id already exists: {0}")]
    DuplicateMessageId(String),

    #[error("message log backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for LogError {
    fn from(err: sqlx::Error) -> Self {
        LogError::Backend(err.to_string())
    }
}

pub type LogResult<T> = std::result::Result<T, LogError>;

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Persist a new message. A colliding `message_id` is rejected and the
    /// stored record is left untouched.
    async fn append(&self, message: &Message) -> LogResult<()>;

    /// Messages exchanged between `user_a` and `user_b` in either direction.
    ///
    /// Pages are cut newest-first, but each page is returned oldest-first.
    async fn history(&self, user_a: &str, user_b: &str, page: Page) -> LogResult<Vec<Message>>;

    /// One summary per counterpart of `user_id`, most recent conversation first.
    async fn conversations(&self, user_id: &str) -> LogResult<Vec<ConversationSummary>>;

    /// Mark every unread message from `sender_id` to `receiver_id` as read.
    /// Returns how many messages changed.
    async fn mark_read(&self, receiver_id: &str, sender_id: &str) -> LogResult<u64>;
}
