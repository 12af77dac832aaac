use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence status of a signed-in user.
///
/// `Offline` only ever appears on the wire; the registry represents an
/// offline user by having no entry for them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Busy,
    Offline,
}

/// Public view of a registry entry, as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
}

/// Reference to media stored by the file-store service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub kind: String,
}

/// A persisted direct message. Only `read` ever changes after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub sender: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// The participant of this message that is not `user_id`.
    pub fn counterpart_of(&self, user_id: &str) -> &str {
        if self.sender == user_id {
            &self.receiver_id
        } else {
            &self.sender
        }
    }

    /// True when the message was exchanged between `a` and `b` in either direction.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender == a && self.receiver_id == b) || (self.sender == b && self.receiver_id == a)
    }
}

/// Latest message with one counterpart plus the unread count addressed to the querying user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub other_user_id: String,
    pub last_message: Message,
    pub unread_count: u64,
}

/// Page request for the history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}
