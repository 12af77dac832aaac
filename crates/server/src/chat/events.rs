//! Wire events exchanged over the relay connection.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! Payload field names are camelCase and part of the client contract.

use crate::core::auth::SigninClaim;
use crate::core::models::{Attachment, Message, PresenceStatus, PresenceView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    Signin(SigninClaim),
    SendMessage(SendMessage),
    Typing(TypingTarget),
    StopTyping(TypingTarget),
    StatusChange(StatusChange),
    GetUsersList,
    RequestChatHistory(HistoryRequest),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Signin(_) => "signin",
            InboundEvent::SendMessage(_) => "send_message",
            InboundEvent::Typing(_) => "typing",
            InboundEvent::StopTyping(_) => "stop_typing",
            InboundEvent::StatusChange(_) => "status_change",
            InboundEvent::GetUsersList => "get_users_list",
            InboundEvent::RequestChatHistory(_) => "request_chat_history",
        }
    }
}

/// `send_message` payload. Required fields default to empty so that a
/// missing field surfaces as a validation error rather than a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Client clock; the server clock decides `createdAt`.
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingTarget {
    pub receiver_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub new_status: PresenceStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub other_user_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    SigninSuccess(SigninSuccess),
    ReceiveMessage(Message),
    MessageSent(MessageAck),
    ReceiverOffline(MessageAck),
    MessageError(MessageError),
    UserTyping(TypingSignal),
    UserStatusChange(PresenceView),
    UserOffline(UserOffline),
    UsersList(UsersList),
    UsersListUpdated(UsersList),
    ChatHistory(ChatHistory),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigninSuccess {
    pub user: PresenceView,
    pub users: Vec<PresenceView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub message_id: String,
    pub receiver_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    DuplicateMessageId,
    PersistenceFailure,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl MessageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message_id: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_message(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOffline {
    pub user_id: String,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersList {
    pub users: Vec<PresenceView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub user_id: String,
    pub other_user_id: String,
    pub messages: Vec<Message>,
}
