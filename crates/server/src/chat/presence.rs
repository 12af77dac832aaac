//! Presence registry
//!
//! Authoritative in-memory record of which users currently have a live
//! connection. At most one entry exists per user id; a new registration
//! replaces the previous one in a single step. The registry never performs
//! I/O and never emits notifications itself.

use crate::chat::events::OutboundEvent;
use crate::core::models::{PresenceStatus, PresenceView};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use uuid::Uuid;

/// Identity of one transport connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a push to a connection did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The connection's outbound queue is at capacity.
    Full,
    /// The connection has gone away.
    Closed,
}

/// Sending side of one connection's outbound queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::Sender<OutboundEvent>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbox: mpsc::Sender<OutboundEvent>) -> Self {
        Self { id, outbox }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event without waiting.
    pub fn push(&self, event: OutboundEvent) -> Result<(), DeliveryFailure> {
        match self.outbox.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "outbound queue full, dropping event");
                Err(DeliveryFailure::Full)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryFailure::Closed),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish()
    }
}

/// One live, signed-in user.
#[derive(Clone, Debug)]
pub struct ConnectionEntry {
    pub user_id: String,
    pub handle: ConnectionHandle,
    pub display_name: String,
    pub contact_email: String,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
}

impl ConnectionEntry {
    pub fn new(
        user_id: impl Into<String>,
        handle: ConnectionHandle,
        display_name: impl Into<String>,
        contact_email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            handle,
            display_name: display_name.into(),
            contact_email: contact_email.into(),
            status: PresenceStatus::Online,
            last_seen_at: Utc::now(),
        }
    }

    pub fn view(&self) -> PresenceView {
        PresenceView {
            user_id: self.user_id.clone(),
            name: self.display_name.clone(),
            email: self.contact_email.clone(),
            status: self.status,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    entries: Mutex<HashMap<String, ConnectionEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `entry.user_id`, returning the entry it replaced.
    pub fn register(&self, entry: ConnectionEntry) -> Option<ConnectionEntry> {
        self.entries.lock().insert(entry.user_id.clone(), entry)
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionEntry> {
        self.entries.lock().get(user_id).cloned()
    }

    /// Remove the entry for `user_id` only while it still belongs to `expected`.
    ///
    /// Returns false when a newer registration owns the entry, or when there is none.
    pub fn remove(&self, user_id: &str, expected: ConnectionId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(user_id) {
            Some(entry) if entry.handle.id() == expected => {
                entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Change the status of `user_id` if `expected` still owns the entry.
    pub fn update_status(
        &self,
        user_id: &str,
        expected: ConnectionId,
        status: PresenceStatus,
    ) -> Option<ConnectionEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(user_id)?;
        if entry.handle.id() != expected {
            return None;
        }
        entry.status = status;
        Some(entry.clone())
    }

    /// Point-in-time copy of every entry, sorted by user id.
    pub fn snapshot(&self) -> Vec<ConnectionEntry> {
        let mut entries: Vec<ConnectionEntry> = self.entries.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    pub fn views(&self) -> Vec<PresenceView> {
        self.snapshot().iter().map(ConnectionEntry::view).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
