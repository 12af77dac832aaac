use crate::chat::events::{OutboundEvent, TypingSignal};
use crate::chat::presence::PresenceRegistry;
use std::sync::Arc;
use tracing::debug;

/// Best-effort forwarder of typing indicators. Nothing is stored, queued or
/// acknowledged; an absent receiver drops the signal.
#[derive(Clone)]
pub struct TypingRelay {
    registry: Arc<PresenceRegistry>,
}

impl TypingRelay {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Returns whether the signal was handed to a live connection.
    pub fn notify(&self, sender_id: &str, receiver_id: &str, is_typing: bool) -> bool {
        let Some(receiver) = self.registry.lookup(receiver_id) else {
            debug!("typing {} -> {} dropped, receiver offline", sender_id, receiver_id);
            return false;
        };

        receiver
            .handle
            .push(OutboundEvent::UserTyping(TypingSignal {
                user_id: sender_id.to_string(),
                is_typing,
            }))
            .is_ok()
    }
}
