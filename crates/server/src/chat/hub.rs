//! Presence broadcast channel
//!
//! Fan-out of presence changes to every active connection. Kept apart from
//! the registry so the registry stays a plain data structure.

use crate::chat::events::OutboundEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PresenceHub {
    tx: broadcast::Sender<OutboundEvent>,
}

impl PresenceHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: OutboundEvent) -> usize {
        // An error only means nobody is listening right now.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }

    /// Forward every broadcast into a connection's outbound queue until
    /// either side goes away.
    pub fn forward_to(&self, outbox: mpsc::Sender<OutboundEvent>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if outbox.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("presence feed lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("presence feed stopped");
        })
    }
}
