//! Relay server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::chat::hub::PresenceHub;
use crate::chat::presence::PresenceRegistry;
use crate::chat::router::MessageRouter;
use crate::chat::typing::TypingRelay;
use crate::core::auth::{Authenticator, TokenTable, TrustedClaims};
use crate::core::models::Page;
use crate::core::store::{MemoryMessageLog, MessageLog, SqliteMessageLog};

/// Which message log backend to run with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend {other:?}")),
        }
    }
}

/// Configuration for the relay server
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// HTTP / WebSocket bind address
    pub bind_addr: SocketAddr,
    /// Directory holding messages.sqlite
    pub data_dir: PathBuf,
    /// Message log backend
    pub storage: StorageBackend,
    /// `token=userId,...`; token auth is enforced when set
    pub auth_tokens: Option<String>,
    /// Bound of each connection's outbound queue
    pub outbox_capacity: usize,
    /// Capacity of the presence broadcast channel
    pub broadcast_capacity: usize,
    /// Max message content length in bytes
    pub max_content_len: usize,
    /// History page size when the caller gives none
    pub history_limit: u32,
    /// Upper bound for a requested history page size
    pub history_max_limit: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            data_dir: PathBuf::from("relay_data"),
            storage: StorageBackend::Sqlite,
            auth_tokens: None,
            outbox_capacity: 256,
            broadcast_capacity: 1024,
            max_content_len: 64 * 1024,
            history_limit: 50,
            history_max_limit: 200,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl RelayConfig {
    /// Build config from `RELAY_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("RELAY_ADDR", defaults.bind_addr),
            data_dir: std::env::var("RELAY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            storage: env_or("RELAY_STORAGE", defaults.storage),
            auth_tokens: std::env::var("RELAY_AUTH_TOKENS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            outbox_capacity: env_or("RELAY_OUTBOX_CAPACITY", defaults.outbox_capacity).max(1),
            broadcast_capacity: env_or("RELAY_BROADCAST_CAPACITY", defaults.broadcast_capacity)
                .max(1),
            max_content_len: env_or("RELAY_MAX_CONTENT_LEN", defaults.max_content_len),
            history_limit: env_or("RELAY_HISTORY_LIMIT", defaults.history_limit).max(1),
            history_max_limit: env_or("RELAY_HISTORY_MAX_LIMIT", defaults.history_max_limit)
                .max(1),
        }
    }

    /// Create config with custom data directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Ensure the data directory exists
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }

    /// Turn optional caller paging into a bounded page.
    pub fn page(&self, limit: Option<u32>, offset: Option<u32>) -> Page {
        let max = self.history_max_limit.max(1);
        let limit = limit.unwrap_or(self.history_limit).clamp(1, max);
        Page::new(limit, offset.unwrap_or(0))
    }

    /// Open the configured message log backend.
    pub async fn open_log(&self) -> Result<Arc<dyn MessageLog>> {
        match self.storage {
            StorageBackend::Sqlite => {
                self.ensure_dirs().await?;
                Ok(Arc::new(SqliteMessageLog::open(&self.data_dir).await?))
            }
            StorageBackend::Memory => {
                warn!("Message log is in-memory; history is lost on restart");
                Ok(Arc::new(MemoryMessageLog::new()))
            }
        }
    }

    /// Build the authentication collaborator.
    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        match &self.auth_tokens {
            Some(entries) => {
                let table = TokenTable::parse(entries);
                info!("[Auth] Token authentication enabled ({} tokens)", table.len());
                Arc::new(table)
            }
            None => {
                warn!("[Auth] RELAY_AUTH_TOKENS unset; trusting sign-in claims as presented");
                Arc::new(TrustedClaims)
            }
        }
    }
}

/// App state shared across all handlers and connections
#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub registry: Arc<PresenceRegistry>,
    pub hub: PresenceHub,
    pub log: Arc<dyn MessageLog>,
    pub router: Arc<MessageRouter>,
    pub typing: TypingRelay,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        log: Arc<dyn MessageLog>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        let hub = PresenceHub::new(config.broadcast_capacity);
        let router = Arc::new(MessageRouter::new(
            log.clone(),
            registry.clone(),
            config.max_content_len,
        ));
        let typing = TypingRelay::new(registry.clone());

        Self {
            config,
            registry,
            hub,
            log,
            router,
            typing,
            auth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamps_limit() {
        let config = RelayConfig::default();
        assert_eq!(config.page(None, None), Page::new(50, 0));
        assert_eq!(config.page(Some(0), Some(7)), Page::new(1, 7));
        assert_eq!(config.page(Some(10_000), None), Page::new(200, 0));
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("Memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("postgres".parse::<StorageBackend>().is_err());
    }
}
