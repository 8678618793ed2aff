//! Best-effort cache of the last successful connection.
//!
//! Lets the front-end skip the wallet picker on reload. Every failure mode
//! here is soft: the controller logs cache errors and carries on with the
//! manual connect flow.

use std::path::PathBuf;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::debug;

use crate::config::config_dir;
use crate::error::{CacheError, CacheResult};
use crate::state::ActiveSession;

/// Record of the last successful connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedConnection {
    /// Connector id the session used.
    pub connector_id: String,
    /// Checksummed account address.
    pub account: String,
    /// Unix milliseconds when the record was written.
    pub saved_at: u64,
}

impl CachedConnection {
    /// Build a record from a live session.
    #[must_use]
    pub fn from_session(session: &ActiveSession, saved_at: u64) -> Self {
        Self {
            connector_id: session.connector.id().to_string(),
            account: session.address.to_checksum(None),
            saved_at,
        }
    }

    /// Parsed account address.
    pub fn account(&self) -> CacheResult<Address> {
        self.account
            .parse()
            .map_err(|_| CacheError::InvalidAccount(self.account.clone()))
    }

    /// Whether the record is younger than `window` at `now_ms`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_fresh_at(&self, now_ms: u64, window: Duration) -> bool {
        let window_ms = window.as_millis() as u64;
        now_ms >= self.saved_at && now_ms - self.saved_at < window_ms
    }
}

/// Storage for the last-connection record.
#[async_trait]
pub trait ConnectionCache: Send + Sync {
    /// Load the record, if any.
    async fn load(&self) -> CacheResult<Option<CachedConnection>>;

    /// Replace the record.
    async fn save(&self, entry: &CachedConnection) -> CacheResult<()>;

    /// Remove the record.
    async fn clear(&self) -> CacheResult<()>;
}

/// In-memory cache.
///
/// Fast but not persistent across restarts.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entry: RwLock<Option<CachedConnection>>,
}

impl MemoryCache {
    /// Create an empty memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory cache holding `entry`.
    #[must_use]
    pub fn with_entry(entry: CachedConnection) -> Self {
        Self {
            entry: RwLock::new(Some(entry)),
        }
    }
}

#[async_trait]
impl ConnectionCache for MemoryCache {
    async fn load(&self) -> CacheResult<Option<CachedConnection>> {
        Ok(self.entry.read().await.clone())
    }

    async fn save(&self, entry: &CachedConnection) -> CacheResult<()> {
        *self.entry.write().await = Some(entry.clone());
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        *self.entry.write().await = None;
        Ok(())
    }
}

/// File-backed cache.
///
/// Persists the record as a JSON document.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    /// Create a file cache at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a file cache in the default location (`~/.raffle/last-connection.json`).
    #[must_use]
    pub fn default_path() -> Self {
        Self::new(config_dir().join("last-connection.json"))
    }

    /// Location of the cache file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ConnectionCache for FileCache {
    async fn load(&self) -> CacheResult<Option<CachedConnection>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let entry: CachedConnection = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), connector = %entry.connector_id, "loaded cached connection");
        Ok(Some(entry))
    }

    async fn save(&self, entry: &CachedConnection) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(entry)?;
        tokio::fs::write(&self.path, content).await?;
        debug!(path = %self.path.display(), "saved cached connection");
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        if self.path.exists() {
            tokio::fs::remove_file(&self.path).await?;
            debug!(path = %self.path.display(), "cleared cached connection");
        }
        Ok(())
    }
}
