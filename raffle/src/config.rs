//! Configuration for the controller and the front-end.
//!
//! Both structs are plain JSON documents; every field has a default so a
//! partial file (or no file) works.
//!
//! ```json
//! {
//!   "rpc_url": "http://localhost:8545",
//!   "raffle_address": "0x67c768ab102c7f458dfa8c5c60743a9ec58c6255",
//!   "controller": { "error_ttl_ms": 8000 }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::retry::RetryPolicy;

/// Deployed raffle contract used when nothing else is configured.
pub const DEFAULT_RAFFLE_ADDRESS: &str = "0x67c768ab102c7f458dfa8c5c60743a9ec58c6255";

/// Default JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// Timers and bounds used by [`WalletController`](crate::WalletController).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Interval between registry readiness polls.
    pub init_poll_interval_ms: u64,
    /// Maximum readiness polls before `connect` gives up.
    pub init_max_attempts: u32,
    /// Delay after a disconnect before the state is considered settled.
    pub settle_delay_ms: u64,
    /// Delay between the forced disconnect and the retry after an
    /// "already connected" error.
    pub retry_settle_ms: u64,
    /// Lifetime of the pending error notice.
    pub error_ttl_ms: u64,
    /// Upper bound for the registry's disconnect primitive.
    pub disconnect_fallback_ms: u64,
    /// How long a cached connection stays usable for auto-reconnect.
    pub cache_freshness_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            init_poll_interval_ms: 100,
            init_max_attempts: 50,
            settle_delay_ms: 500,
            retry_settle_ms: 1000,
            error_ttl_ms: 5000,
            disconnect_fallback_ms: 2000,
            cache_freshness_secs: 24 * 60 * 60,
        }
    }
}

impl ControllerConfig {
    /// Readiness polling schedule.
    #[must_use]
    pub const fn init_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_millis(self.init_poll_interval_ms),
            self.init_max_attempts,
        )
    }

    /// Schedule used to wait for another task's disconnect to finish.
    ///
    /// Covers the fallback timeout plus the settle delay, polled at the
    /// init interval.
    #[must_use]
    pub fn disconnect_wait_policy(&self) -> RetryPolicy {
        let interval = self.init_poll_interval_ms.max(1);
        let budget = self
            .disconnect_fallback_ms
            .saturating_add(self.settle_delay_ms)
            .saturating_add(interval);
        let attempts = u32::try_from((budget / interval).saturating_add(1)).unwrap_or(u32::MAX);
        RetryPolicy::fixed(Duration::from_millis(interval), attempts)
    }

    /// Post-disconnect settle delay.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Settle delay before the already-connected retry.
    #[must_use]
    pub const fn retry_settle(&self) -> Duration {
        Duration::from_millis(self.retry_settle_ms)
    }

    /// Pending error lifetime.
    #[must_use]
    pub const fn error_ttl(&self) -> Duration {
        Duration::from_millis(self.error_ttl_ms)
    }

    /// Disconnect fallback timeout.
    #[must_use]
    pub const fn disconnect_fallback(&self) -> Duration {
        Duration::from_millis(self.disconnect_fallback_ms)
    }

    /// Cache freshness window.
    #[must_use]
    pub const fn cache_freshness(&self) -> Duration {
        Duration::from_secs(self.cache_freshness_secs)
    }

    /// Reject values that would make waits unbounded or notices invisible.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.init_max_attempts == 0 {
            return Err(ConfigError::invalid("init_max_attempts must be at least 1"));
        }
        if self.init_poll_interval_ms == 0 {
            return Err(ConfigError::invalid("init_poll_interval_ms must be positive"));
        }
        if self.error_ttl_ms == 0 {
            return Err(ConfigError::invalid("error_ttl_ms must be positive"));
        }
        if self.disconnect_fallback_ms == 0 {
            return Err(ConfigError::invalid("disconnect_fallback_ms must be positive"));
        }
        Ok(())
    }
}

/// Front-end configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// JSON-RPC endpoint of the node.
    pub rpc_url: String,
    /// Raffle contract address.
    pub raffle_address: String,
    /// Location of the last-connection cache; `None` uses the default.
    pub cache_path: Option<PathBuf>,
    /// Controller timers.
    pub controller: ControllerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            raffle_address: DEFAULT_RAFFLE_ADDRESS.to_string(),
            cache_path: None,
            controller: ControllerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate nested sections and the contract address.
    pub fn validate(&self) -> ConfigResult<()> {
        self.controller.validate()?;
        self.raffle_address
            .parse::<alloy::primitives::Address>()
            .map_err(|e| ConfigError::invalid(format!("raffle_address: {e}")))?;
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::invalid("rpc_url must not be empty"));
        }
        Ok(())
    }
}

/// Directory holding raffle configuration and cache files (`~/.raffle`).
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".raffle")
}

/// Default configuration file path (`~/.raffle/config.json`).
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from `path`; a missing file yields the defaults.
pub fn load_config(path: &Path) -> ConfigResult<AppConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.validate()?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Write configuration to `path`, creating parent directories.
pub fn save_config(config: &AppConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
