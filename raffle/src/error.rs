//! Unified error types for the raffle front-end.
//!
//! Each concern owns its own error enum (provider calls, connect,
//! disconnect, cache, configuration, lottery). All of them convert into the
//! crate-level [`Error`] so callers that do not care about the distinction
//! can use [`Result`] and `?`.

use crate::state::ConnectionStatus;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for raffle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Wallet connection failed.
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),

    /// Wallet disconnection was refused.
    #[error("disconnect: {0}")]
    Disconnect(#[from] DisconnectError),

    /// Connection cache error.
    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Lottery read or write error.
    #[error("lottery: {0}")]
    Lottery(#[from] LotteryError),
}

/// Result type alias for raffle operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Provider Errors
// ============================================================================

/// EIP-1193 code for a request the user rejected in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC code wallets use when an identical request is already open.
pub const REQUEST_PENDING_CODE: i64 = -32002;

/// Error reported by a wallet provider or connector.
///
/// Providers only give us a numeric code (sometimes) and a message; the
/// [`kind`](Self::kind) classifier derives the taxonomy the controller acts
/// on from those two fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Numeric error code, if the provider sent one.
    pub code: Option<i64>,
    /// Provider message.
    pub message: String,
}

/// Classification of a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The user closed or rejected the wallet prompt.
    UserRejected,
    /// A connection request is already waiting in the wallet.
    RequestPending,
    /// No provider object for this wallet exists.
    ProviderNotFound,
    /// The connector believes it is still connected.
    AlreadyConnected,
    /// Anything else; the message is passed through.
    Other,
}

impl ProviderError {
    /// Create a provider error from an optional code and a message.
    #[must_use]
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a user-rejected error (code 4001).
    #[must_use]
    pub fn user_rejected() -> Self {
        Self::new(Some(USER_REJECTED_CODE), "User rejected the request.")
    }

    /// Create a request-already-pending error (code -32002).
    #[must_use]
    pub fn request_pending() -> Self {
        Self::new(
            Some(REQUEST_PENDING_CODE),
            "Request of type 'wallet_requestPermissions' already pending",
        )
    }

    /// Create an "already connected" error.
    #[must_use]
    pub fn already_connected() -> Self {
        Self::new(None, "Connector already connected.")
    }

    /// Create a provider-not-found error for the named wallet.
    #[must_use]
    pub fn not_found(wallet: &str) -> Self {
        Self::new(None, format!("{wallet} provider not found"))
    }

    /// Create an error that carries only a message.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ProviderErrorKind {
        match self.code {
            Some(USER_REJECTED_CODE) => return ProviderErrorKind::UserRejected,
            Some(REQUEST_PENDING_CODE) => return ProviderErrorKind::RequestPending,
            _ => {}
        }

        let message = self.message.to_lowercase();
        if message.contains("already connected") {
            ProviderErrorKind::AlreadyConnected
        } else if message.contains("provider not found") || message.contains("not installed") {
            ProviderErrorKind::ProviderNotFound
        } else {
            ProviderErrorKind::Other
        }
    }

    /// Returns `true` if the controller recovers from this error by itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ProviderErrorKind::AlreadyConnected
    }
}

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// Connect / Disconnect Errors
// ============================================================================

/// Error returned by [`WalletController::connect`](crate::WalletController::connect).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Another connect or a disconnect is in flight.
    #[error("controller is busy ({0})")]
    Busy(ConnectionStatus),

    /// The connector registry did not finish initializing in time.
    #[error("wallet connectors not ready after {attempts} attempts")]
    NotReady {
        /// Number of readiness polls made.
        attempts: u32,
    },

    /// The connector disappeared from the registry.
    #[error("connector '{0}' is no longer available")]
    ConnectorUnavailable(String),

    /// The wallet connected but exposed no account.
    #[error("wallet returned no accounts")]
    NoAccounts,

    /// The attempt was cancelled by a forced disconnect.
    #[error("connection attempt was cancelled")]
    Cancelled,

    /// The wallet provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Message shown when no wallet extension can be found.
pub const PROVIDER_NOT_FOUND_MESSAGE: &str = "No wallet found. Please install a wallet extension";

impl ConnectError {
    /// The fixed user-facing text for this error.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(err) => match err.kind() {
                ProviderErrorKind::UserRejected => "Connection cancelled by user".into(),
                ProviderErrorKind::RequestPending => "Connection request already pending".into(),
                ProviderErrorKind::AlreadyConnected => "Please try again in a moment".into(),
                ProviderErrorKind::ProviderNotFound => PROVIDER_NOT_FOUND_MESSAGE.into(),
                ProviderErrorKind::Other => format!("Connection failed: {}", err.message),
            },
            other => format!("Connection failed: {other}"),
        }
    }

    /// Classification of the underlying provider error, if any.
    #[must_use]
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::Provider(err) => Some(err.kind()),
            _ => None,
        }
    }
}

/// Error returned by [`WalletController::disconnect`](crate::WalletController::disconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectError {
    /// A connect attempt has not reached a terminal state yet.
    #[error("a connection attempt is still in flight")]
    ConnectInFlight,
}

// ============================================================================
// Cache Errors
// ============================================================================

/// Error type for the last-connection cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored account is not a valid address.
    #[error("invalid cached account: {0}")]
    InvalidAccount(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Lottery Errors
// ============================================================================

/// Error type for contract reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LotteryError {
    /// No wallet session is active.
    #[error("Please connect your wallet first")]
    NotConnected,

    /// The account cannot pay for the requested entries.
    #[error("Insufficient balance to enter lottery")]
    InsufficientBalance,

    /// The raffle is calculating a winner or closed.
    #[error("Lottery is not currently open for entries")]
    NotOpen,

    /// A contract read failed.
    #[error("read failed: {0}")]
    Read(String),

    /// The entry transaction failed.
    #[error("{0}")]
    Transaction(String),
}

/// Result type for lottery operations.
pub type LotteryResult<T> = std::result::Result<T, LotteryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_kinds() {
        assert_eq!(
            ProviderError::user_rejected().kind(),
            ProviderErrorKind::UserRejected
        );
        assert_eq!(
            ProviderError::request_pending().kind(),
            ProviderErrorKind::RequestPending
        );
        assert_eq!(
            ProviderError::already_connected().kind(),
            ProviderErrorKind::AlreadyConnected
        );
        assert_eq!(
            ProviderError::other("Connector Already Connected").kind(),
            ProviderErrorKind::AlreadyConnected
        );
        assert_eq!(
            ProviderError::not_found("MetaMask").kind(),
            ProviderErrorKind::ProviderNotFound
        );
        assert_eq!(
            ProviderError::other("chain mismatch").kind(),
            ProviderErrorKind::Other
        );
    }

    #[test]
    fn test_code_wins_over_message() {
        let err = ProviderError::new(Some(USER_REJECTED_CODE), "already connected");
        assert_eq!(err.kind(), ProviderErrorKind::UserRejected);
        assert!(!err.is_retryable());
        assert!(ProviderError::already_connected().is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let msg = |e: ProviderError| ConnectError::from(e).user_message();
        assert_eq!(msg(ProviderError::user_rejected()), "Connection cancelled by user");
        assert_eq!(
            msg(ProviderError::request_pending()),
            "Connection request already pending"
        );
        assert_eq!(
            msg(ProviderError::already_connected()),
            "Please try again in a moment"
        );
        assert_eq!(
            msg(ProviderError::not_found("Coinbase Wallet")),
            PROVIDER_NOT_FOUND_MESSAGE
        );
        assert_eq!(
            msg(ProviderError::other("boom")),
            "Connection failed: boom"
        );
        assert_eq!(
            ConnectError::NoAccounts.user_message(),
            "Connection failed: wallet returned no accounts"
        );
    }

    #[test]
    fn test_error_conversions() {
        let err: Error = ConnectError::NoAccounts.into();
        assert!(matches!(err, Error::Connect(_)));

        let err: Error = LotteryError::NotOpen.into();
        assert!(matches!(err, Error::Lottery(_)));
        assert_eq!(
            LotteryError::NotConnected.to_string(),
            "Please connect your wallet first"
        );
    }
}
