//! Connection state model.
//!
//! The whole header state is one [`Snapshot`]: a tagged [`WalletState`]
//! (which carries the [`ActiveSession`] only while connected), an
//! [`Overlay`] for the one popup that may be open, and an optional
//! [`PendingError`]. Overlay rules are enforced in
//! [`Snapshot::set_wallet`], so a transition can never leave a stale popup
//! behind.

use std::fmt;

use alloy::primitives::Address;
use tokio::time::{Duration, Instant};

use crate::connector::ConnectorDescriptor;
use crate::error::{ConnectError, ProviderErrorKind};

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// No wallet connected.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A session is active.
    Connected,
    /// A disconnect is in flight.
    Disconnecting,
}

impl ConnectionStatus {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The connected-state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// Connector that owns the connection.
    pub connector: ConnectorDescriptor,
    /// Account exposed by the wallet.
    pub address: Address,
    /// Active chain id.
    pub chain_id: u64,
    /// Unix milliseconds when the session was established.
    pub connected_at: u64,
}

/// Connection state with its per-state data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WalletState {
    /// No wallet connected.
    #[default]
    Disconnected,
    /// Attempt `attempt` is connecting through `connector`.
    Connecting {
        /// Connector being connected.
        connector: ConnectorDescriptor,
        /// Monotonic attempt number, used to detect cancelled attempts.
        attempt: u64,
    },
    /// A session is active.
    Connected(ActiveSession),
    /// `connector` is being disconnected.
    Disconnecting {
        /// Connector being disconnected.
        connector: ConnectorDescriptor,
    },
}

impl WalletState {
    /// Status tag of this state.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting { .. } => ConnectionStatus::Connecting,
            Self::Connected(_) => ConnectionStatus::Connected,
            Self::Disconnecting { .. } => ConnectionStatus::Disconnecting,
        }
    }

    /// Active session, present only while connected.
    #[must_use]
    pub const fn session(&self) -> Option<&ActiveSession> {
        match self {
            Self::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Whether a session is active.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Popup currently shown by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overlay {
    /// Nothing open.
    #[default]
    Hidden,
    /// Wallet selection modal.
    WalletPicker,
    /// Connected-account popover.
    AccountPopover,
}

impl Overlay {
    /// Whether this overlay may be open in `status`.
    #[must_use]
    pub const fn allowed_in(self, status: ConnectionStatus) -> bool {
        match self {
            Self::Hidden => true,
            Self::WalletPicker => matches!(
                status,
                ConnectionStatus::Disconnected | ConnectionStatus::Connecting
            ),
            Self::AccountPopover => matches!(status, ConnectionStatus::Connected),
        }
    }
}

/// Last failed connection attempt, shown until it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingError {
    /// User-facing message.
    pub message: String,
    /// Provider classification, if the failure came from the provider.
    pub kind: Option<ProviderErrorKind>,
    /// Moment the notice disappears.
    pub expires_at: Instant,
    pub(crate) seq: u64,
}

impl PendingError {
    pub(crate) fn new(error: &ConnectError, ttl: Duration, seq: u64) -> Self {
        Self {
            message: error.user_message(),
            kind: error.provider_kind(),
            expires_at: Instant::now() + ttl,
            seq,
        }
    }

    /// Whether the notice has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Everything the header renders from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Connection state.
    pub wallet: WalletState,
    /// Open popup.
    pub overlay: Overlay,
    /// Error notice.
    pub error: Option<PendingError>,
}

impl Snapshot {
    /// Shorthand for `self.wallet.status()`.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.wallet.status()
    }

    /// Shorthand for `self.wallet.session()`.
    #[must_use]
    pub const fn session(&self) -> Option<&ActiveSession> {
        self.wallet.session()
    }

    /// Replace the wallet state and close overlays the new state forbids.
    ///
    /// Leaving `connecting` is a terminal outcome of the attempt, so the
    /// wallet picker is dismissed as well.
    pub fn set_wallet(&mut self, wallet: WalletState) {
        let previous = self.wallet.status();
        self.wallet = wallet;
        let status = self.wallet.status();

        let attempt_finished =
            previous == ConnectionStatus::Connecting && status != ConnectionStatus::Connecting;
        if attempt_finished || !self.overlay.allowed_in(status) {
            self.overlay = Overlay::Hidden;
        }
    }

    /// Open `overlay` if the current status allows it.
    ///
    /// Returns `true` if the overlay changed.
    pub fn open(&mut self, overlay: Overlay) -> bool {
        if self.overlay == overlay || !overlay.allowed_in(self.status()) {
            return false;
        }
        self.overlay = overlay;
        true
    }

    /// Close whatever overlay is open.
    pub fn close(&mut self) -> bool {
        let changed = self.overlay != Overlay::Hidden;
        self.overlay = Overlay::Hidden;
        changed
    }

    /// Drop the error notice if it expired at `now`.
    pub fn expire_error(&mut self, now: Instant) -> bool {
        if self.error.as_ref().is_some_and(|e| e.is_expired_at(now)) {
            self.error = None;
            return true;
        }
        false
    }
}
