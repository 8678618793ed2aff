//! Render model for the header.
//!
//! [`HeaderView::project`] is a pure function of the controller snapshot
//! and the page environment; front-ends (and the CLI) draw whatever it
//! returns.

use tokio::time::Instant;

use crate::chain::network_name;
use crate::connector::ConnectorDescriptor;
use crate::deeplink::{Platform, offers_download};
use crate::gateway::InjectedFlags;
use crate::state::{ConnectionStatus, Overlay, Snapshot};
use crate::util::short_address;

/// Placeholder shown while the registry lists no connectors.
pub const LOADING_WALLETS: &str = "Loading wallets...";

/// One row of the wallet picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletOption {
    /// Connector behind the row.
    pub connector: ConnectorDescriptor,
    /// Icon glyph.
    pub icon: &'static str,
    /// Display name.
    pub name: String,
    /// `Installed` or `Tap to install`, mobile only.
    pub badge: Option<&'static str>,
}

/// The wallet picker modal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletPicker {
    /// Rows; empty while loading.
    pub options: Vec<WalletOption>,
    /// Hint shown on mobile platforms.
    pub mobile_note: Option<&'static str>,
}

/// The connected-account popover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPopover {
    /// Icon glyph of the wallet.
    pub icon: &'static str,
    /// Wallet display name.
    pub wallet: String,
    /// Full checksummed address.
    pub address: String,
    /// Network name.
    pub network: String,
}

/// Main header control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderControl {
    /// "Connect Wallet" button.
    ConnectButton,
    /// Spinner with a label.
    Spinner(&'static str),
    /// Connected pill with the shortened address.
    Account(String),
}

/// Everything the header shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderView {
    /// Main control.
    pub control: HeaderControl,
    /// Picker modal, when open.
    pub picker: Option<WalletPicker>,
    /// Account popover, when open.
    pub popover: Option<AccountPopover>,
    /// Error toast text.
    pub error: Option<String>,
}

impl HeaderView {
    /// Project `snapshot` into a header.
    #[must_use]
    pub fn project(
        snapshot: &Snapshot,
        connectors: &[ConnectorDescriptor],
        flags: InjectedFlags,
        platform: Platform,
    ) -> Self {
        let control = match (snapshot.status(), snapshot.session()) {
            (ConnectionStatus::Connecting, _) => HeaderControl::Spinner("Connecting..."),
            (ConnectionStatus::Disconnecting, _) => HeaderControl::Spinner("Disconnecting..."),
            (ConnectionStatus::Connected, Some(session)) => {
                HeaderControl::Account(short_address(&session.address))
            }
            _ => HeaderControl::ConnectButton,
        };

        let picker = (snapshot.overlay == Overlay::WalletPicker
            && snapshot.status() == ConnectionStatus::Disconnected)
            .then(|| WalletPicker {
                options: connectors
                    .iter()
                    .map(|c| wallet_option(c, flags, platform))
                    .collect(),
                mobile_note: platform.is_mobile().then_some(
                    "If you don't have a wallet installed, clicking will redirect you to download.",
                ),
            });

        let popover = snapshot
            .session()
            .filter(|_| snapshot.overlay == Overlay::AccountPopover)
            .map(|session| AccountPopover {
                icon: session.connector.brand().icon(),
                wallet: session.connector.display_name().to_string(),
                address: session.address.to_checksum(None),
                network: network_name(session.chain_id),
            });

        let now = Instant::now();
        let error = snapshot
            .error
            .as_ref()
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.message.clone());

        Self {
            control,
            picker,
            popover,
            error,
        }
    }
}

fn wallet_option(connector: &ConnectorDescriptor, flags: InjectedFlags, platform: Platform) -> WalletOption {
    let brand = connector.brand();
    let badge = if !platform.is_mobile() {
        None
    } else if flags.is_installed(brand) {
        Some("Installed")
    } else {
        offers_download(brand).then_some("Tap to install")
    };

    WalletOption {
        connector: connector.clone(),
        icon: brand.icon(),
        name: connector.display_name().to_string(),
        badge,
    }
}

impl WalletPicker {
    /// Placeholder text when there is nothing to pick yet.
    #[must_use]
    pub fn placeholder(&self) -> Option<&'static str> {
        self.options.is_empty().then_some(LOADING_WALLETS)
    }
}
