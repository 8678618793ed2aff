//! Capability surfaces the controller consumes.
//!
//! The controller never speaks a wallet protocol itself. It is handed a
//! [`ConnectorRegistry`] (the available integrations plus connect and
//! disconnect dispatch) and receives one [`WalletProvider`] per established
//! connection.
//!
//! # Events
//!
//! [`WalletProvider::events`] plays the role of `on(event, handler)`: each
//! call hands out a fresh broadcast receiver, and dropping the receiver is
//! the matching `removeListener`.

use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::connector::{ConnectorDescriptor, WalletBrand};
use crate::error::ProviderResult;

/// Presence of injected provider objects in the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectedFlags {
    /// Some ethereum provider object exists.
    pub ethereum: bool,
    /// The ethereum provider reports `isMetaMask`.
    pub metamask: bool,
    /// The ethereum provider reports `isCoinbaseWallet`.
    pub coinbase: bool,
    /// A Phantom provider reports `isPhantom`.
    pub phantom: bool,
}

impl InjectedFlags {
    /// Whether the wallet for `brand` is installed in this browser.
    ///
    /// Relay and deep-link wallets are never "installed" in the page.
    #[must_use]
    pub const fn is_installed(self, brand: WalletBrand) -> bool {
        match brand {
            WalletBrand::MetaMask => self.ethereum && self.metamask,
            WalletBrand::Coinbase => self.ethereum && self.coinbase,
            WalletBrand::Phantom => self.phantom,
            WalletBrand::Generic => self.ethereum,
            WalletBrand::WalletConnect => false,
        }
    }
}

/// Unsolicited notifications pushed by a connected provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The exposed account list changed; empty means the site lost access.
    AccountsChanged(Vec<Address>),
    /// The wallet switched networks.
    ChainChanged(u64),
    /// The provider dropped the connection.
    Disconnect,
}

/// A connected wallet provider.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for the accounts exposed to this site.
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>>;

    /// Currently active chain id.
    async fn chain_id(&self) -> ProviderResult<u64>;

    /// Subscribe to provider events.
    fn events(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// The set of available wallet integrations.
#[async_trait]
pub trait ConnectorRegistry: Send + Sync {
    /// Raw connector list, possibly containing duplicates.
    fn connectors(&self) -> Vec<ConnectorDescriptor>;

    /// Whether the registry finished initializing its connectors.
    fn is_ready(&self) -> bool;

    /// Injected provider objects detectable right now.
    fn injected(&self) -> InjectedFlags;

    /// Establish a connection through `connector`.
    async fn connect(&self, connector: &ConnectorDescriptor)
    -> ProviderResult<Arc<dyn WalletProvider>>;

    /// Tear down the connection held by `connector`.
    async fn disconnect(&self, connector: &ConnectorDescriptor) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_installed() {
        let flags = InjectedFlags {
            ethereum: true,
            metamask: true,
            ..InjectedFlags::default()
        };
        assert!(flags.is_installed(WalletBrand::MetaMask));
        assert!(flags.is_installed(WalletBrand::Generic));
        assert!(!flags.is_installed(WalletBrand::Coinbase));
        assert!(!flags.is_installed(WalletBrand::Phantom));
        assert!(!flags.is_installed(WalletBrand::WalletConnect));

        let bare = InjectedFlags::default();
        assert!(!bare.is_installed(WalletBrand::Generic));
    }
}
