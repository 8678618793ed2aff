//! Wallet connector descriptors and the deduplication policy.
//!
//! A connector registry routinely hands out several entries for the same
//! wallet: a branded MetaMask connector next to a generic "Injected" one
//! that drives the very same `window.ethereum` object, or the same wallet
//! announced twice. [`dedupe`] turns that raw list into what the wallet
//! picker shows.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gateway::InjectedFlags;

/// How a connector reaches its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectorCategory {
    /// Provider object injected into the page by a browser extension.
    Injected,
    /// Mobile wallet app opened through an OS deep link.
    DeepLink,
    /// Remote wallet reached through a relay (WalletConnect and friends).
    Relay,
}

/// Wallet brands the front-end knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletBrand {
    /// MetaMask.
    MetaMask,
    /// Coinbase Wallet.
    Coinbase,
    /// WalletConnect.
    WalletConnect,
    /// Phantom.
    Phantom,
    /// Unbranded browser wallet.
    Generic,
}

impl WalletBrand {
    /// Detect the brand from a connector name or id (case-insensitive).
    #[must_use]
    pub fn detect(name: &str, id: &str) -> Self {
        let name = name.to_lowercase();
        let id = id.to_lowercase();
        let has = |needle: &str| name.contains(needle) || id.contains(needle);

        if has("metamask") {
            Self::MetaMask
        } else if has("coinbase") {
            Self::Coinbase
        } else if has("walletconnect") {
            Self::WalletConnect
        } else if has("phantom") {
            Self::Phantom
        } else {
            Self::Generic
        }
    }

    /// Whether this brand drives the page's injected ethereum provider.
    #[must_use]
    pub const fn uses_injected_ethereum(self) -> bool {
        matches!(self, Self::MetaMask | Self::Coinbase)
    }

    /// Icon shown next to the wallet name.
    #[must_use]
    pub const fn icon(self) -> &'static str {
        match self {
            Self::MetaMask => "🦊",
            Self::Coinbase => "🔵",
            Self::WalletConnect => "🔗",
            Self::Phantom => "👻",
            Self::Generic => "💼",
        }
    }
}

/// Identifies a wallet integration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    id: String,
    name: String,
    category: ConnectorCategory,
}

impl ConnectorDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: ConnectorCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
        }
    }

    /// Unique connector id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registry-supplied name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connector category.
    #[must_use]
    pub const fn category(&self) -> ConnectorCategory {
        self.category
    }

    /// Brand derived from name and id.
    #[must_use]
    pub fn brand(&self) -> WalletBrand {
        WalletBrand::detect(&self.name, &self.id)
    }

    /// Name shown to the user.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name == "Injected" {
            "Browser Wallet"
        } else {
            &self.name
        }
    }

    /// A generic injected connector drives whatever extension owns
    /// `window.ethereum`, without a brand of its own.
    #[must_use]
    pub fn is_generic_injected(&self) -> bool {
        self.category == ConnectorCategory::Injected && self.brand() == WalletBrand::Generic
    }

    /// Whether two descriptors refer to the same registry entry kind.
    ///
    /// Registries may rebuild connector instances (new ids) between the
    /// moment the picker was rendered and the moment the user clicked.
    #[must_use]
    pub fn same_wallet(&self, other: &Self) -> bool {
        self.name == other.name && self.category == other.category
    }

    fn dedupe_key(&self) -> String {
        if self.name.is_empty() {
            self.id.to_lowercase()
        } else {
            self.display_name().to_lowercase()
        }
    }
}

impl fmt::Display for ConnectorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.id)
    }
}

/// Remove duplicate logical wallets from a raw registry list.
///
/// Order follows the registry. Entries sharing a case-insensitive display
/// name keep only the first. A generic injected entry is dropped when a brand
/// connector for the injected provider is listed too, or when no injected
/// provider exists at all.
#[must_use]
pub fn dedupe(raw: &[ConnectorDescriptor], flags: InjectedFlags) -> Vec<ConnectorDescriptor> {
    let branded_injected = raw.iter().any(|c| c.brand().uses_injected_ethereum());
    let mut seen = HashSet::new();

    raw.iter()
        .filter(|connector| {
            if connector.is_generic_injected() && (branded_injected || !flags.ethereum) {
                return false;
            }
            seen.insert(connector.dedupe_key())
        })
        .cloned()
        .collect()
}
