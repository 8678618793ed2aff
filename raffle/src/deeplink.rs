//! Mobile wallet routing.
//!
//! On a phone without the wallet's in-app browser there is no injected
//! provider to talk to, so picking a wallet means leaving the page: open
//! the wallet app through its deep link and fall back to the store page
//! when nothing picks the link up.

use std::fmt;

use tokio::time::Duration;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::connector::WalletBrand;

/// Delay after which an unanswered deep link falls back to the download page.
pub const DEEP_LINK_FALLBACK: Duration = Duration::from_millis(1500);

/// Device family, as far as routing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    /// iPhone, iPad or iPod.
    Ios,
    /// Android phone or tablet.
    Android,
    /// Any other mobile browser.
    OtherMobile,
    /// Desktop browser.
    #[default]
    Desktop,
}

impl Platform {
    /// Classify a browser user agent string.
    #[must_use]
    pub fn from_user_agent(user_agent: &str) -> Self {
        if ["iPad", "iPhone", "iPod"].iter().any(|d| user_agent.contains(d)) {
            return Self::Ios;
        }
        if user_agent.contains("Android") {
            return Self::Android;
        }

        let lower = user_agent.to_lowercase();
        if ["webos", "blackberry", "iemobile", "opera mini"]
            .iter()
            .any(|d| lower.contains(d))
        {
            return Self::OtherMobile;
        }
        Self::Desktop
    }

    /// Whether this is a mobile platform.
    #[must_use]
    pub const fn is_mobile(self) -> bool {
        !matches!(self, Self::Desktop)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::OtherMobile => "mobile",
            Self::Desktop => "desktop",
        })
    }
}

/// Links that open or install a wallet app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletLinks {
    /// Opens the current page inside the wallet's browser.
    pub deep_link: Option<String>,
    /// Store or download page for the platform.
    pub download: Option<String>,
    /// Platform-neutral link into the wallet.
    pub universal_link: Option<String>,
}

fn host_with_port(page: &Url) -> String {
    let host = page.host_str().unwrap_or_default();
    page.port()
        .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"))
}

/// Whether `brand` has a download page.
#[must_use]
pub const fn offers_download(brand: WalletBrand) -> bool {
    matches!(
        brand,
        WalletBrand::MetaMask | WalletBrand::Coinbase | WalletBrand::WalletConnect
    )
}

/// Links for `brand` on `platform`, pointing back at `page`.
#[must_use]
pub fn wallet_links(brand: WalletBrand, platform: Platform, page: &Url) -> WalletLinks {
    match brand {
        WalletBrand::MetaMask => {
            let host = host_with_port(page);
            let download = match platform {
                Platform::Ios => "https://apps.apple.com/app/metamask/id1438144202",
                Platform::Android => "https://play.google.com/store/apps/details?id=io.metamask",
                Platform::OtherMobile | Platform::Desktop => "https://metamask.io/download/",
            };
            WalletLinks {
                deep_link: Some(format!("https://metamask.app.link/dapp/{host}{}", page.path())),
                download: Some(download.to_string()),
                universal_link: Some(format!("https://metamask.app.link/dapp/{host}")),
            }
        }
        WalletBrand::Coinbase => {
            let encoded: String = byte_serialize(page.as_str().as_bytes()).collect();
            let link = format!("https://go.cb-w.com/dapp?cb_url={encoded}");
            let download = match platform {
                Platform::Ios => "https://apps.apple.com/app/coinbase-wallet/id1278383455",
                Platform::Android => "https://play.google.com/store/apps/details?id=org.toshi",
                Platform::OtherMobile | Platform::Desktop => "https://www.coinbase.com/wallet",
            };
            WalletLinks {
                deep_link: Some(link.clone()),
                download: Some(download.to_string()),
                universal_link: Some(link),
            }
        }
        // pairing happens over QR codes
        WalletBrand::WalletConnect => WalletLinks {
            download: Some("https://walletconnect.com/wallets".to_string()),
            ..WalletLinks::default()
        },
        WalletBrand::Phantom | WalletBrand::Generic => WalletLinks::default(),
    }
}

/// What selecting a wallet in the picker should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectRoute {
    /// Connect through the registry.
    Direct,
    /// Navigate to `url`; open `fallback` if the app does not take over
    /// within [`DEEP_LINK_FALLBACK`].
    DeepLink {
        /// Deep link into the wallet app.
        url: String,
        /// Download page opened when the link goes unanswered.
        fallback: Option<String>,
    },
    /// Open the download page.
    Download(String),
}

/// Decide how to reach a wallet.
///
/// Desktop browsers and installed wallets always connect directly.
#[must_use]
pub fn route(brand: WalletBrand, platform: Platform, installed: bool, page: &Url) -> ConnectRoute {
    if installed || !platform.is_mobile() {
        return ConnectRoute::Direct;
    }

    let links = wallet_links(brand, platform, page);
    match (links.deep_link, links.download) {
        (Some(url), fallback) => ConnectRoute::DeepLink { url, fallback },
        (None, Some(download)) => ConnectRoute::Download(download),
        (None, None) => ConnectRoute::Direct,
    }
}
