//! Common imports.

pub use crate::cache::{CachedConnection, ConnectionCache, FileCache, MemoryCache};
pub use crate::config::{AppConfig, ControllerConfig};
pub use crate::connector::{ConnectorCategory, ConnectorDescriptor, WalletBrand};
pub use crate::controller::WalletController;
pub use crate::deeplink::{ConnectRoute, Platform};
pub use crate::error::{ConnectError, DisconnectError, LotteryError, ProviderError, ProviderErrorKind};
pub use crate::gateway::{ConnectorRegistry, InjectedFlags, ProviderEvent, WalletProvider};
pub use crate::lottery::{RaffleGateway, RaffleSnapshot, RaffleState, TransactionStatus};
pub use crate::state::{ActiveSession, ConnectionStatus, Overlay, Snapshot};
pub use crate::view::HeaderView;
