//! Wallet connection controller and raffle entrance for the DeFi Lottery
//! front-end.
//!
//! The [`WalletController`] is the piece everything else hangs off: it owns
//! the single header [`Snapshot`](state::Snapshot), serializes connect and
//! disconnect attempts, listens to provider events while connected, and
//! keeps the wallet picker and account popover consistent with the
//! connection state. Wallet integrations plug in through the
//! [`gateway`] traits; [`memory`] and [`rpc`] provide backends.
//!
//! # Modules
//!
//! - [`controller`]: connection state machine
//! - [`connector`]: connector descriptors and deduplication
//! - [`state`]: snapshot, status and overlay model
//! - [`deeplink`]: mobile wallet routing
//! - [`view`]: header render model
//! - [`lottery`]: raffle entrance
//! - [`cache`]: last-connection cache
//! - [`config`]: configuration files

pub mod cache;
pub mod chain;
pub mod config;
pub mod connector;
pub mod controller;
pub mod deeplink;
pub mod error;
pub mod gateway;
pub mod lottery;
pub mod memory;
pub mod prelude;
pub mod retry;
pub mod rpc;
pub mod state;
pub mod util;
pub mod view;

pub use alloy;
pub use controller::{WalletController, WalletControllerBuilder};
pub use error::{Error, Result};
