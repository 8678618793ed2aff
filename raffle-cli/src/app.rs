//! Command handlers.
//!
//! Every invocation is a fresh process, so the session lives in the
//! last-connection cache: commands first [`App::restore`] it and
//! `disconnect` clears it.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, bail};
use raffle::alloy::primitives::{Address, U256};
use raffle::cache::FileCache;
use raffle::chain::{find_chain, network_name};
use raffle::config::{AppConfig, config_dir};
use raffle::connector::ConnectorDescriptor;
use raffle::deeplink::{ConnectRoute, Platform};
use raffle::gateway::{ConnectorRegistry, InjectedFlags, WalletProvider};
use raffle::lottery::{RaffleGateway, enter_raffle, format_eth};
use raffle::memory::{MemoryRaffle, MemoryRegistry};
use raffle::rpc::{RpcRaffle, RpcRegistry};
use raffle::state::ActiveSession;
use raffle::util::short_address;
use raffle::view::{HeaderControl, HeaderView};
use raffle::{WalletController, lottery};
use tracing::{debug, info};
use url::Url;

/// One ether, the balance of every simulated account.
const SIMULATED_BALANCE: u128 = 1_000_000_000_000_000_000;

/// Where wallets and the raffle come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// In-memory wallets and raffle.
    Simulated,
    /// Node accounts and the deployed raffle.
    Rpc {
        /// JSON-RPC endpoint.
        rpc_url: String,
    },
}

/// A configured controller plus raffle gateway.
pub struct App {
    controller: WalletController,
    raffle: Arc<dyn RaffleGateway>,
    injected: InjectedFlags,
    platform: Platform,
    page: Url,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("controller", &self.controller)
            .field("platform", &self.platform)
            .field("page", &self.page.as_str())
            .finish_non_exhaustive()
    }
}

impl App {
    /// Build the backend and the controller.
    pub async fn new(backend: &Backend, config: &AppConfig, platform: Platform, page: Url) -> anyhow::Result<Self> {
        let (registry, raffle, cache_name) = match backend {
            Backend::Simulated => {
                let registry = MemoryRegistry::demo();
                let raffle = MemoryRaffle::demo();
                let mut accounts = BTreeSet::new();
                for connector in registry.connectors() {
                    if let Some(wallet) = registry.wallet(connector.id()) {
                        accounts.extend(wallet.request_accounts().await?);
                    }
                }
                for account in accounts {
                    raffle.fund(account, U256::from(SIMULATED_BALANCE)).await;
                }
                (
                    Arc::new(registry) as Arc<dyn ConnectorRegistry>,
                    Arc::new(raffle) as Arc<dyn RaffleGateway>,
                    "last-connection.simulated.json",
                )
            }
            Backend::Rpc { rpc_url } => {
                let registry = RpcRegistry::connect_http(rpc_url).await?;
                let address: Address = config
                    .raffle_address
                    .parse()
                    .with_context(|| format!("invalid raffle address '{}'", config.raffle_address))?;
                let raffle = RpcRaffle::new(registry.provider().clone(), address);
                (
                    Arc::new(registry) as Arc<dyn ConnectorRegistry>,
                    Arc::new(raffle) as Arc<dyn RaffleGateway>,
                    "last-connection.json",
                )
            }
        };

        let cache_path = config
            .cache_path
            .clone()
            .unwrap_or_else(|| config_dir().join(cache_name));
        debug!(path = %cache_path.display(), "using connection cache");

        let injected = registry.injected();
        let controller = WalletController::builder(registry)
            .config(config.controller)
            .cache(Arc::new(FileCache::new(cache_path)))
            .build();

        Ok(Self {
            controller,
            raffle,
            injected,
            platform,
            page,
        })
    }

    /// Reconnect the cached session, if any.
    pub async fn restore(&self) -> Option<ActiveSession> {
        self.controller.restore().await
    }

    /// Print the wallet picker.
    pub fn wallets(&self) {
        self.controller.open_wallet_picker();
        let view = self.header();
        let Some(picker) = view.picker else {
            println!("Disconnect first to pick another wallet.");
            return;
        };

        println!("Connect your wallet");
        if let Some(note) = picker.mobile_note {
            println!("{note}");
        }
        if let Some(placeholder) = picker.placeholder() {
            println!("  {placeholder}");
        }
        for option in &picker.options {
            let badge = option.badge.map(|b| format!(" [{b}]")).unwrap_or_default();
            println!("  {} {:<16} {}{badge}", option.icon, option.name, option.connector.id());
            match self.controller.route(&option.connector, self.platform, &self.page) {
                ConnectRoute::Direct => {}
                ConnectRoute::DeepLink { url, fallback } => {
                    println!("      open {url}");
                    if let Some(fallback) = fallback {
                        println!("      or install from {fallback}");
                    }
                }
                ConnectRoute::Download(url) => println!("      install from {url}"),
            }
        }
        self.controller.hide_overlay();
    }

    /// Connect the wallet with connector id `id`.
    pub async fn connect(&self, id: &str) -> anyhow::Result<()> {
        let connectors = self.controller.list_connectors();
        let Some(connector) = connectors.iter().find(|c| c.id() == id) else {
            let ids: Vec<_> = connectors.iter().map(ConnectorDescriptor::id).collect();
            bail!("unknown wallet '{id}', expected one of: {}", ids.join(", "));
        };

        if let ConnectRoute::Download(url) = self.controller.route(connector, self.platform, &self.page) {
            println!("{} is not installed, get it from {url}", connector.display_name());
            return Ok(());
        }

        match self.controller.connect(connector).await {
            Ok(session) => {
                info!(connector = %connector.id(), "connected from cli");
                print_session(&session);
                Ok(())
            }
            Err(err) => bail!(err.user_message()),
        }
    }

    /// Print the header.
    pub fn status(&self) {
        let view = self.header();
        match &view.control {
            HeaderControl::ConnectButton => println!("Not connected"),
            HeaderControl::Spinner(label) => println!("{label}"),
            HeaderControl::Account(short) => {
                println!("Connected {short}");
                if let Some(session) = self.controller.session() {
                    println!("  wallet:  {}", session.connector.display_name());
                    println!("  network: {}", network_name(session.chain_id));
                }
            }
        }
        if let Some(error) = view.error {
            println!("! {error}");
        }
    }

    /// Print the raffle state.
    pub async fn raffle(&self) -> anyhow::Result<()> {
        let raffle = self.raffle.snapshot().await?;
        println!("DeFi Lottery [{}]", raffle.state);
        println!("  entry fee:     {}", format_eth(raffle.entrance_fee));
        println!("  total players: {}", raffle.players);
        println!("  prize pool:    {}", format_eth(raffle.prize_pool()));
        println!("  recent winner: {}", raffle.winner_display());

        if let Some(session) = self.controller.session() {
            let balance = self.raffle.balance(session.address).await?;
            println!("  your balance:  {}", format_eth(balance));
            println!(
                "  [{}]",
                lottery::enter_button_label(&raffle, balance, lottery::MIN_ENTRIES, false)
            );
        }
        Ok(())
    }

    /// Enter the raffle with `entries` entries.
    pub async fn enter(&self, entries: u32) -> anyhow::Result<()> {
        let session = self.controller.session();
        let entries = lottery::clamp_entries(entries);
        let hash = enter_raffle(self.raffle.as_ref(), session.as_ref(), entries, |status| {
            println!("{}", status.label());
        })
        .await?;

        let chain_id = session.map(|s| s.chain_id).unwrap_or_default();
        match find_chain(chain_id) {
            Some(chain) => println!("Transaction: {}", chain.tx_url(&hash)),
            None => println!("Transaction: {hash}"),
        }
        Ok(())
    }

    /// Disconnect the active session.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        let Some(session) = self.controller.session() else {
            println!("Not connected");
            return Ok(());
        };
        self.controller.disconnect().await?;
        println!("Disconnected {}", short_address(&session.address));
        Ok(())
    }

    fn header(&self) -> HeaderView {
        HeaderView::project(
            &self.controller.snapshot(),
            &self.controller.list_connectors(),
            self.injected,
            self.platform,
        )
    }
}

fn print_session(session: &ActiveSession) {
    println!(
        "Connected {} with {}",
        session.address.to_checksum(None),
        session.connector.display_name()
    );
    println!("  network: {}", network_name(session.chain_id));
}
