//! JSON-RPC backend.
//!
//! Talks to a node (anvil, hardhat, geth with unlocked accounts) through an
//! alloy [`DynProvider`]:
//!
//! - [`RpcRegistry`] exposes the node-managed accounts as a single relay
//!   connector. A node has no push channel for wallet events, so
//!   [`RpcWallet`] polls accounts and chain id and turns changes into
//!   [`ProviderEvent`]s.
//! - [`RpcRaffle`] implements [`RaffleGateway`] with `sol!` bindings.
//!
//! ```rust,ignore
//! let registry = RpcRegistry::connect_http("http://localhost:8545").await?;
//! let raffle = RpcRaffle::new(registry.provider().clone(), DEFAULT_RAFFLE_ADDRESS.parse()?);
//! ```

use std::sync::Arc;

use alloy::network::{Ethereum, ReceiptResponse};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use alloy::transports::TransportError;
use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::connector::{ConnectorCategory, ConnectorDescriptor};
use crate::error::{LotteryError, LotteryResult, ProviderError, ProviderResult};
use crate::gateway::{ConnectorRegistry, InjectedFlags, ProviderEvent, WalletProvider};
use crate::lottery::{EntryPlan, RaffleGateway, RaffleSnapshot, RaffleState};
use crate::retry::RetryPolicy;

sol! {
    #[sol(rpc)]
    interface IRaffle {
        function enterRaffle() external payable;
        function getEntranceFee() external view returns (uint256);
        function getNumberOfPlayers() external view returns (uint256);
        function getRecentWinner() external view returns (address);
        function getRaffleState() external view returns (uint8);
    }
}

/// Id of the node-accounts connector.
pub const NODE_CONNECTOR_ID: &str = "nodeAccounts";

/// Default interval between account and chain polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const EVENT_CAPACITY: usize = 16;

fn provider_error(err: &TransportError) -> ProviderError {
    err.as_error_resp().map_or_else(
        || ProviderError::other(err.to_string()),
        |payload| ProviderError::new(Some(payload.code), payload.message.to_string()),
    )
}

/// Connect to `rpc_url` and erase the provider type.
pub async fn connect_provider(rpc_url: &str) -> ProviderResult<DynProvider<Ethereum>> {
    let provider = ProviderBuilder::new()
        .connect(rpc_url)
        .await
        .map_err(|e| ProviderError::other(format!("failed to connect to '{rpc_url}': {e}")))?
        .erased();
    Ok(provider)
}

// ============================================================================
// Wallet
// ============================================================================

/// Node-managed accounts seen as a wallet.
pub struct RpcWallet {
    provider: DynProvider<Ethereum>,
    events: broadcast::Sender<ProviderEvent>,
    watcher: JoinHandle<()>,
}

impl std::fmt::Debug for RpcWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcWallet")
            .field("listeners", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl RpcWallet {
    /// Start watching the node behind `provider`.
    ///
    /// The first poll establishes the baseline; only later changes are
    /// pushed as events.
    #[must_use]
    pub fn spawn(provider: DynProvider<Ethereum>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let watcher = tokio::spawn(watch(provider.clone(), events.clone(), poll_interval));
        Self {
            provider,
            events,
            watcher,
        }
    }
}

impl Drop for RpcWallet {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn watch(
    provider: DynProvider<Ethereum>,
    events: broadcast::Sender<ProviderEvent>,
    poll_interval: Duration,
) {
    let mut last_accounts: Option<Vec<Address>> = None;
    let mut last_chain: Option<u64> = None;

    loop {
        match provider.get_accounts().await {
            Ok(accounts) => {
                if last_accounts.as_ref().is_some_and(|last| *last != accounts) {
                    debug!(count = accounts.len(), "node accounts changed");
                    let _ = events.send(ProviderEvent::AccountsChanged(accounts.clone()));
                }
                last_accounts = Some(accounts);
            }
            Err(e) => warn!(error = %e, "failed to poll node accounts"),
        }

        match provider.get_chain_id().await {
            Ok(chain_id) => {
                if last_chain.is_some_and(|last| last != chain_id) {
                    debug!(chain_id, "node chain changed");
                    let _ = events.send(ProviderEvent::ChainChanged(chain_id));
                }
                last_chain = Some(chain_id);
            }
            Err(e) => warn!(error = %e, "failed to poll node chain id"),
        }

        sleep(poll_interval).await;
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        self.provider
            .get_accounts()
            .await
            .map_err(|e| provider_error(&e))
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| provider_error(&e))
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry with one connector: the node's own accounts.
pub struct RpcRegistry {
    provider: DynProvider<Ethereum>,
    connector: ConnectorDescriptor,
    poll_interval: Duration,
    connected: Mutex<bool>,
}

impl std::fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRegistry")
            .field("connector", &self.connector)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl RpcRegistry {
    /// Create a registry over `provider`.
    #[must_use]
    pub fn new(provider: DynProvider<Ethereum>) -> Self {
        Self {
            provider,
            connector: ConnectorDescriptor::new(NODE_CONNECTOR_ID, "Node Accounts", ConnectorCategory::Relay),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connected: Mutex::new(false),
        }
    }

    /// Connect to the node at `rpc_url`.
    pub async fn connect_http(rpc_url: &str) -> ProviderResult<Self> {
        let provider = connect_provider(rpc_url).await?;
        info!(rpc_url, "node registry initialized");
        Ok(Self::new(provider))
    }

    /// Set the account and chain poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Underlying provider.
    #[must_use]
    pub const fn provider(&self) -> &DynProvider<Ethereum> {
        &self.provider
    }
}

#[async_trait]
impl ConnectorRegistry for RpcRegistry {
    fn connectors(&self) -> Vec<ConnectorDescriptor> {
        vec![self.connector.clone()]
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn injected(&self) -> InjectedFlags {
        InjectedFlags::default()
    }

    async fn connect(&self, connector: &ConnectorDescriptor) -> ProviderResult<Arc<dyn WalletProvider>> {
        if connector.id() != self.connector.id() {
            return Err(ProviderError::not_found(connector.name()));
        }

        let mut connected = self.connected.lock().await;
        if *connected {
            return Err(ProviderError::already_connected());
        }

        // fail early when the node is unreachable
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| provider_error(&e))?;

        *connected = true;
        debug!(connector = %connector.id(), "node accounts connected");
        Ok(Arc::new(RpcWallet::spawn(self.provider.clone(), self.poll_interval)))
    }

    async fn disconnect(&self, connector: &ConnectorDescriptor) -> ProviderResult<()> {
        *self.connected.lock().await = false;
        debug!(connector = %connector.id(), "node accounts disconnected");
        Ok(())
    }
}

// ============================================================================
// Raffle contract
// ============================================================================

/// Raffle contract reached over JSON-RPC.
pub struct RpcRaffle {
    contract: IRaffle::IRaffleInstance<DynProvider<Ethereum>>,
    receipt_policy: RetryPolicy,
}

impl std::fmt::Debug for RpcRaffle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRaffle")
            .field("address", self.contract.address())
            .finish_non_exhaustive()
    }
}

impl RpcRaffle {
    /// Bind the raffle at `address`.
    #[must_use]
    pub fn new(provider: DynProvider<Ethereum>, address: Address) -> Self {
        Self {
            contract: IRaffle::new(address, provider),
            receipt_policy: RetryPolicy::fixed(Duration::from_secs(1), 120)
                .with_backoff(1.5, Duration::from_secs(12)),
        }
    }

    /// Contract address.
    #[must_use]
    pub fn address(&self) -> Address {
        *self.contract.address()
    }
}

fn read_error(call: &str, err: &alloy::contract::Error) -> LotteryError {
    LotteryError::Read(format!("{call}: {err}"))
}

#[async_trait]
impl RaffleGateway for RpcRaffle {
    async fn snapshot(&self) -> LotteryResult<RaffleSnapshot> {
        let entrance_fee = self
            .contract
            .getEntranceFee()
            .call()
            .await
            .map_err(|e| read_error("getEntranceFee", &e))?;
        let players = self
            .contract
            .getNumberOfPlayers()
            .call()
            .await
            .map_err(|e| read_error("getNumberOfPlayers", &e))?;
        let recent_winner = self
            .contract
            .getRecentWinner()
            .call()
            .await
            .map_err(|e| read_error("getRecentWinner", &e))?;
        let state = self
            .contract
            .getRaffleState()
            .call()
            .await
            .map_err(|e| read_error("getRaffleState", &e))?;

        Ok(RaffleSnapshot {
            entrance_fee,
            players,
            recent_winner,
            state: RaffleState::from_raw(state),
        })
    }

    async fn balance(&self, account: Address) -> LotteryResult<U256> {
        self.contract
            .provider()
            .get_balance(account)
            .await
            .map_err(|e| LotteryError::Read(format!("failed to get balance: {e}")))
    }

    async fn submit_entry(&self, plan: &EntryPlan) -> LotteryResult<TxHash> {
        let pending = self
            .contract
            .enterRaffle()
            .from(plan.player)
            .value(plan.value)
            .send()
            .await
            .map_err(|e| LotteryError::Transaction(e.to_string()))?;
        let hash = *pending.tx_hash();
        info!(player = %plan.player, tx = %hash, "raffle entry submitted");
        Ok(hash)
    }

    async fn confirm(&self, hash: TxHash) -> LotteryResult<()> {
        let provider = self.contract.provider();
        let attempts = self.receipt_policy.max_attempts.max(1);

        for attempt in 0..attempts {
            let receipt = provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| LotteryError::Transaction(format!("receipt failed: {e}")))?;

            if let Some(receipt) = receipt {
                if receipt.status() {
                    debug!(tx = %hash, attempt, "raffle entry confirmed");
                    return Ok(());
                }
                return Err(LotteryError::Transaction(format!("transaction {hash} reverted")));
            }
            sleep(self.receipt_policy.delay_for_attempt(attempt)).await;
        }

        Err(LotteryError::Transaction(format!(
            "transaction {hash} not mined after {attempts} polls"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    #[test]
    fn test_selectors() {
        assert_eq!(IRaffle::enterRaffleCall::SIGNATURE, "enterRaffle()");
        assert_eq!(IRaffle::getRaffleStateCall::SIGNATURE, "getRaffleState()");
        assert_eq!(IRaffle::getEntranceFeeCall::SELECTOR.len(), 4);
    }

    fn offline_registry() -> RpcRegistry {
        let url = url::Url::parse("http://127.0.0.1:1").unwrap();
        RpcRegistry::new(ProviderBuilder::new().connect_http(url).erased())
    }

    #[tokio::test]
    async fn test_registry_lists_node_connector() {
        let registry = offline_registry();
        let connectors = registry.connectors();
        assert_eq!(connectors.len(), 1);
        assert_eq!(connectors[0].id(), NODE_CONNECTOR_ID);
        assert_eq!(connectors[0].category(), ConnectorCategory::Relay);
        assert!(registry.is_ready());

        let stranger = ConnectorDescriptor::new("metaMaskSDK", "MetaMask", ConnectorCategory::Injected);
        let err = registry.connect(&stranger).await.err().unwrap();
        assert_eq!(err.kind(), crate::error::ProviderErrorKind::ProviderNotFound);
    }
}
