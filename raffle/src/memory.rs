//! In-memory wallet backend.
//!
//! [`MemoryRegistry`] and [`MemoryWallet`] behave like a page with wallet
//! extensions installed, without a browser: accounts and chain are plain
//! values, events are pushed with [`MemoryWallet::emit`], and the registry
//! can be scripted to fail, stall or reject concurrent connections.
//! [`MemoryRaffle`] stands in for the raffle contract. The CLI uses both
//! for `--simulate`; the controller tests use them everywhere.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use alloy::primitives::{Address, TxHash, U256, keccak256};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::{Duration, sleep};
use tracing::debug;

use crate::connector::{ConnectorCategory, ConnectorDescriptor};
use crate::error::{LotteryError, LotteryResult, ProviderError, ProviderResult};
use crate::gateway::{ConnectorRegistry, InjectedFlags, ProviderEvent, WalletProvider};
use crate::lottery::{EntryPlan, RaffleGateway, RaffleSnapshot, RaffleState};

/// Capacity of each wallet's event channel.
const EVENT_CAPACITY: usize = 16;

/// Sepolia, the chain simulated wallets start on.
const DEMO_CHAIN_ID: u64 = 11_155_111;

/// A wallet whose state lives in memory.
#[derive(Debug)]
pub struct MemoryWallet {
    accounts: RwLock<Vec<Address>>,
    chain_id: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
}

impl MemoryWallet {
    /// Create a wallet exposing `accounts` on `chain_id`.
    #[must_use]
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            accounts: RwLock::new(accounts),
            chain_id: AtomicU64::new(chain_id),
            events,
        }
    }

    /// Apply `event` to the wallet state and push it to listeners.
    pub async fn emit(&self, event: ProviderEvent) {
        match &event {
            ProviderEvent::AccountsChanged(accounts) => {
                accounts.clone_into(&mut *self.accounts.write().await);
            }
            ProviderEvent::ChainChanged(chain_id) => {
                self.chain_id.store(*chain_id, Ordering::SeqCst);
            }
            ProviderEvent::Disconnect => self.accounts.write().await.clear(),
        }
        let delivered = self.events.send(event).unwrap_or(0);
        debug!(delivered, "memory wallet emitted event");
    }

    /// Number of live event subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl WalletProvider for MemoryWallet {
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        Ok(self.accounts.read().await.clone())
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// Builder for [`MemoryRegistry`].
#[derive(Debug)]
pub struct MemoryRegistryBuilder {
    entries: Vec<(ConnectorDescriptor, Arc<MemoryWallet>)>,
    injected: InjectedFlags,
    ready: bool,
    exclusive: bool,
    connect_delay: Duration,
    disconnect_delay: Option<Duration>,
}

impl Default for MemoryRegistryBuilder {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            injected: InjectedFlags::default(),
            ready: true,
            exclusive: false,
            connect_delay: Duration::ZERO,
            disconnect_delay: Some(Duration::ZERO),
        }
    }
}

impl MemoryRegistryBuilder {
    /// Register `connector` backed by `wallet`.
    #[must_use]
    pub fn wallet(mut self, connector: ConnectorDescriptor, wallet: Arc<MemoryWallet>) -> Self {
        self.entries.push((connector, wallet));
        self
    }

    /// Set the injected provider flags.
    #[must_use]
    pub const fn injected(mut self, flags: InjectedFlags) -> Self {
        self.injected = flags;
        self
    }

    /// Set whether the registry starts out initialized.
    #[must_use]
    pub const fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Reject a connect while any connector is connected.
    #[must_use]
    pub const fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Delay every connect by `delay`.
    #[must_use]
    pub const fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Delay every disconnect by `delay`.
    #[must_use]
    pub const fn disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = Some(delay);
        self
    }

    /// Make every disconnect hang forever.
    #[must_use]
    pub const fn hanging_disconnect(mut self) -> Self {
        self.disconnect_delay = None;
        self
    }

    /// Build the registry.
    #[must_use]
    pub fn build(self) -> MemoryRegistry {
        MemoryRegistry {
            entries: StdRwLock::new(self.entries),
            injected: self.injected,
            ready: AtomicBool::new(self.ready),
            exclusive: self.exclusive,
            connect_delay: self.connect_delay,
            disconnect_delay: self.disconnect_delay,
            connected: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }
}

/// Connector registry over [`MemoryWallet`]s.
#[derive(Debug)]
pub struct MemoryRegistry {
    entries: StdRwLock<Vec<(ConnectorDescriptor, Arc<MemoryWallet>)>>,
    injected: InjectedFlags,
    ready: AtomicBool,
    exclusive: bool,
    connect_delay: Duration,
    disconnect_delay: Option<Duration>,
    connected: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MemoryRegistry {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> MemoryRegistryBuilder {
        MemoryRegistryBuilder::default()
    }

    /// A page with MetaMask installed plus the usual connector set.
    #[must_use]
    pub fn demo() -> Self {
        let wallet = |byte: u8| Arc::new(MemoryWallet::new(vec![Address::repeat_byte(byte)], DEMO_CHAIN_ID));
        Self::builder()
            .wallet(
                ConnectorDescriptor::new("metaMaskSDK", "MetaMask", ConnectorCategory::Injected),
                wallet(0x4d),
            )
            .wallet(
                ConnectorDescriptor::new("coinbaseWalletSDK", "Coinbase Wallet", ConnectorCategory::DeepLink),
                wallet(0xcb),
            )
            .wallet(
                ConnectorDescriptor::new("walletConnect", "WalletConnect", ConnectorCategory::Relay),
                wallet(0x3c),
            )
            .wallet(
                ConnectorDescriptor::new("injected", "Injected", ConnectorCategory::Injected),
                wallet(0x4d),
            )
            .injected(InjectedFlags {
                ethereum: true,
                metamask: true,
                ..InjectedFlags::default()
            })
            .exclusive(true)
            .build()
    }

    /// Flip the initialization flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make the next connect through `connector_id` fail with `error`.
    pub async fn fail_next(&self, connector_id: &str, error: ProviderError) {
        self.failures
            .lock()
            .await
            .entry(connector_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Pretend `connector_id` holds a connection already.
    pub async fn mark_connected(&self, connector_id: &str) {
        self.connected.lock().await.insert(connector_id.to_string());
    }

    /// Whether `connector_id` holds a connection.
    pub async fn is_connected(&self, connector_id: &str) -> bool {
        self.connected.lock().await.contains(connector_id)
    }

    /// Remove a connector from the list.
    pub fn remove(&self, connector_id: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(c, _)| c.id() != connector_id);
    }

    /// Wallet behind `connector_id`.
    #[must_use]
    pub fn wallet(&self, connector_id: &str) -> Option<Arc<MemoryWallet>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(c, _)| c.id() == connector_id)
            .map(|(_, w)| Arc::clone(w))
    }

    /// Number of connect calls received.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of disconnect calls received.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorRegistry for MemoryRegistry {
    fn connectors(&self) -> Vec<ConnectorDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn injected(&self) -> InjectedFlags {
        self.injected
    }

    async fn connect(
        &self,
        connector: &ConnectorDescriptor,
    ) -> ProviderResult<Arc<dyn WalletProvider>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            sleep(self.connect_delay).await;
        }

        let wallet = self
            .wallet(connector.id())
            .ok_or_else(|| ProviderError::not_found(connector.name()))?;

        if let Some(error) = self
            .failures
            .lock()
            .await
            .get_mut(connector.id())
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let mut connected = self.connected.lock().await;
        if connected.contains(connector.id()) || (self.exclusive && !connected.is_empty()) {
            return Err(ProviderError::already_connected());
        }
        connected.insert(connector.id().to_string());
        debug!(connector = %connector.id(), "memory registry connected");

        Ok(wallet)
    }

    async fn disconnect(&self, connector: &ConnectorDescriptor) -> ProviderResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        match self.disconnect_delay {
            None => std::future::pending::<()>().await,
            Some(delay) if !delay.is_zero() => sleep(delay).await,
            Some(_) => {}
        }

        self.connected.lock().await.remove(connector.id());
        debug!(connector = %connector.id(), "memory registry disconnected");
        Ok(())
    }
}

/// Raffle contract simulated in memory.
///
/// Every entry takes one player slot and its cost is deducted from the
/// player's funded balance.
#[derive(Debug)]
pub struct MemoryRaffle {
    snapshot: RwLock<RaffleSnapshot>,
    balances: RwLock<HashMap<Address, U256>>,
    mined: RwLock<HashSet<TxHash>>,
    reject_next: Mutex<Option<String>>,
    nonce: AtomicU64,
}

impl MemoryRaffle {
    /// Create a raffle starting from `snapshot`.
    #[must_use]
    pub fn new(snapshot: RaffleSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            balances: RwLock::new(HashMap::new()),
            mined: RwLock::new(HashSet::new()),
            reject_next: Mutex::new(None),
            nonce: AtomicU64::new(0),
        }
    }

    /// Open raffle with a 0.01 ETH fee and no players.
    #[must_use]
    pub fn demo() -> Self {
        Self::new(RaffleSnapshot {
            entrance_fee: U256::from(10_000_000_000_000_000_u64),
            players: U256::ZERO,
            recent_winner: Address::ZERO,
            state: RaffleState::Open,
        })
    }

    /// Credit `amount` wei to `account`.
    pub async fn fund(&self, account: Address, amount: U256) {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(account).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Move the contract to `state`.
    pub async fn set_state(&self, state: RaffleState) {
        self.snapshot.write().await.state = state;
    }

    /// Close the round: record `winner` and reset the players.
    pub async fn draw(&self, winner: Address) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.recent_winner = winner;
        snapshot.players = U256::ZERO;
        snapshot.state = RaffleState::Open;
    }

    /// Make the next submission fail with `message`, as a wallet refusing
    /// to sign would.
    pub async fn reject_next(&self, message: impl Into<String>) {
        *self.reject_next.lock().await = Some(message.into());
    }
}

#[async_trait]
impl RaffleGateway for MemoryRaffle {
    async fn snapshot(&self) -> LotteryResult<RaffleSnapshot> {
        Ok(*self.snapshot.read().await)
    }

    async fn balance(&self, account: Address) -> LotteryResult<U256> {
        Ok(self
            .balances
            .read()
            .await
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn submit_entry(&self, plan: &EntryPlan) -> LotteryResult<TxHash> {
        if let Some(message) = self.reject_next.lock().await.take() {
            return Err(LotteryError::Transaction(message));
        }

        let mut snapshot = self.snapshot.write().await;
        if !snapshot.state.is_open() {
            return Err(LotteryError::Transaction("execution reverted: Raffle__NotOpen".into()));
        }

        let mut balances = self.balances.write().await;
        let balance = balances.entry(plan.player).or_default();
        if *balance < plan.value {
            return Err(LotteryError::Transaction("insufficient funds for transfer".into()));
        }
        *balance -= plan.value;
        snapshot.players += U256::from(plan.entries);

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut preimage = plan.player.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let hash = keccak256(preimage);
        self.mined.write().await.insert(hash);
        debug!(player = %plan.player, entries = plan.entries, tx = %hash, "memory raffle entered");
        Ok(hash)
    }

    async fn confirm(&self, hash: TxHash) -> LotteryResult<()> {
        if self.mined.read().await.contains(&hash) {
            Ok(())
        } else {
            Err(LotteryError::Transaction(format!("transaction {hash} not found")))
        }
    }
}
