//! The wallet connection controller.
//!
//! [`WalletController`] owns the header [`Snapshot`] and drives every
//! transition of the connection state machine:
//!
//! ```text
//! disconnected ──connect──▶ connecting ──ok──▶ connected ──disconnect──▶ disconnecting
//!      ▲                        │                                            │
//!      └────────── failure ─────┘◀───────────── settle / fallback ───────────┘
//! ```
//!
//! The snapshot lives in a `watch` channel: views call
//! [`subscribe`](WalletController::subscribe) and re-render on change, and
//! the controller mutates it only through compare-and-set closures, which is
//! what keeps two connect attempts from interleaving.
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = WalletController::builder(Arc::new(MemoryRegistry::demo()))
//!     .cache(Arc::new(FileCache::default_path()))
//!     .build();
//!
//! if controller.restore().await.is_none() {
//!     let metamask = controller.list_connectors().remove(0);
//!     controller.connect(&metamask).await?;
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CachedConnection, ConnectionCache};
use crate::config::ControllerConfig;
use crate::connector::{ConnectorDescriptor, dedupe};
use crate::deeplink::{ConnectRoute, Platform, route};
use crate::error::{ConnectError, DisconnectError};
use crate::gateway::{ConnectorRegistry, ProviderEvent, WalletProvider};
use crate::retry::wait_until;
use crate::state::{ActiveSession, ConnectionStatus, Overlay, PendingError, Snapshot, WalletState};
use crate::util::timestamp_ms;

/// Provider subscription held while connected; aborting the task drops
/// the receiver, which unsubscribes.
struct EventListener {
    task: JoinHandle<()>,
}

impl EventListener {
    fn spawn(inner: Weak<Inner>, mut events: broadcast::Receiver<ProviderEvent>) -> Self {
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = inner.upgrade() else { break };
                        let controller = WalletController { inner };
                        debug!(?event, "provider event");
                        // handled on its own task so a forced disconnect can
                        // abort this listener without cancelling itself
                        tokio::spawn(async move { controller.handle_event(event).await });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "provider events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Live connection resources.
struct Link {
    provider: Arc<dyn WalletProvider>,
    _listener: EventListener,
}

struct Inner {
    registry: Arc<dyn ConnectorRegistry>,
    cache: Option<Arc<dyn ConnectionCache>>,
    config: ControllerConfig,
    state: watch::Sender<Snapshot>,
    link: Mutex<Option<Link>>,
    attempts: AtomicU64,
    /// Attempt whose registry calls are still running, 0 when none. Outlives
    /// the `connecting` state when an attempt is cancelled.
    outstanding: AtomicU64,
    error_seq: AtomicU64,
}

/// Holds [`Inner::outstanding`] for one attempt until the attempt returns.
struct AttemptGuard<'a> {
    slot: &'a AtomicU64,
    attempt: u64,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.attempt, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Builder for [`WalletController`].
pub struct WalletControllerBuilder {
    registry: Arc<dyn ConnectorRegistry>,
    cache: Option<Arc<dyn ConnectionCache>>,
    config: ControllerConfig,
}

impl std::fmt::Debug for WalletControllerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletControllerBuilder")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl WalletControllerBuilder {
    /// Use `config` for timers and bounds.
    #[must_use]
    pub const fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Remember successful connections in `cache`.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ConnectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the controller.
    #[must_use]
    pub fn build(self) -> WalletController {
        let (state, _) = watch::channel(Snapshot::default());
        WalletController {
            inner: Arc::new(Inner {
                registry: self.registry,
                cache: self.cache,
                config: self.config,
                state,
                link: Mutex::new(None),
                attempts: AtomicU64::new(0),
                outstanding: AtomicU64::new(0),
                error_seq: AtomicU64::new(0),
            }),
        }
    }
}

/// Coordinates wallet connection state for the header.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct WalletController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WalletController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletController")
            .field("status", &self.status())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl WalletController {
    /// Create a controller with default configuration and no cache.
    #[must_use]
    pub fn new(registry: Arc<dyn ConnectorRegistry>) -> Self {
        Self::builder(registry).build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder(registry: Arc<dyn ConnectorRegistry>) -> WalletControllerBuilder {
        WalletControllerBuilder {
            registry,
            cache: None,
            config: ControllerConfig::default(),
        }
    }

    /// Controller configuration.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Current snapshot, with an expired error notice already removed.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = self.inner.state.borrow().clone();
        snapshot.expire_error(Instant::now());
        snapshot
    }

    /// Receive every snapshot change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.state.subscribe()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.borrow().status()
    }

    /// Active session, if connected.
    #[must_use]
    pub fn session(&self) -> Option<ActiveSession> {
        self.inner.state.borrow().session().cloned()
    }

    /// Provider of the active session, if connected.
    #[must_use]
    pub fn provider(&self) -> Option<Arc<dyn WalletProvider>> {
        self.link()
            .as_ref()
            .map(|link| Arc::clone(&link.provider))
    }

    /// Whether a provider event subscription is held.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.link().is_some()
    }

    /// Connectors to offer in the wallet picker, deduplicated.
    #[must_use]
    pub fn list_connectors(&self) -> Vec<ConnectorDescriptor> {
        let registry = &self.inner.registry;
        dedupe(&registry.connectors(), registry.injected())
    }

    /// How to reach `connector` on `platform` from the page at `page`.
    #[must_use]
    pub fn route(&self, connector: &ConnectorDescriptor, platform: Platform, page: &Url) -> ConnectRoute {
        let installed = self.inner.registry.injected().is_installed(connector.brand());
        route(connector.brand(), platform, installed, page)
    }

    // ------------------------------------------------------------------
    // Overlay toggles
    // ------------------------------------------------------------------

    /// Open the wallet picker; only possible while disconnected.
    pub fn open_wallet_picker(&self) -> bool {
        self.inner.state.send_if_modified(|s| {
            s.status() == ConnectionStatus::Disconnected && s.open(Overlay::WalletPicker)
        })
    }

    /// Toggle the wallet picker.
    pub fn toggle_wallet_picker(&self) -> bool {
        if self.inner.state.borrow().overlay == Overlay::WalletPicker {
            self.hide_overlay()
        } else {
            self.open_wallet_picker()
        }
    }

    /// Show the account popover; only possible while connected.
    pub fn show_account_popover(&self) -> bool {
        self.inner
            .state
            .send_if_modified(|s| s.open(Overlay::AccountPopover))
    }

    /// Close any open overlay.
    pub fn hide_overlay(&self) -> bool {
        self.inner.state.send_if_modified(Snapshot::close)
    }

    /// Dismiss the error notice.
    pub fn dismiss_error(&self) -> bool {
        self.inner.state.send_if_modified(|s| s.error.take().is_some())
    }

    // ------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------

    /// Connect through `connector`.
    ///
    /// Waits (bounded) for the registry to initialize, disconnects a session
    /// held by a different wallet first, and retries once when the connector
    /// claims to be connected already. Failures are published as a pending
    /// error that expires after [`ControllerConfig::error_ttl`].
    pub async fn connect(&self, connector: &ConnectorDescriptor) -> Result<ActiveSession, ConnectError> {
        self.connect_with(connector, true).await
    }

    async fn connect_with(
        &self,
        connector: &ConnectorDescriptor,
        surface_errors: bool,
    ) -> Result<ActiveSession, ConnectError> {
        let result = self.try_connect(connector).await;
        if let Err(ref err) = result {
            warn!(connector = %connector.id(), error = %err, "wallet connection failed");
            let user_visible = !matches!(err, ConnectError::Busy(_) | ConnectError::Cancelled);
            if surface_errors && user_visible {
                self.raise_error(err);
            }
        }
        result
    }

    async fn try_connect(&self, requested: &ConnectorDescriptor) -> Result<ActiveSession, ConnectError> {
        let status = self.status();
        if matches!(
            status,
            ConnectionStatus::Connecting | ConnectionStatus::Disconnecting
        ) {
            return Err(ConnectError::Busy(status));
        }
        self.inner.state.send_if_modified(|s| s.error.take().is_some());

        self.wait_ready().await?;

        if let Some(session) = self.session() {
            if session.connector.same_wallet(requested) {
                debug!(connector = %requested.id(), "already connected with this wallet");
                return Ok(session);
            }
            info!(
                from = %session.connector.id(),
                to = %requested.id(),
                "switching wallets, disconnecting current session first"
            );
            self.disconnect()
                .await
                .map_err(|_| ConnectError::Busy(self.status()))?;
            wait_until(&self.inner.config.disconnect_wait_policy(), || {
                self.status() == ConnectionStatus::Disconnected
            })
            .await
            .map_err(|_| ConnectError::Busy(self.status()))?;
        }

        self.wait_cancelled_attempt().await?;
        let connector = self.fresh_connector(requested)?;
        let guard = self.claim(&connector)?;
        let attempt = guard.attempt;
        info!(connector = %connector.id(), attempt, "connecting wallet");

        let result = match self.establish(&connector).await {
            Ok((provider, session)) => self.commit(attempt, provider, session).await,
            Err(err) => {
                self.abandon(attempt);
                Err(err)
            }
        };
        drop(guard);
        result
    }

    /// Wait (bounded) for a cancelled attempt's registry calls to return.
    async fn wait_cancelled_attempt(&self) -> Result<(), ConnectError> {
        let outstanding = &self.inner.outstanding;
        if outstanding.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }

        debug!("waiting for a cancelled connection attempt to finish");
        wait_until(&self.inner.config.disconnect_wait_policy(), || {
            outstanding.load(Ordering::SeqCst) == 0
        })
        .await
        .map(|_| ())
        .map_err(|_| ConnectError::Busy(ConnectionStatus::Connecting))
    }

    async fn wait_ready(&self) -> Result<(), ConnectError> {
        let registry = &self.inner.registry;
        if registry.is_ready() {
            return Ok(());
        }

        debug!("waiting for wallet connectors to initialize");
        wait_until(&self.inner.config.init_policy(), || registry.is_ready())
            .await
            .map(|attempts| debug!(attempts, "wallet connectors ready"))
            .map_err(|e| ConnectError::NotReady {
                attempts: e.attempts,
            })
    }

    /// Look the connector up again; registries rebuild instances.
    fn fresh_connector(&self, requested: &ConnectorDescriptor) -> Result<ConnectorDescriptor, ConnectError> {
        let connectors = self.inner.registry.connectors();
        connectors
            .iter()
            .find(|c| c.id() == requested.id())
            .or_else(|| connectors.iter().find(|c| c.same_wallet(requested)))
            .cloned()
            .ok_or_else(|| ConnectError::ConnectorUnavailable(requested.display_name().to_string()))
    }

    /// Move `disconnected → connecting`; the only entry into an attempt.
    ///
    /// Refused while an earlier attempt still holds the registry, even when
    /// that attempt was already cancelled.
    fn claim(&self, connector: &ConnectorDescriptor) -> Result<AttemptGuard<'_>, ConnectError> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .inner
            .outstanding
            .compare_exchange(0, attempt, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ConnectError::Busy(ConnectionStatus::Connecting));
        }
        let guard = AttemptGuard {
            slot: &self.inner.outstanding,
            attempt,
        };

        let mut busy = None;
        self.inner.state.send_if_modified(|s| {
            let status = s.status();
            if status != ConnectionStatus::Disconnected {
                busy = Some(status);
                return false;
            }
            s.set_wallet(WalletState::Connecting {
                connector: connector.clone(),
                attempt,
            });
            true
        });
        busy.map_or(Ok(guard), |status| Err(ConnectError::Busy(status)))
    }

    async fn establish(
        &self,
        connector: &ConnectorDescriptor,
    ) -> Result<(Arc<dyn WalletProvider>, ActiveSession), ConnectError> {
        let registry = &self.inner.registry;
        let provider = match registry.connect(connector).await {
            Ok(provider) => provider,
            Err(err) if err.is_retryable() => {
                warn!(
                    connector = %connector.id(),
                    error = %err,
                    "connector reports an existing connection, resetting and retrying once"
                );
                self.release(connector).await;
                sleep(self.inner.config.retry_settle()).await;
                registry.connect(connector).await?
            }
            Err(err) => return Err(err.into()),
        };

        match Self::handshake(provider.as_ref(), connector).await {
            Ok(session) => Ok((provider, session)),
            Err(err) => {
                self.release(connector).await;
                Err(err)
            }
        }
    }

    async fn handshake(
        provider: &dyn WalletProvider,
        connector: &ConnectorDescriptor,
    ) -> Result<ActiveSession, ConnectError> {
        let accounts = provider.request_accounts().await?;
        let address = *accounts.first().ok_or(ConnectError::NoAccounts)?;
        let chain_id = provider.chain_id().await?;
        Ok(ActiveSession {
            connector: connector.clone(),
            address,
            chain_id,
            connected_at: timestamp_ms(),
        })
    }

    /// Move `connecting → connected` unless the attempt was cancelled.
    async fn commit(
        &self,
        attempt: u64,
        provider: Arc<dyn WalletProvider>,
        session: ActiveSession,
    ) -> Result<ActiveSession, ConnectError> {
        let events = provider.events();
        let committed = {
            // held across the transition so a disconnect cannot run between
            // entering `connected` and installing the link
            let mut link = self.link();
            let committed = self.inner.state.send_if_modified(|s| match s.wallet {
                WalletState::Connecting { attempt: current, .. } if current == attempt => {
                    s.set_wallet(WalletState::Connected(session.clone()));
                    s.error = None;
                    true
                }
                _ => false,
            });
            if committed {
                *link = Some(Link {
                    provider,
                    _listener: EventListener::spawn(Arc::downgrade(&self.inner), events),
                });
            }
            committed
        };

        if !committed {
            // still the outstanding attempt, so the connector is ours to release
            info!(connector = %session.connector.id(), attempt, "connection attempt cancelled");
            self.release(&session.connector).await;
            return Err(ConnectError::Cancelled);
        }

        info!(
            connector = %session.connector.id(),
            address = %session.address,
            chain_id = session.chain_id,
            "wallet connected"
        );
        self.remember(&session).await;
        Ok(session)
    }

    /// Move `connecting → disconnected` for a failed attempt.
    fn abandon(&self, attempt: u64) {
        self.inner.state.send_if_modified(|s| match s.wallet {
            WalletState::Connecting { attempt: current, .. } if current == attempt => {
                s.set_wallet(WalletState::Disconnected);
                true
            }
            _ => false,
        });
    }

    // ------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------

    /// Disconnect the active session.
    ///
    /// A no-op when already disconnected. Always ends in `disconnected`:
    /// the registry's disconnect is bounded by
    /// [`ControllerConfig::disconnect_fallback`] and its outcome ignored.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        enum Claim {
            Idle,
            InFlight,
            Pending,
            Claimed(ConnectorDescriptor),
        }

        let mut claim = Claim::Idle;
        self.inner.state.send_if_modified(|s| match &s.wallet {
            WalletState::Disconnected => false,
            WalletState::Connecting { .. } => {
                claim = Claim::InFlight;
                false
            }
            WalletState::Disconnecting { .. } => {
                claim = Claim::Pending;
                false
            }
            WalletState::Connected(session) => {
                let connector = session.connector.clone();
                s.set_wallet(WalletState::Disconnecting {
                    connector: connector.clone(),
                });
                s.error = None;
                claim = Claim::Claimed(connector);
                true
            }
        });

        match claim {
            Claim::Idle => {
                debug!("already disconnected");
                Ok(())
            }
            Claim::InFlight => Err(DisconnectError::ConnectInFlight),
            Claim::Pending => {
                let waited = wait_until(&self.inner.config.disconnect_wait_policy(), || {
                    self.status() == ConnectionStatus::Disconnected
                })
                .await;
                if let Err(e) = waited {
                    warn!(error = %e, "concurrent disconnect did not settle in time");
                }
                Ok(())
            }
            Claim::Claimed(connector) => {
                drop(self.link().take());
                info!(connector = %connector.id(), "disconnecting wallet");

                self.release(&connector).await;
                sleep(self.inner.config.settle_delay()).await;

                self.inner.state.send_modify(|s| s.set_wallet(WalletState::Disconnected));
                self.forget().await;
                info!(connector = %connector.id(), "wallet disconnected");
                Ok(())
            }
        }
    }

    /// Call the registry's disconnect, bounded by the fallback timeout.
    async fn release(&self, connector: &ConnectorDescriptor) {
        let fallback = self.inner.config.disconnect_fallback();
        match timeout(fallback, self.inner.registry.disconnect(connector)).await {
            Ok(Ok(())) => debug!(connector = %connector.id(), "connector released"),
            Ok(Err(e)) => {
                warn!(connector = %connector.id(), error = %e, "connector disconnect failed, continuing");
            }
            Err(_) => {
                warn!(connector = %connector.id(), ?fallback, "connector disconnect timed out, continuing");
            }
        }
    }

    // ------------------------------------------------------------------
    // Provider events
    // ------------------------------------------------------------------

    /// Apply an unsolicited provider event.
    ///
    /// An empty account list (or a provider disconnect) forces the
    /// controller to `disconnected` from any state; a chain change only
    /// updates the session.
    pub async fn handle_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.first() {
                None => self.force_disconnect("accounts cleared").await,
                Some(&address) => {
                    let changed = self.inner.state.send_if_modified(|s| match &mut s.wallet {
                        WalletState::Connected(session) if session.address != address => {
                            session.address = address;
                            true
                        }
                        _ => false,
                    });
                    if changed {
                        info!(%address, "active account changed");
                        if let Some(session) = self.session() {
                            self.remember(&session).await;
                        }
                    }
                }
            },
            ProviderEvent::ChainChanged(chain_id) => {
                let changed = self.inner.state.send_if_modified(|s| match &mut s.wallet {
                    WalletState::Connected(session) if session.chain_id != chain_id => {
                        session.chain_id = chain_id;
                        true
                    }
                    _ => false,
                });
                if changed {
                    info!(chain_id, "active chain changed");
                }
            }
            ProviderEvent::Disconnect => self.force_disconnect("provider disconnected").await,
        }
    }

    async fn force_disconnect(&self, reason: &str) {
        let mut cancelled = None;
        self.inner.state.send_if_modified(|s| {
            if let WalletState::Connecting { connector, attempt } = &s.wallet {
                cancelled = Some((connector.id().to_string(), *attempt));
                s.set_wallet(WalletState::Disconnected);
                return true;
            }
            false
        });

        if let Some((connector, attempt)) = cancelled {
            info!(%connector, attempt, reason, "cancelling connection attempt");
            return;
        }

        info!(reason, "forcing disconnect");
        if let Err(e) = self.disconnect().await {
            debug!(error = %e, "forced disconnect skipped");
        }
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    /// Reconnect the cached wallet without the pick step.
    ///
    /// Returns `None` when there is no usable cache entry, the reconnect
    /// failed, or the wallet now exposes a different account; none of these
    /// publishes an error notice.
    pub async fn restore(&self) -> Option<ActiveSession> {
        let cache = self.inner.cache.as_ref()?;
        let entry = match cache.load().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read cached connection");
                return None;
            }
        };

        if !entry.is_fresh_at(timestamp_ms(), self.inner.config.cache_freshness()) {
            debug!(connector = %entry.connector_id, "cached connection is stale");
            self.forget().await;
            return None;
        }

        let account = match entry.account() {
            Ok(account) => account,
            Err(e) => {
                warn!(error = %e, "discarding unreadable cached connection");
                self.forget().await;
                return None;
            }
        };

        let Some(connector) = self
            .list_connectors()
            .into_iter()
            .find(|c| c.id() == entry.connector_id)
        else {
            debug!(connector = %entry.connector_id, "cached connector is not offered anymore");
            return None;
        };

        match self.connect_with(&connector, false).await {
            Ok(session) if session.address != account => {
                info!(
                    connector = %connector.id(),
                    cached = %account,
                    exposed = %session.address,
                    "wallet exposes another account than the cached one, not restoring"
                );
                if let Err(e) = self.disconnect().await {
                    debug!(error = %e, "disconnect after account mismatch skipped");
                }
                self.forget().await;
                None
            }
            Ok(session) => {
                info!(connector = %connector.id(), "restored cached connection");
                Some(session)
            }
            Err(ConnectError::Busy(_)) => None,
            Err(e) => {
                debug!(error = %e, "cached connection could not be restored");
                self.forget().await;
                None
            }
        }
    }

    async fn remember(&self, session: &ActiveSession) {
        let Some(cache) = &self.inner.cache else {
            return;
        };
        let entry = CachedConnection::from_session(session, timestamp_ms());
        if let Err(e) = cache.save(&entry).await {
            warn!(error = %e, "failed to cache connection");
        }
    }

    async fn forget(&self) {
        let Some(cache) = &self.inner.cache else {
            return;
        };
        if let Err(e) = cache.clear().await {
            warn!(error = %e, "failed to clear cached connection");
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn link(&self) -> std::sync::MutexGuard<'_, Option<Link>> {
        self.inner.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `err` as the pending notice and schedule its removal.
    fn raise_error(&self, err: &ConnectError) {
        let seq = self.inner.error_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let ttl = self.inner.config.error_ttl();
        let notice = PendingError::new(err, ttl, seq);
        self.inner.state.send_modify(|s| s.error = Some(notice));

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            sleep(ttl).await;
            if let Some(inner) = inner.upgrade() {
                inner.state.send_if_modified(|s| {
                    if s.error.as_ref().is_some_and(|e| e.seq == seq) {
                        s.error = None;
                        return true;
                    }
                    false
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::connector::ConnectorCategory;
    use crate::error::{ProviderError, ProviderErrorKind};
    use crate::gateway::InjectedFlags;
    use crate::memory::{MemoryRegistry, MemoryWallet};
    use alloy::primitives::Address;
    use tokio::time::Duration;

    const METAMASK: &str = "metaMaskSDK";
    const WALLETCONNECT: &str = "walletConnect";

    fn metamask() -> ConnectorDescriptor {
        ConnectorDescriptor::new(METAMASK, "MetaMask", ConnectorCategory::Injected)
    }

    fn walletconnect() -> ConnectorDescriptor {
        ConnectorDescriptor::new(WALLETCONNECT, "WalletConnect", ConnectorCategory::Relay)
    }

    fn injected() -> ConnectorDescriptor {
        ConnectorDescriptor::new("injected", "Injected", ConnectorCategory::Injected)
    }

    fn wallet(byte: u8) -> Arc<MemoryWallet> {
        Arc::new(MemoryWallet::new(vec![Address::repeat_byte(byte)], 1))
    }

    fn registry() -> MemoryRegistry {
        MemoryRegistry::builder()
            .wallet(metamask(), wallet(0x4d))
            .wallet(walletconnect(), wallet(0x3c))
            .wallet(injected(), wallet(0x4d))
            .injected(InjectedFlags {
                ethereum: true,
                metamask: true,
                ..InjectedFlags::default()
            })
            .exclusive(true)
            .build()
    }

    fn controller(registry: &Arc<MemoryRegistry>) -> WalletController {
        WalletController::new(Arc::clone(registry) as Arc<dyn ConnectorRegistry>)
    }

    #[test]
    fn test_list_connectors_prefers_brand() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(1))
                .wallet(injected(), wallet(1))
                .injected(InjectedFlags {
                    ethereum: true,
                    metamask: true,
                    ..InjectedFlags::default()
                })
                .build(),
        );
        assert_eq!(controller(&registry).list_connectors(), vec![metamask()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_when_disconnected_is_noop() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);

        assert!(controller.disconnect().await.is_ok());
        assert!(controller.disconnect().await.is_ok());
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert_eq!(registry.disconnect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let registry = Arc::new(registry());
        let cache = Arc::new(MemoryCache::new());
        let controller = WalletController::builder(Arc::clone(&registry) as Arc<dyn ConnectorRegistry>)
            .cache(Arc::clone(&cache) as Arc<dyn ConnectionCache>)
            .build();

        assert!(controller.open_wallet_picker());
        let session = controller.connect(&metamask()).await.unwrap();

        assert_eq!(session.address, Address::repeat_byte(0x4d));
        assert_eq!(session.chain_id, 1);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status(), ConnectionStatus::Connected);
        assert_eq!(snapshot.overlay, Overlay::Hidden);
        assert!(snapshot.error.is_none());
        assert!(controller.is_listening());
        assert!(controller.provider().is_some());

        let cached = cache.load().await.unwrap().unwrap();
        assert_eq!(cached.connector_id, METAMASK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_is_rejected_while_in_flight() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .connect_delay(Duration::from_secs(1))
                .build(),
        );
        let controller = controller(&registry);

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect(&metamask()).await })
        };
        sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.status(), ConnectionStatus::Connecting);

        let second = controller.connect(&metamask()).await;
        assert_eq!(
            second.unwrap_err(),
            ConnectError::Busy(ConnectionStatus::Connecting)
        );
        // a rejected duplicate does not raise a notice
        assert!(controller.snapshot().error.is_none());

        assert!(first.await.unwrap().is_ok());
        assert_eq!(controller.status(), ConnectionStatus::Connected);
        assert_eq!(registry.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_error_expires() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        registry.fail_next(METAMASK, ProviderError::user_rejected()).await;

        controller.open_wallet_picker();
        let err = controller.connect(&metamask()).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::UserRejected));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status(), ConnectionStatus::Disconnected);
        assert_eq!(snapshot.overlay, Overlay::Hidden);
        let notice = snapshot.error.unwrap();
        assert_eq!(notice.message, "Connection cancelled by user");

        sleep(Duration::from_millis(4900)).await;
        assert!(controller.snapshot().error.is_some());

        sleep(Duration::from_millis(200)).await;
        assert!(controller.snapshot().error.is_none());
        assert!(controller.subscribe().borrow().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_error() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        registry.fail_next(METAMASK, ProviderError::request_pending()).await;

        assert!(controller.connect(&metamask()).await.is_err());
        assert_eq!(
            controller.snapshot().error.unwrap().message,
            "Connection request already pending"
        );
        assert!(controller.dismiss_error());
        assert!(controller.snapshot().error.is_none());
        assert!(!controller.dismiss_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_accounts_forces_disconnect() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        controller.connect(&metamask()).await.unwrap();
        assert!(controller.show_account_popover());

        let wallet = registry.wallet(METAMASK).unwrap();
        assert_eq!(wallet.listener_count(), 1);
        wallet.emit(ProviderEvent::AccountsChanged(Vec::new())).await;
        sleep(Duration::from_secs(3)).await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status(), ConnectionStatus::Disconnected);
        assert!(snapshot.session().is_none());
        assert_eq!(snapshot.overlay, Overlay::Hidden);
        assert!(!controller.is_listening());
        assert_eq!(wallet.listener_count(), 0);
        assert!(!registry.is_connected(METAMASK).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_accounts_cancels_connecting_attempt() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .connect_delay(Duration::from_secs(1))
                .build(),
        );
        let controller = controller(&registry);

        let attempt = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect(&metamask()).await })
        };
        sleep(Duration::from_millis(10)).await;
        controller
            .handle_event(ProviderEvent::AccountsChanged(Vec::new()))
            .await;
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);

        assert_eq!(attempt.await.unwrap().unwrap_err(), ConnectError::Cancelled);
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(controller.session().is_none());
        assert!(!controller.is_listening());
        assert!(!registry.is_connected(METAMASK).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_cancel_waits_for_stale_attempt() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .connect_delay(Duration::from_secs(1))
                .exclusive(true)
                .build(),
        );
        let controller = controller(&registry);

        let stale = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect(&metamask()).await })
        };
        sleep(Duration::from_millis(10)).await;
        controller
            .handle_event(ProviderEvent::AccountsChanged(Vec::new()))
            .await;
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);

        let session = controller.connect(&metamask()).await.unwrap();
        assert_eq!(stale.await.unwrap().unwrap_err(), ConnectError::Cancelled);

        assert_eq!(session.connector.id(), METAMASK);
        assert_eq!(controller.status(), ConnectionStatus::Connected);
        assert!(controller.is_listening());
        assert_eq!(registry.wallet(METAMASK).unwrap().listener_count(), 1);
        assert!(registry.is_connected(METAMASK).await);
        assert_eq!(registry.connect_calls(), 2);
        // only the cancelled attempt released the connector
        assert_eq!(registry.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_accounts_while_disconnecting() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .disconnect_delay(Duration::from_millis(300))
                .build(),
        );
        let controller = controller(&registry);
        controller.connect(&metamask()).await.unwrap();

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.disconnect().await })
        };
        sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.status(), ConnectionStatus::Disconnecting);

        controller
            .handle_event(ProviderEvent::AccountsChanged(Vec::new()))
            .await;
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(controller.session().is_none());
        assert!(first.await.unwrap().is_ok());
        assert_eq!(registry.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_accounts_while_disconnected() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);

        controller
            .handle_event(ProviderEvent::AccountsChanged(Vec::new()))
            .await;
        controller.handle_event(ProviderEvent::Disconnect).await;

        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(controller.session().is_none());
        assert_eq!(registry.disconnect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_change_keeps_status() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        controller.connect(&metamask()).await.unwrap();

        controller.handle_event(ProviderEvent::ChainChanged(137)).await;
        assert_eq!(controller.status(), ConnectionStatus::Connected);
        assert_eq!(controller.session().unwrap().chain_id, 137);

        let other = Address::repeat_byte(0x99);
        controller
            .handle_event(ProviderEvent::AccountsChanged(vec![other]))
            .await;
        assert_eq!(controller.session().unwrap().address, other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_wallets_disconnects_first() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);

        controller.connect(&walletconnect()).await.unwrap();
        controller.show_account_popover();

        let session = controller.connect(&metamask()).await.unwrap();

        assert_eq!(session.connector, metamask());
        assert_eq!(controller.status(), ConnectionStatus::Connected);
        assert_eq!(registry.disconnect_calls(), 1);
        assert_eq!(registry.connect_calls(), 2);
        assert!(!registry.is_connected(WALLETCONNECT).await);
        assert!(registry.is_connected(METAMASK).await);
        assert_eq!(controller.snapshot().overlay, Overlay::Hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_wallet_returns_existing_session() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        let first = controller.connect(&metamask()).await.unwrap();
        let second = controller.connect(&metamask()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_connected_is_retried_once() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        registry.mark_connected(METAMASK).await;

        let session = controller.connect(&metamask()).await.unwrap();
        assert_eq!(session.connector.id(), METAMASK);
        assert_eq!(registry.connect_calls(), 2);
        assert_eq!(registry.disconnect_calls(), 1);
        assert!(controller.snapshot().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_connected_retry_failure_surfaces() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        registry.fail_next(METAMASK, ProviderError::already_connected()).await;
        registry.fail_next(METAMASK, ProviderError::already_connected()).await;

        let err = controller.connect(&metamask()).await.unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::AlreadyConnected));
        assert_eq!(registry.connect_calls(), 2);
        assert_eq!(
            controller.snapshot().error.unwrap().message,
            "Please try again in a moment"
        );
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_registry_initialization() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .ready(false)
                .build(),
        );
        let controller = controller(&registry);

        {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                sleep(Duration::from_millis(350)).await;
                registry.set_ready(true);
            });
        }

        let start = Instant::now();
        assert!(controller.connect(&metamask()).await.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(350));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialization_wait_is_bounded() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .ready(false)
                .build(),
        );
        let controller = controller(&registry);

        let err = controller.connect(&metamask()).await.unwrap_err();
        assert_eq!(err, ConnectError::NotReady { attempts: 50 });
        assert_eq!(registry.connect_calls(), 0);
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fallback_timeout() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .hanging_disconnect()
                .build(),
        );
        let controller = controller(&registry);
        controller.connect(&metamask()).await.unwrap();

        let start = Instant::now();
        controller.disconnect().await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(2500));
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(controller.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_refused_while_connecting() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .connect_delay(Duration::from_secs(1))
                .build(),
        );
        let controller = controller(&registry);
        let attempt = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect(&metamask()).await })
        };
        sleep(Duration::from_millis(10)).await;

        assert_eq!(
            controller.disconnect().await,
            Err(DisconnectError::ConnectInFlight)
        );
        assert!(attempt.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_disconnects() {
        let registry = Arc::new(
            MemoryRegistry::builder()
                .wallet(metamask(), wallet(0x4d))
                .disconnect_delay(Duration::from_millis(300))
                .build(),
        );
        let controller = controller(&registry);
        controller.connect(&metamask()).await.unwrap();

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.disconnect().await })
        };
        sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.status(), ConnectionStatus::Disconnecting);

        assert!(controller.disconnect().await.is_ok());
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(first.await.unwrap().is_ok());
        assert_eq!(registry.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connector_unavailable() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        let listed = controller.list_connectors();
        registry.remove(WALLETCONNECT);

        let wc = listed.iter().find(|c| c.id() == WALLETCONNECT).unwrap();
        let err = controller.connect(wc).await.unwrap_err();
        assert_eq!(err, ConnectError::ConnectorUnavailable("WalletConnect".into()));
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(controller.snapshot().error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_instance_is_resolved_by_name() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);
        let stale = ConnectorDescriptor::new("metaMaskSDK#old", "MetaMask", ConnectorCategory::Injected);

        let session = controller.connect(&stale).await.unwrap();
        assert_eq!(session.connector.id(), METAMASK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_toggles() {
        let registry = Arc::new(registry());
        let controller = controller(&registry);

        assert!(!controller.show_account_popover());
        assert!(controller.toggle_wallet_picker());
        assert_eq!(controller.snapshot().overlay, Overlay::WalletPicker);
        assert!(controller.toggle_wallet_picker());
        assert_eq!(controller.snapshot().overlay, Overlay::Hidden);

        controller.connect(&metamask()).await.unwrap();
        assert!(!controller.open_wallet_picker());
        assert!(controller.show_account_popover());

        controller.disconnect().await.unwrap();
        assert_eq!(controller.snapshot().overlay, Overlay::Hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_fresh_cache() {
        let registry = Arc::new(registry());
        let cache = Arc::new(MemoryCache::with_entry(CachedConnection {
            connector_id: METAMASK.into(),
            account: Address::repeat_byte(0x4d).to_checksum(None),
            saved_at: timestamp_ms(),
        }));
        let controller = WalletController::builder(Arc::clone(&registry) as Arc<dyn ConnectorRegistry>)
            .cache(Arc::clone(&cache) as Arc<dyn ConnectionCache>)
            .build();

        let session = controller.restore().await.unwrap();
        assert_eq!(session.connector.id(), METAMASK);

        controller.disconnect().await.unwrap();
        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_ignores_stale_cache() {
        let registry = Arc::new(registry());
        let cache = Arc::new(MemoryCache::with_entry(CachedConnection {
            connector_id: METAMASK.into(),
            account: Address::repeat_byte(0x4d).to_checksum(None),
            saved_at: timestamp_ms() - 25 * 60 * 60 * 1000,
        }));
        let controller = WalletController::builder(Arc::clone(&registry) as Arc<dyn ConnectorRegistry>)
            .cache(Arc::clone(&cache) as Arc<dyn ConnectionCache>)
            .build();

        assert!(controller.restore().await.is_none());
        assert!(cache.load().await.unwrap().is_none());
        assert_eq!(registry.connect_calls(), 0);

        // manual flow is unaffected
        assert!(controller.connect(&metamask()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_failure_is_silent() {
        let registry = Arc::new(registry());
        registry.fail_next(METAMASK, ProviderError::user_rejected()).await;
        let cache = Arc::new(MemoryCache::with_entry(CachedConnection {
            connector_id: METAMASK.into(),
            account: Address::repeat_byte(0x4d).to_checksum(None),
            saved_at: timestamp_ms(),
        }));
        let controller = WalletController::builder(Arc::clone(&registry) as Arc<dyn ConnectorRegistry>)
            .cache(Arc::clone(&cache) as Arc<dyn ConnectionCache>)
            .build();

        assert!(controller.restore().await.is_none());
        assert!(controller.snapshot().error.is_none());
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_rejects_other_account() {
        let registry = Arc::new(registry());
        let cache = Arc::new(MemoryCache::with_entry(CachedConnection {
            connector_id: METAMASK.into(),
            account: Address::repeat_byte(0x11).to_checksum(None),
            saved_at: timestamp_ms(),
        }));
        let controller = WalletController::builder(Arc::clone(&registry) as Arc<dyn ConnectorRegistry>)
            .cache(Arc::clone(&cache) as Arc<dyn ConnectionCache>)
            .build();

        assert!(controller.restore().await.is_none());
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(!controller.is_listening());
        assert!(!registry.is_connected(METAMASK).await);
        assert!(cache.load().await.unwrap().is_none());
        assert!(controller.snapshot().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_discards_unreadable_account() {
        let registry = Arc::new(registry());
        let cache = Arc::new(MemoryCache::with_entry(CachedConnection {
            connector_id: METAMASK.into(),
            account: "not-an-address".into(),
            saved_at: timestamp_ms(),
        }));
        let controller = WalletController::builder(Arc::clone(&registry) as Arc<dyn ConnectorRegistry>)
            .cache(Arc::clone(&cache) as Arc<dyn ConnectionCache>)
            .build();

        assert!(controller.restore().await.is_none());
        assert_eq!(registry.connect_calls(), 0);
        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_accounts_releases_connector() {
        let empty = Arc::new(MemoryWallet::new(Vec::new(), 1));
        let registry = Arc::new(MemoryRegistry::builder().wallet(metamask(), empty).build());
        let controller = controller(&registry);

        let err = controller.connect(&metamask()).await.unwrap_err();
        assert_eq!(err, ConnectError::NoAccounts);
        assert!(!registry.is_connected(METAMASK).await);
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    }
}
