//! Raffle entrance: contract state, entry validation and submission.
//!
//! The contract side is reached through a [`RaffleGateway`];
//! [`RpcRaffle`](crate::rpc::RpcRaffle) talks to a node and
//! [`MemoryRaffle`](crate::memory::MemoryRaffle) simulates one.

use std::fmt;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{LotteryError, LotteryResult};
use crate::state::ActiveSession;
use crate::util::short_address;

/// Fewest entries per transaction.
pub const MIN_ENTRIES: u32 = 1;

/// Most entries per transaction.
pub const MAX_ENTRIES: u32 = 10;

/// Clamp a requested entry count into `MIN_ENTRIES..=MAX_ENTRIES`.
#[must_use]
pub fn clamp_entries(entries: u32) -> u32 {
    entries.clamp(MIN_ENTRIES, MAX_ENTRIES)
}

/// Lifecycle of the raffle contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaffleState {
    /// Accepting entries.
    Open,
    /// Waiting for the randomness callback.
    CalculatingWinner,
    /// Not accepting entries.
    Closed,
    /// A value this front-end does not know.
    Unknown(u8),
}

impl RaffleState {
    /// Decode the contract's `uint8` state.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::CalculatingWinner,
            2 => Self::Closed,
            other => Self::Unknown(other),
        }
    }

    /// Badge text.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::CalculatingWinner => "Calculating Winner",
            Self::Closed => "Closed",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Whether entries are accepted.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for RaffleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Values read from the raffle contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaffleSnapshot {
    /// Price of one entry, in wei.
    pub entrance_fee: U256,
    /// Entries in the current round.
    pub players: U256,
    /// Winner of the last round; zero before the first draw.
    pub recent_winner: Address,
    /// Contract state.
    pub state: RaffleState,
}

impl RaffleSnapshot {
    /// Cost of `entries` entries, in wei.
    #[must_use]
    pub fn total_cost(&self, entries: u32) -> U256 {
        self.entrance_fee.saturating_mul(U256::from(entries))
    }

    /// Entrance fee times players, in wei.
    #[must_use]
    pub fn prize_pool(&self) -> U256 {
        self.entrance_fee.saturating_mul(self.players)
    }

    /// Shortened winner address, or `None` before the first draw.
    #[must_use]
    pub fn winner_display(&self) -> String {
        if self.recent_winner.is_zero() {
            "None".to_string()
        } else {
            short_address(&self.recent_winner)
        }
    }
}

/// Format wei as ether without trailing zeros, e.g. `0.01 ETH`.
#[must_use]
pub fn format_eth(wei: U256) -> String {
    let formatted = format_ether(wei);
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        formatted.as_str()
    };
    format!("{trimmed} ETH")
}

/// A validated entry ready for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPlan {
    /// Paying account.
    pub player: Address,
    /// Number of entries.
    pub entries: u32,
    /// Value sent with the transaction, in wei.
    pub value: U256,
}

/// Validate an entry.
///
/// Checks run in order: a session must exist, the balance must cover the
/// cost, and the raffle must be open.
pub fn plan_entry(
    session: Option<&ActiveSession>,
    balance: U256,
    raffle: &RaffleSnapshot,
    entries: u32,
) -> LotteryResult<EntryPlan> {
    let session = session.ok_or(LotteryError::NotConnected)?;
    let entries = clamp_entries(entries);
    let value = raffle.total_cost(entries);

    if balance < value {
        return Err(LotteryError::InsufficientBalance);
    }
    if !raffle.state.is_open() {
        return Err(LotteryError::NotOpen);
    }

    Ok(EntryPlan {
        player: session.address,
        entries,
        value,
    })
}

/// Label of the enter button.
#[must_use]
pub fn enter_button_label(raffle: &RaffleSnapshot, balance: U256, entries: u32, busy: bool) -> String {
    let entries = clamp_entries(entries);
    if busy {
        "Processing...".to_string()
    } else if !raffle.state.is_open() {
        "Lottery Closed".to_string()
    } else if balance < raffle.total_cost(entries) {
        "Insufficient Balance".to_string()
    } else {
        let noun = if entries == 1 { "entry" } else { "entries" };
        format!("Enter Lottery ({entries} {noun})")
    }
}

/// Progress of an entry transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Waiting for the user to sign.
    AwaitingSignature,
    /// Submitted, waiting for the receipt.
    Confirming,
    /// Mined successfully.
    Success,
}

impl TransactionStatus {
    /// Status line text.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AwaitingSignature => "Confirm transaction in wallet...",
            Self::Confirming => "Transaction confirming...",
            Self::Success => "Successfully entered lottery!",
        }
    }
}

/// Access to the raffle contract.
#[async_trait]
pub trait RaffleGateway: Send + Sync {
    /// Read fee, players, last winner and state.
    async fn snapshot(&self) -> LotteryResult<RaffleSnapshot>;

    /// Native balance of `account`, in wei.
    async fn balance(&self, account: Address) -> LotteryResult<U256>;

    /// Submit `enterRaffle` for `plan` and return the transaction hash.
    async fn submit_entry(&self, plan: &EntryPlan) -> LotteryResult<TxHash>;

    /// Wait until `hash` is mined successfully.
    async fn confirm(&self, hash: TxHash) -> LotteryResult<()>;
}

/// Validate and submit an entry, reporting progress to `on_status`.
pub async fn enter_raffle<F>(
    gateway: &dyn RaffleGateway,
    session: Option<&ActiveSession>,
    entries: u32,
    mut on_status: F,
) -> LotteryResult<TxHash>
where
    F: FnMut(TransactionStatus) + Send,
{
    let account = session.ok_or(LotteryError::NotConnected)?.address;
    let raffle = gateway.snapshot().await?;
    let balance = gateway.balance(account).await?;
    let plan = plan_entry(session, balance, &raffle, entries)?;
    debug!(player = %plan.player, entries = plan.entries, value = %plan.value, "entering raffle");

    on_status(TransactionStatus::AwaitingSignature);
    let hash = gateway.submit_entry(&plan).await?;

    on_status(TransactionStatus::Confirming);
    gateway.confirm(hash).await?;

    on_status(TransactionStatus::Success);
    info!(player = %plan.player, entries = plan.entries, tx = %hash, "entered raffle");
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorCategory, ConnectorDescriptor};
    use crate::memory::MemoryRaffle;
    use alloy::primitives::utils::parse_ether;

    fn session() -> ActiveSession {
        ActiveSession {
            connector: ConnectorDescriptor::new("metaMaskSDK", "MetaMask", ConnectorCategory::Injected),
            address: Address::repeat_byte(0x4d),
            chain_id: 11_155_111,
            connected_at: 0,
        }
    }

    fn raffle(state: RaffleState) -> RaffleSnapshot {
        RaffleSnapshot {
            entrance_fee: parse_ether("0.01").unwrap(),
            players: U256::from(3),
            recent_winner: Address::ZERO,
            state,
        }
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(RaffleState::from_raw(0).label(), "Open");
        assert_eq!(RaffleState::from_raw(1).label(), "Calculating Winner");
        assert_eq!(RaffleState::from_raw(2).label(), "Closed");
        assert_eq!(RaffleState::from_raw(7), RaffleState::Unknown(7));
        assert_eq!(RaffleState::Unknown(7).to_string(), "Unknown");
    }

    #[test]
    fn test_amounts() {
        let raffle = raffle(RaffleState::Open);
        assert_eq!(format_eth(raffle.prize_pool()), "0.03 ETH");
        assert_eq!(format_eth(raffle.total_cost(clamp_entries(25))), "0.1 ETH");
        assert_eq!(format_eth(U256::ZERO), "0 ETH");
        assert_eq!(format_eth(parse_ether("2").unwrap()), "2 ETH");
        assert_eq!(clamp_entries(0), 1);
    }

    #[test]
    fn test_winner_display() {
        let mut raffle = raffle(RaffleState::Open);
        assert_eq!(raffle.winner_display(), "None");
        raffle.recent_winner = Address::repeat_byte(0x11);
        assert_eq!(raffle.winner_display(), "0x1111...1111");
    }

    #[test]
    fn test_plan_entry_validation_order() {
        let closed = raffle(RaffleState::Closed);
        let poor = U256::from(1);

        assert_eq!(
            plan_entry(None, poor, &closed, 1),
            Err(LotteryError::NotConnected)
        );
        assert_eq!(
            plan_entry(Some(&session()), poor, &closed, 1),
            Err(LotteryError::InsufficientBalance)
        );
        let rich = parse_ether("1").unwrap();
        assert_eq!(
            plan_entry(Some(&session()), rich, &closed, 1),
            Err(LotteryError::NotOpen)
        );
        assert_eq!(
            LotteryError::NotOpen.to_string(),
            "Lottery is not currently open for entries"
        );

        let plan = plan_entry(Some(&session()), rich, &raffle(RaffleState::Open), 3).unwrap();
        assert_eq!(plan.value, parse_ether("0.03").unwrap());
        assert_eq!(plan.player, session().address);
    }

    #[test]
    fn test_button_label() {
        let open = raffle(RaffleState::Open);
        let rich = parse_ether("1").unwrap();
        assert_eq!(enter_button_label(&open, rich, 1, false), "Enter Lottery (1 entry)");
        assert_eq!(enter_button_label(&open, rich, 4, false), "Enter Lottery (4 entries)");
        assert_eq!(enter_button_label(&open, U256::ZERO, 1, false), "Insufficient Balance");
        assert_eq!(enter_button_label(&raffle(RaffleState::Closed), rich, 1, false), "Lottery Closed");
        assert_eq!(enter_button_label(&open, rich, 1, true), "Processing...");
    }

    #[tokio::test]
    async fn test_enter_raffle_reports_progress() {
        let gateway = MemoryRaffle::new(raffle(RaffleState::Open));
        gateway.fund(session().address, parse_ether("1").unwrap()).await;

        let mut seen = Vec::new();
        let hash = enter_raffle(&gateway, Some(&session()), 2, |s| seen.push(s))
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                TransactionStatus::AwaitingSignature,
                TransactionStatus::Confirming,
                TransactionStatus::Success
            ]
        );
        let after = gateway.snapshot().await.unwrap();
        assert_eq!(after.players, U256::from(5));
        assert_eq!(
            gateway.balance(session().address).await.unwrap(),
            parse_ether("0.98").unwrap()
        );
        assert!(gateway.confirm(hash).await.is_ok());
    }

    #[tokio::test]
    async fn test_enter_raffle_without_session() {
        let gateway = MemoryRaffle::new(raffle(RaffleState::Open));
        let err = enter_raffle(&gateway, None, 1, |_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "Please connect your wallet first");
    }
}
