//! The data model (§3): rows persisted in the [`crate::store::Store`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Raw, base-unit native-coin amount (lamports on Solana; the spec calls
/// this "integer_lamports"). `u64` comfortably covers any real supply.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Lamports(pub u64);

impl Lamports {
    pub const ZERO: Lamports = Lamports(0);

    pub fn saturating_sub(self, other: Lamports) -> Lamports {
        Lamports(self.0.saturating_sub(other.0))
    }
}

/// Raw, base-unit token amount. The data model calls for an
/// arbitrary-precision non-negative integer; `u128` is used here as a
/// pragmatic stand-in (see `DESIGN.md`) since it exceeds any realistic
/// token supply and keeps the dependency surface aligned with the rest of
/// the workspace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    /// Convert to a UI-denominated decimal given the mint's decimals.
    pub fn to_ui(self, decimals: u8) -> rust_decimal::Decimal {
        let scale = 10u128.pow(decimals as u32);
        rust_decimal::Decimal::from_i128_with_scale(
            self.0 as i128,
            0,
        ) / rust_decimal::Decimal::from_i128_with_scale(scale as i128, 0)
    }
}

/// A known token holder and its anti-sybil history (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub address: String,
    pub first_seen_ts: Option<i64>,
    pub last_seen_ts: i64,
    pub last_balance_raw: TokenAmount,
    pub last_balance_check_ts: Option<i64>,
    pub last_decrease_ts: Option<i64>,
    pub continuity_start_ts: i64,
    pub streak_rounds: u32,
    pub twb_score: rust_decimal::Decimal,
    pub cumulative_buy_sol: rust_decimal::Decimal,
    pub cumulative_buy_sol_low_confidence: rust_decimal::Decimal,
    pub is_blacklisted: bool,
}

impl Holder {
    /// A brand-new holder discovered in a scan (§4.3 step 2).
    pub fn new_discovered(address: String, seen_ts: i64) -> Self {
        Holder {
            address,
            first_seen_ts: None,
            last_seen_ts: seen_ts,
            last_balance_raw: TokenAmount::ZERO,
            last_balance_check_ts: None,
            last_decrease_ts: None,
            continuity_start_ts: seen_ts,
            streak_rounds: 0,
            twb_score: rust_decimal::Decimal::ZERO,
            cumulative_buy_sol: rust_decimal::Decimal::ZERO,
            cumulative_buy_sol_low_confidence: rust_decimal::Decimal::ZERO,
            is_blacklisted: false,
        }
    }

    /// Eligibility predicate (I3). `now` and the thresholds are seconds /
    /// the configured minimums.
    pub fn is_eligible(
        &self,
        now: i64,
        min_age_secs: i64,
        min_continuity_secs: i64,
        min_cumulative_buy: rust_decimal::Decimal,
    ) -> bool {
        if self.is_blacklisted {
            return false;
        }
        let Some(first_seen) = self.first_seen_ts else {
            return false;
        };
        if first_seen > now - min_age_secs {
            return false;
        }
        if self.continuity_start_ts > now - min_continuity_secs {
            return false;
        }
        if self.cumulative_buy_sol < min_cumulative_buy {
            return false;
        }
        self.last_balance_raw.0 > 0
    }
}

/// The kind of a completed or attempted job execution (§3).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoundType {
    Buy,
    Reward,
}

/// One completed or attempted execution of the buy or reward job (§3).
/// Rounds are append-only and never mutated once inserted (I6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub round_type: RoundType,
    pub ts: i64,
    pub txs: Vec<String>,
    pub meta: serde_json::Value,
}

/// The incremental scan cursor (§3). Advances monotonically by recency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCursor {
    pub last_processed_signature: String,
    pub last_processed_timestamp: i64,
}

/// The two lock types guarding single-flight job execution (I4).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    BuyJob,
    RewardJob,
}

/// A held execution lock (§3). Presence of the row means held (I4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLock {
    pub lock_type: LockType,
    pub acquired_ts: i64,
    pub owner_pid: u32,
}
