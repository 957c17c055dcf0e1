//! Eligibility and weight scoring (C8, first half). The lottery draw
//! itself lives in [`crate::lottery`].

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::StoreError;
use crate::model::Holder;
use crate::store::Store;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One eligible holder's derived score inputs (§4.6).
#[derive(Debug, Clone)]
pub struct ScoredHolder {
    pub address: String,
    pub wallet_age_days: f64,
    pub token_balance_ui: Decimal,
    pub weight: f64,
}

/// Loads the eligible set (I3) and derives each holder's weight.
pub fn eligible_scored_holders(
    store: &Store,
    now: i64,
    min_age_secs: i64,
    min_continuity_secs: i64,
    min_cumulative_buy: Decimal,
    decimals: u8,
) -> Result<Vec<ScoredHolder>, StoreError> {
    let eligible = store.eligible_holders(
        now,
        min_age_secs,
        min_continuity_secs,
        min_cumulative_buy,
    )?;
    Ok(eligible
        .into_iter()
        .map(|h| score_holder(&h, now, decimals))
        .collect())
}

/// The weight function (§4.6):
/// `weight = min(10, sqrt(walletAgeDays) * min(3, 1 + streak/10) *
///                min(5, 1 + log10(1 + twb)))`
pub fn score_holder(holder: &Holder, now: i64, decimals: u8) -> ScoredHolder {
    let wallet_age_days = holder
        .first_seen_ts
        .map(|first_seen| (now - first_seen) as f64 / SECONDS_PER_DAY)
        .unwrap_or(0.0)
        .max(0.0);
    let token_balance_ui = holder.last_balance_raw.to_ui(decimals);

    let streak_factor = (1.0 + holder.streak_rounds as f64 / 10.0).min(3.0);
    let twb = holder.twb_score.to_f64().unwrap_or(0.0).max(0.0);
    let twb_factor = (1.0 + (1.0 + twb).log10()).min(5.0);
    let weight = (wallet_age_days.sqrt() * streak_factor * twb_factor).min(10.0);

    ScoredHolder {
        address: holder.address.clone(),
        wallet_age_days,
        token_balance_ui,
        weight,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::TokenAmount;
    use rust_decimal_macros::dec;

    fn holder_with(
        age_days: i64,
        streak: u32,
        twb: Decimal,
        balance: u128,
    ) -> Holder {
        let now = 1_000_000;
        Holder {
            address: "w".into(),
            first_seen_ts: Some(now - age_days * 86_400),
            last_seen_ts: now,
            last_balance_raw: TokenAmount(balance),
            last_balance_check_ts: Some(now),
            last_decrease_ts: None,
            continuity_start_ts: now - age_days * 86_400,
            streak_rounds: streak,
            twb_score: twb,
            cumulative_buy_sol: dec!(1),
            cumulative_buy_sol_low_confidence: dec!(0),
            is_blacklisted: false,
        }
    }

    #[test]
    fn weight_is_bounded_by_ten() {
        let h = holder_with(100_000, 1000, dec!(1_000_000), 1_000_000);
        let scored = score_holder(&h, 1_000_000, 6);
        assert!(scored.weight <= 10.0);
    }

    #[test]
    fn weight_is_nonnegative() {
        let h = holder_with(0, 0, dec!(0), 1);
        let scored = score_holder(&h, 1_000_000, 6);
        assert!(scored.weight >= 0.0);
    }

    #[test]
    fn more_history_yields_more_weight() {
        let low = holder_with(1, 0, dec!(0), 1);
        let high = holder_with(30, 10, dec!(100), 1);
        let low_scored = score_holder(&low, 1_000_000, 6);
        let high_scored = score_holder(&high, 1_000_000, 6);
        assert!(high_scored.weight > low_scored.weight);
    }
}
