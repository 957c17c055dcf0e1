//! The balance refresher (C7): batched token-balance refresh with
//! decrease detection that resets the continuity/streak/TWB state.

use std::time::Duration;

use crate::error::{LedgerError, StoreError};
use crate::ledger::LedgerAdapter;
use crate::store::Store;

const BATCH_SIZE: usize = 50;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub checked: usize,
    pub decreases: usize,
    pub skipped_errors: usize,
}

/// Refreshes every known holder's token balance, batch by batch, pausing
/// between batches (§4.5). Per-wallet failures are swallowed so one bad
/// wallet can't corrupt the rest of the refresh.
pub async fn refresh_all(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    token_mint: &str,
    now: i64,
) -> Result<RefreshSummary, StoreError> {
    let holders = store.all_holders()?;
    let mut summary = RefreshSummary::default();

    for chunk in holders.chunks(BATCH_SIZE) {
        for holder in chunk {
            match refresh_one(store, ledger, token_mint, &holder.address, now).await {
                Ok(decreased) => {
                    summary.checked += 1;
                    if decreased {
                        summary.decreases += 1;
                    }
                }
                Err(LedgerError::Transport(_)) | Err(LedgerError::Upstream(_)) => {
                    summary.skipped_errors += 1;
                }
            }
        }
        tokio::time::sleep(INTER_BATCH_DELAY).await;
    }

    Ok(summary)
}

/// Refreshes a single holder's balance. Returns whether a strict decrease
/// was observed.
async fn refresh_one(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    token_mint: &str,
    address: &str,
    now: i64,
) -> Result<bool, LedgerError> {
    let balance = ledger.get_token_balance(address, token_mint).await?;

    let mut decreased = false;
    store
        .upsert_holder(address, now, |h| {
            if balance.0 < h.last_balance_raw.0 {
                decreased = true;
                h.continuity_start_ts = now;
                h.streak_rounds = 0;
                h.twb_score = rust_decimal::Decimal::ZERO;
                h.last_decrease_ts = Some(now);
            }
            h.last_balance_raw = balance;
            h.last_balance_check_ts = Some(now);
            h.last_seen_ts = now;
        })
        .map_err(|e| LedgerError::Upstream(format!("store error: {e}")))?;

    Ok(decreased)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::fake::FakeLedgerAdapter;
    use crate::model::TokenAmount;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn decrease_resets_continuity_streak_and_twb() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .upsert_holder("w1", 0, |h| {
                h.last_balance_raw = TokenAmount(1000);
                h.continuity_start_ts = 0;
                h.streak_rounds = 5;
                h.twb_score = dec!(12.5);
            })
            .unwrap();

        let ledger = FakeLedgerAdapter::default();
        ledger
            .token_balances
            .lock()
            .unwrap()
            .insert("w1".into(), TokenAmount(400));

        let t1 = 500;
        let summary = refresh_all(&store, &ledger, "MINT", t1).await.unwrap();
        assert_eq!(summary.decreases, 1);

        let h = store.get_holder("w1").unwrap().unwrap();
        assert_eq!(h.last_balance_raw, TokenAmount(400));
        assert_eq!(h.continuity_start_ts, t1);
        assert_eq!(h.streak_rounds, 0);
        assert_eq!(h.twb_score, dec!(0));
        assert_eq!(h.last_decrease_ts, Some(t1));
    }

    #[tokio::test]
    async fn no_decrease_preserves_streak_and_twb() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .upsert_holder("w1", 0, |h| {
                h.last_balance_raw = TokenAmount(100);
                h.streak_rounds = 3;
                h.twb_score = dec!(9);
            })
            .unwrap();

        let ledger = FakeLedgerAdapter::default();
        ledger
            .token_balances
            .lock()
            .unwrap()
            .insert("w1".into(), TokenAmount(150));

        let summary = refresh_all(&store, &ledger, "MINT", 1000).await.unwrap();
        assert_eq!(summary.decreases, 0);

        let h = store.get_holder("w1").unwrap().unwrap();
        assert_eq!(h.streak_rounds, 3);
        assert_eq!(h.twb_score, dec!(9));
        assert_eq!(h.last_balance_raw, TokenAmount(150));
    }
}
