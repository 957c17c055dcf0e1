//! The wallet age cache (C6): lazily discovers a wallet's oldest known
//! ledger activity, off the scanner's critical path.

use std::time::Duration;

use crate::error::StoreError;
use crate::ledger::LedgerAdapter;
use crate::store::Store;

const MAX_PAGES: u32 = 20;
const PAGE_SIZE: u32 = 1_000;
const INTER_PAGE_DELAY: Duration = Duration::from_millis(100);

/// Resolves `first_seen_ts` for `address`, persisting it if newly
/// discovered. Returns the (possibly unchanged) value.
///
/// Fails open: a transport error from the ledger adapter returns `Ok(None)`
/// rather than propagating, and does not mark safe mode — the scanner will
/// simply retry on the wallet's next sighting (§4.4).
pub async fn resolve_first_seen(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    address: &str,
) -> Result<Option<i64>, StoreError> {
    if let Some(holder) = store.get_holder(address)? {
        if holder.first_seen_ts.is_some() {
            return Ok(holder.first_seen_ts);
        }
    }

    let mut before: Option<String> = None;
    let mut min_block_time: Option<i64> = None;

    for _ in 0..MAX_PAGES {
        let page = match ledger
            .get_signatures_for_address(address, before.as_deref(), PAGE_SIZE)
            .await
        {
            Ok(page) => page,
            Err(_) => return Ok(None),
        };
        if page.is_empty() {
            break;
        }
        for entry in &page {
            if let Some(bt) = entry.block_time {
                min_block_time = Some(match min_block_time {
                    Some(current) => current.min(bt),
                    None => bt,
                });
            }
        }
        let short_page = page.len() < PAGE_SIZE as usize;
        before = page.last().map(|s| s.signature.clone());
        if short_page {
            break;
        }
        tokio::time::sleep(INTER_PAGE_DELAY).await;
    }

    if let Some(first_seen) = min_block_time {
        store.upsert_holder(address, first_seen, |h| {
            h.first_seen_ts = Some(first_seen);
        })?;
    }

    Ok(min_block_time)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::fake::FakeLedgerAdapter;

    #[tokio::test]
    async fn returns_existing_first_seen_without_refetching() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .upsert_holder("w1", 100, |h| h.first_seen_ts = Some(42))
            .unwrap();

        let ledger = FakeLedgerAdapter::default();
        let result = resolve_first_seen(&store, &ledger, "w1").await.unwrap();
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn fails_open_on_transport_error() {
        struct FailingLedger;

        #[async_trait::async_trait]
        impl LedgerAdapter for FailingLedger {
            async fn get_native_balance(
                &self,
                _address: &str,
            ) -> Result<crate::model::Lamports, crate::error::LedgerError> {
                unimplemented!()
            }
            async fn get_token_balance(
                &self,
                _owner: &str,
                _mint: &str,
            ) -> Result<crate::model::TokenAmount, crate::error::LedgerError> {
                unimplemented!()
            }
            async fn get_token_decimals(
                &self,
                _mint: &str,
            ) -> Result<u8, crate::error::LedgerError> {
                unimplemented!()
            }
            async fn get_latest_blockhash(
                &self,
            ) -> Result<(String, u64), crate::error::LedgerError> {
                unimplemented!()
            }
            async fn get_signatures_for_address(
                &self,
                _address: &str,
                _before: Option<&str>,
                _limit: u32,
            ) -> Result<Vec<crate::ledger::SignatureInfo>, crate::error::LedgerError> {
                Err(crate::error::LedgerError::Transport("boom".into()))
            }
            async fn fetch_enriched_transactions(
                &self,
                _address: &str,
                _limit: u32,
                _before: Option<&str>,
            ) -> Result<Vec<crate::ledger::EnrichedTx>, crate::error::LedgerError> {
                unimplemented!()
            }
            async fn get_swap_quote(
                &self,
                _in_mint: &str,
                _out_mint: &str,
                _amount: crate::model::Lamports,
                _slippage_bps: u16,
            ) -> Result<crate::ledger::Quote, crate::error::LedgerError> {
                unimplemented!()
            }
            async fn execute_signed_swap(
                &self,
                _quote: crate::ledger::Quote,
            ) -> Result<crate::ledger::SwapOutcome, crate::error::LedgerError> {
                unimplemented!()
            }
            async fn execute_reward_batch(
                &self,
                _mint: &str,
                _winners: &[(String, crate::model::TokenAmount)],
            ) -> Result<crate::ledger::TransferOutcome, crate::error::LedgerError> {
                unimplemented!()
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let result = resolve_first_seen(&store, &FailingLedger, "w1").await.unwrap();
        assert_eq!(result, None);
        assert!(store.get_holder("w1").unwrap().is_none());
    }
}
