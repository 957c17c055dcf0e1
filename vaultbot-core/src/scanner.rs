//! The scanner (C5): turns enriched transactions into holder discovery
//! and three-tiered buy detection, writing through to the store.

use std::collections::HashSet;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::age_cache;
use crate::error::LedgerError;
use crate::ledger::{EnrichedTx, LedgerAdapter};
use crate::model::ScanCursor;
use crate::store::Store;

const BATCH_SIZE: u32 = 100;
const INTER_PAGE_DELAY: Duration = Duration::from_millis(200);
const MIN_MEDIUM_CONFIDENCE_SOL: Decimal = Decimal::from_parts(1, 0, 0, false, 3); // 0.001

/// One detected buy event, tagged with the confidence tier that produced
/// it (§4.3 step 3).
#[derive(Debug, Clone, PartialEq)]
pub struct BuyEvent {
    pub wallet: String,
    pub sol_spent: Decimal,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Summary of one scan pass, useful for logging and tests.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub transactions_seen: usize,
    pub new_holders: usize,
    pub buy_events: usize,
    pub reached_cursor: bool,
    new_holder_addresses: Vec<String>,
}

/// Detects buy events in a single enriched transaction for `token_mint`,
/// applying the first rule (in priority order) that yields any events
/// (§4.3 step 3).
pub fn detect_buys(tx: &EnrichedTx, token_mint: &str) -> Vec<BuyEvent> {
    // High confidence: a parsed swap event with both a native input and a
    // matching-mint token output.
    if let Some(swap) = &tx.swap {
        if let Some(native_input) = swap.native_input {
            let matches: Vec<BuyEvent> = swap
                .token_outputs
                .iter()
                .filter(|out| out.mint == token_mint)
                .map(|out| BuyEvent {
                    wallet: out.user_account.clone(),
                    sol_spent: lamports_to_sol(native_input.0),
                    confidence: Confidence::High,
                })
                .collect();
            if !matches.is_empty() {
                return matches;
            }
        }
    }

    // Medium confidence: a single account whose native balance dropped
    // and whose token balance for the mint increased, by a non-trivial
    // amount.
    for entry in &tx.account_data {
        if entry.native_balance_change >= 0 {
            continue;
        }
        let token_increase = entry
            .token_balance_changes
            .iter()
            .any(|c| c.mint == token_mint && c.raw_amount > 0);
        if !token_increase {
            continue;
        }
        let sol_spent = lamports_to_sol(entry.native_balance_change.unsigned_abs());
        if sol_spent >= MIN_MEDIUM_CONFIDENCE_SOL {
            return vec![BuyEvent {
                wallet: entry.account.clone(),
                sol_spent,
                confidence: Confidence::Medium,
            }];
        }
    }

    // Low confidence: correlate a positive token transfer on the mint with
    // a positive native transfer flowing the other way from the same
    // account.
    for transfer in &tx.token_transfers {
        if transfer.mint != token_mint || transfer.token_amount.0 == 0 {
            continue;
        }
        if let Some(native) = tx
            .native_transfers
            .iter()
            .find(|n| n.from_user_account == transfer.to_user_account && n.amount.0 > 0)
        {
            return vec![BuyEvent {
                wallet: transfer.to_user_account.clone(),
                sol_spent: lamports_to_sol(native.amount.0),
                confidence: Confidence::Low,
            }];
        }
    }

    Vec::new()
}

fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(1_000_000_000u64)
}

/// Wallets discovered in one transaction: union of token-transfer
/// endpoints and `accountData` entries that touch the mint (§4.3 step 2).
fn discovered_wallets(tx: &EnrichedTx, token_mint: &str) -> HashSet<String> {
    let mut wallets = HashSet::new();
    for transfer in &tx.token_transfers {
        if transfer.mint == token_mint {
            wallets.insert(transfer.to_user_account.clone());
            wallets.insert(transfer.from_user_account.clone());
        }
    }
    for entry in &tx.account_data {
        if entry
            .token_balance_changes
            .iter()
            .any(|c| c.mint == token_mint)
        {
            wallets.insert(entry.account.clone());
        }
    }
    wallets
}

/// Shared body for both entry points (§4.3): `until_cursor = None` means
/// "bootstrap" (replay until `limit` is exhausted); `Some(cursor)` means
/// "incremental" (stop early on reaching the stored cursor).
async fn scan_body(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    treasury_address: &str,
    token_mint: &str,
    limit: u32,
    until_cursor: Option<String>,
) -> Result<ScanSummary, LedgerError> {
    let mut summary = ScanSummary::default();
    let mut before: Option<String> = None;
    let mut newest_signature: Option<String> = None;
    let mut newest_timestamp: i64 = 0;
    let mut remaining = limit;

    'pages: while remaining > 0 {
        let page_limit = remaining.min(BATCH_SIZE);
        let txs = ledger
            .fetch_enriched_transactions(treasury_address, page_limit, before.as_deref())
            .await?;
        if txs.is_empty() {
            break;
        }
        remaining = remaining.saturating_sub(txs.len() as u32);

        for tx in &txs {
            // Check the cursor boundary before any discovery/detection runs,
            // so the boundary transaction itself (already accounted for on
            // a previous scan) is never reprocessed.
            if let Some(cursor) = &until_cursor {
                if &tx.signature == cursor {
                    summary.reached_cursor = true;
                    break 'pages;
                }
            }

            summary.transactions_seen += 1;
            if newest_signature.is_none() {
                newest_signature = Some(tx.signature.clone());
                newest_timestamp = tx.timestamp;
            }

            for wallet in discovered_wallets(tx, token_mint) {
                let is_new = store.get_holder(&wallet).map_err(|e| {
                    LedgerError::Upstream(format!("store error: {e}"))
                })?.is_none();
                store.discover_holder(&wallet, tx.timestamp).map_err(|e| {
                    LedgerError::Upstream(format!("store error: {e}"))
                })?;
                if is_new {
                    summary.new_holders += 1;
                    summary.new_holder_addresses.push(wallet.clone());
                } else {
                    store
                        .upsert_holder(&wallet, tx.timestamp, |h| {
                            h.last_seen_ts = h.last_seen_ts.max(tx.timestamp);
                        })
                        .map_err(|e| LedgerError::Upstream(format!("store error: {e}")))?;
                }
            }

            let buys = detect_buys(tx, token_mint);
            for event in &buys {
                summary.buy_events += 1;
                store
                    .upsert_holder(&event.wallet, tx.timestamp, |h| match event.confidence {
                        Confidence::High => h.cumulative_buy_sol += event.sol_spent,
                        Confidence::Medium | Confidence::Low => {
                            h.cumulative_buy_sol_low_confidence += event.sol_spent
                        }
                    })
                    .map_err(|e| LedgerError::Upstream(format!("store error: {e}")))?;
            }
        }

        before = txs.last().map(|t| t.signature.clone());
        tokio::time::sleep(INTER_PAGE_DELAY).await;
    }

    if let Some(signature) = newest_signature {
        store
            .set_cursor(&ScanCursor {
                last_processed_signature: signature,
                last_processed_timestamp: newest_timestamp,
            })
            .map_err(|e| LedgerError::Upstream(format!("store error: {e}")))?;
    }

    // Wallet age is resolved after the per-tx discovery/detection loop, not
    // inline within it (§4.4 is off the scanner's critical path).
    for address in &summary.new_holder_addresses {
        age_cache::resolve_first_seen(store, ledger, address)
            .await
            .map_err(|e| LedgerError::Upstream(format!("store error: {e}")))?;
    }

    Ok(summary)
}

/// Full replay up to `limit`, ignoring any stored cursor.
pub async fn bootstrap(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    treasury_address: &str,
    token_mint: &str,
    limit: u32,
) -> Result<ScanSummary, LedgerError> {
    scan_body(store, ledger, treasury_address, token_mint, limit, None).await
}

/// Scans up to `limit` transactions, stopping early if the stored cursor
/// is reached.
pub async fn incremental(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    treasury_address: &str,
    token_mint: &str,
    limit: u32,
) -> Result<ScanSummary, LedgerError> {
    let cursor = store
        .get_cursor()
        .map_err(|e| LedgerError::Upstream(format!("store error: {e}")))?
        .map(|c| c.last_processed_signature);
    scan_body(store, ledger, treasury_address, token_mint, limit, cursor).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::{
        AccountDataEntry, NativeTransfer, SwapEvent, SwapTokenOutput, TokenBalanceChange,
        TokenTransfer,
    };
    use crate::model::{Lamports, TokenAmount};
    use rust_decimal_macros::dec;

    fn base_tx(signature: &str) -> EnrichedTx {
        EnrichedTx {
            signature: signature.to_string(),
            timestamp: 1000,
            tx_type: "SWAP".into(),
            source: "test".into(),
            token_transfers: vec![],
            native_transfers: vec![],
            swap: None,
            account_data: vec![],
        }
    }

    #[test]
    fn high_confidence_swap_event() {
        let mut tx = base_tx("sig1");
        tx.swap = Some(SwapEvent {
            native_input: Some(Lamports(1_000_000_000)), // 1 SOL
            token_outputs: vec![SwapTokenOutput {
                user_account: "wallet1".into(),
                mint: "MINT".into(),
                raw_amount: TokenAmount(500),
            }],
        });
        let events = detect_buys(&tx, "MINT");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].confidence, Confidence::High);
        assert_eq!(events[0].sol_spent, dec!(1));
    }

    #[test]
    fn medium_confidence_balance_delta() {
        let mut tx = base_tx("sig2");
        tx.account_data = vec![AccountDataEntry {
            account: "wallet2".into(),
            native_balance_change: -2_000_000, // -0.002 SOL
            token_balance_changes: vec![TokenBalanceChange {
                user_account: "wallet2".into(),
                mint: "MINT".into(),
                raw_amount: 100,
                decimals: 6,
            }],
        }];
        let events = detect_buys(&tx, "MINT");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].confidence, Confidence::Medium);
    }

    #[test]
    fn medium_confidence_below_threshold_is_ignored() {
        let mut tx = base_tx("sig2b");
        tx.account_data = vec![AccountDataEntry {
            account: "wallet2b".into(),
            native_balance_change: -500, // way below 0.001 SOL
            token_balance_changes: vec![TokenBalanceChange {
                user_account: "wallet2b".into(),
                mint: "MINT".into(),
                raw_amount: 100,
                decimals: 6,
            }],
        }];
        assert!(detect_buys(&tx, "MINT").is_empty());
    }

    #[test]
    fn low_confidence_transfer_correlation() {
        let mut tx = base_tx("sig3");
        tx.token_transfers = vec![TokenTransfer {
            mint: "MINT".into(),
            from_user_account: "pool".into(),
            to_user_account: "wallet3".into(),
            token_amount: TokenAmount(42),
        }];
        tx.native_transfers = vec![NativeTransfer {
            from_user_account: "wallet3".into(),
            to_user_account: "pool".into(),
            amount: Lamports(3_000_000_000),
        }];
        let events = detect_buys(&tx, "MINT");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].confidence, Confidence::Low);
        assert_eq!(events[0].sol_spent, dec!(3));
    }

    #[test]
    fn high_confidence_rule_wins_even_if_low_also_matches() {
        let mut tx = base_tx("sig4");
        tx.swap = Some(SwapEvent {
            native_input: Some(Lamports(1_000_000_000)),
            token_outputs: vec![SwapTokenOutput {
                user_account: "wallet4".into(),
                mint: "MINT".into(),
                raw_amount: TokenAmount(10),
            }],
        });
        tx.token_transfers = vec![TokenTransfer {
            mint: "MINT".into(),
            from_user_account: "pool".into(),
            to_user_account: "wallet4".into(),
            token_amount: TokenAmount(10),
        }];
        tx.native_transfers = vec![NativeTransfer {
            from_user_account: "wallet4".into(),
            to_user_account: "pool".into(),
            amount: Lamports(1_000_000_000),
        }];
        let events = detect_buys(&tx, "MINT");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].confidence, Confidence::High);
    }

    #[tokio::test]
    async fn incremental_scan_is_idempotent_with_no_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let ledger = crate::ledger::fake::FakeLedgerAdapter::default();
        let mut tx = base_tx("sig1");
        // A real buy, so a scan that reprocesses the boundary tx would be
        // caught double-counting `cumulative_buy_sol`.
        tx.swap = Some(SwapEvent {
            native_input: Some(Lamports(1_000_000_000)),
            token_outputs: vec![SwapTokenOutput {
                user_account: "wallet1".into(),
                mint: "MINT".into(),
                raw_amount: TokenAmount(500),
            }],
        });
        *ledger.enriched_txs.lock().unwrap() = vec![tx];

        let first = incremental(&store, &ledger, "treasury", "MINT", 100)
            .await
            .unwrap();
        assert_eq!(first.transactions_seen, 1);
        assert_eq!(first.buy_events, 1);

        let cursor_after_first = store.get_cursor().unwrap().unwrap();
        let holder_after_first = store.get_holder("wallet1").unwrap().unwrap();
        assert_eq!(holder_after_first.cumulative_buy_sol, dec!(1));

        let second = incremental(&store, &ledger, "treasury", "MINT", 100)
            .await
            .unwrap();
        assert_eq!(second.transactions_seen, 0);
        assert_eq!(second.buy_events, 0);
        assert!(second.reached_cursor);

        let cursor_after_second = store.get_cursor().unwrap().unwrap();
        assert_eq!(
            cursor_after_first.last_processed_signature,
            cursor_after_second.last_processed_signature
        );

        let holder_after_second = store.get_holder("wallet1").unwrap().unwrap();
        assert_eq!(holder_after_second.cumulative_buy_sol, dec!(1));
    }

    #[tokio::test]
    async fn newly_discovered_holders_get_their_wallet_age_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let ledger = crate::ledger::fake::FakeLedgerAdapter::default();
        let mut tx = base_tx("sig1");
        tx.token_transfers = vec![TokenTransfer {
            mint: "MINT".into(),
            from_user_account: "pool".into(),
            to_user_account: "wallet1".into(),
            token_amount: TokenAmount(42),
        }];
        *ledger.enriched_txs.lock().unwrap() = vec![tx];
        *ledger.signatures_for_address.lock().unwrap() = vec![crate::ledger::SignatureInfo {
            signature: "older-sig".into(),
            block_time: Some(42),
        }];

        incremental(&store, &ledger, "treasury", "MINT", 100)
            .await
            .unwrap();

        let holder = store.get_holder("wallet1").unwrap().unwrap();
        assert_eq!(holder.first_seen_ts, Some(42));
    }
}
