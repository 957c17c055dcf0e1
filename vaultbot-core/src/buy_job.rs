//! The buy job (C9): treasury balance → spendable → rate-capped amount →
//! swap → round record (§4.7).

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::Config;
use crate::error::StoreError;
use crate::ids::new_round_id;
use crate::ledger::LedgerAdapter;
use crate::model::{Lamports, Round, RoundType};
use crate::store::Store;

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// The result of one buy job invocation. `skip_reason` is set when the
/// job determined upfront that no swap should be attempted; the job still
/// always produces a [`Round`] so the status projector can reason about
/// the latest attempt (§4.7, and the Open Question resolution in §9).
#[derive(Debug)]
pub struct BuyJobResult {
    pub round: Round,
    pub skip_reason: Option<String>,
}

fn sol_to_decimal(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

/// Runs the buy job body. Caller is responsible for the execution
/// engine's gate/lock/timeout/classify wrapping (§4.9); this function only
/// implements the job's own state machine.
pub async fn run(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    config: &Config,
    treasury_address: &str,
    job_start: i64,
) -> Result<BuyJobResult, StoreError> {
    let native_balance = ledger
        .get_native_balance(treasury_address)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    let spendable = sol_to_decimal(native_balance.0)
        .checked_sub(config.native_fee_reserve_sol)
        .filter(|v| *v > Decimal::ZERO)
        .unwrap_or(Decimal::ZERO);

    let actual_buy = spendable.min(config.max_buy_per_interval_sol);

    if actual_buy < config.min_buy_sol {
        let round = Round {
            id: new_round_id(),
            round_type: RoundType::Buy,
            ts: job_start,
            txs: vec![],
            meta: serde_json::json!({
                "solSpent": 0,
                "tokenReceived": 0,
                "success": false,
                "safetyCap": config.max_buy_per_interval_sol.to_f64(),
                "spendableBeforeCap": spendable.to_f64(),
            }),
        };
        store.insert_round(&round)?;
        crate::transparency::record_round(&config.data_dir.join("public"), &round).await;
        return Ok(BuyJobResult {
            round,
            skip_reason: Some("actualBuy below minBuy".to_string()),
        });
    }

    let in_lamports = (actual_buy * Decimal::from(LAMPORTS_PER_SOL))
        .floor()
        .to_u64()
        .unwrap_or(0);

    let quote_result = ledger
        .get_swap_quote(
            "So11111111111111111111111111111111111111112",
            &config.token_mint,
            Lamports(in_lamports),
            config.slippage_bps,
        )
        .await;

    let (success, signature, error, sol_spent, token_received) = match quote_result {
        Ok(quote) => match ledger.execute_signed_swap(quote).await {
            Ok(outcome) => (
                outcome.success,
                outcome.signature,
                outcome.error,
                sol_to_decimal(outcome.in_amount.0),
                outcome.out_amount.0,
            ),
            Err(e) => (false, None, Some(e.to_string()), Decimal::ZERO, 0),
        },
        Err(e) => (false, None, Some(e.to_string()), Decimal::ZERO, 0),
    };

    let round = Round {
        id: new_round_id(),
        round_type: RoundType::Buy,
        ts: job_start,
        txs: signature.clone().into_iter().collect(),
        meta: serde_json::json!({
            "solSpent": sol_spent.to_f64(),
            "tokenReceived": token_received,
            "success": success,
            "error": error,
            "safetyCap": config.max_buy_per_interval_sol.to_f64(),
            "spendableBeforeCap": spendable.to_f64(),
        }),
    };
    // Round records are inserted unconditionally, even on swap failure
    // (§9 Open Question resolution): the slot is consumed either way.
    store.insert_round(&round)?;
    crate::transparency::record_round(&config.data_dir.join("public"), &round).await;

    Ok(BuyJobResult {
        round,
        skip_reason: None,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::fake::FakeLedgerAdapter;
    use crate::model::Lamports as L;
    use rust_decimal_macros::dec;

    fn test_config(data_dir: &std::path::Path) -> Config {
        Config::validate(crate::config::ConfigInput {
            rpc_url: Some("https://rpc".into()),
            indexer_api_key: Some("k".into()),
            token_mint: Some("MINT".into()),
            treasury_address: Some("treasury".into()),
            treasury_key_path: Some("/secrets/key.json".into()),
            native_fee_reserve_sol: Some(dec!(0.03)),
            min_buy_sol: Some(dec!(0.01)),
            max_buy_per_interval_sol: Some(dec!(0.2)),
            data_dir: Some(data_dir.to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn s1_skip_on_insufficient_balance() {
        // S1 in source spec.md §8: balance 0.035, feeReserve 0.03,
        // minBuy 0.01 → spendable ~0.005 < minBuy, so skip.
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let ledger = FakeLedgerAdapter::default();
        *ledger.native_balance.lock().unwrap() = L(35_000_000); // 0.035 SOL

        let config = test_config(dir.path());
        let result = run(&store, &ledger, &config, "treasury", 1000)
            .await
            .unwrap();

        assert!(result.skip_reason.is_some());
        assert!(result.round.txs.is_empty());
        assert_eq!(result.round.meta["success"], false);
    }

    #[tokio::test]
    async fn s2_buy_cap_applied() {
        // S2 in source spec.md §8: balance 10.0, feeReserve 0.03,
        // maxBuyPerInterval 0.2 → actualBuy = 0.2, inLamports = 200_000_000.
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let ledger = FakeLedgerAdapter::default();
        *ledger.native_balance.lock().unwrap() = L(10_000_000_000); // 10 SOL

        let config = test_config(dir.path());
        let result = run(&store, &ledger, &config, "treasury", 2000)
            .await
            .unwrap();

        assert!(result.skip_reason.is_none());
        assert_eq!(result.round.meta["safetyCap"], 0.2);
        assert_eq!(result.round.meta["success"], true);
    }

    #[tokio::test]
    async fn round_is_recorded_even_on_swap_failure() {
        struct FailingSwapLedger(FakeLedgerAdapter);

        #[async_trait::async_trait]
        impl LedgerAdapter for FailingSwapLedger {
            async fn get_native_balance(
                &self,
                address: &str,
            ) -> Result<Lamports, crate::error::LedgerError> {
                self.0.get_native_balance(address).await
            }
            async fn get_token_balance(
                &self,
                owner: &str,
                mint: &str,
            ) -> Result<crate::model::TokenAmount, crate::error::LedgerError> {
                self.0.get_token_balance(owner, mint).await
            }
            async fn get_token_decimals(
                &self,
                mint: &str,
            ) -> Result<u8, crate::error::LedgerError> {
                self.0.get_token_decimals(mint).await
            }
            async fn get_latest_blockhash(
                &self,
            ) -> Result<(String, u64), crate::error::LedgerError> {
                self.0.get_latest_blockhash().await
            }
            async fn get_signatures_for_address(
                &self,
                address: &str,
                before: Option<&str>,
                limit: u32,
            ) -> Result<Vec<crate::ledger::SignatureInfo>, crate::error::LedgerError> {
                self.0.get_signatures_for_address(address, before, limit).await
            }
            async fn fetch_enriched_transactions(
                &self,
                address: &str,
                limit: u32,
                before: Option<&str>,
            ) -> Result<Vec<crate::ledger::EnrichedTx>, crate::error::LedgerError> {
                self.0
                    .fetch_enriched_transactions(address, limit, before)
                    .await
            }
            async fn get_swap_quote(
                &self,
                in_mint: &str,
                out_mint: &str,
                amount: Lamports,
                slippage_bps: u16,
            ) -> Result<crate::ledger::Quote, crate::error::LedgerError> {
                self.0
                    .get_swap_quote(in_mint, out_mint, amount, slippage_bps)
                    .await
            }
            async fn execute_signed_swap(
                &self,
                _quote: crate::ledger::Quote,
            ) -> Result<crate::ledger::SwapOutcome, crate::error::LedgerError> {
                Err(crate::error::LedgerError::Upstream("503 service unavailable".into()))
            }
            async fn execute_reward_batch(
                &self,
                mint: &str,
                winners: &[(String, crate::model::TokenAmount)],
            ) -> Result<crate::ledger::TransferOutcome, crate::error::LedgerError> {
                self.0.execute_reward_batch(mint, winners).await
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let ledger = FailingSwapLedger(FakeLedgerAdapter::default());
        *ledger.0.native_balance.lock().unwrap() = L(10_000_000_000);

        let config = test_config(dir.path());
        let result = run(&store, &ledger, &config, "treasury", 3000)
            .await
            .unwrap();

        assert!(result.round.txs.is_empty());
        assert_eq!(result.round.meta["success"], false);
        let latest = store.latest_round(RoundType::Buy).unwrap().unwrap();
        assert_eq!(latest.id, result.round.id);
    }
}
