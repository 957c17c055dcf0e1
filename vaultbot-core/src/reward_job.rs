//! The reward job (C10): incremental scan → balance refresh → lottery →
//! proportional split → batched transfers → per-holder streak/TWB update
//! → round record (§4.8).

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::Config;
use crate::error::StoreError;
use crate::ids::{lottery_seed, new_round_id};
use crate::ledger::LedgerAdapter;
use crate::lottery::select_winners;
use crate::model::{Round, RoundType, TokenAmount};
use crate::scoring::eligible_scored_holders;
use crate::store::Store;
use crate::{balances, scanner};

const INTER_BATCH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct RewardJobResult {
    pub round: Round,
    pub skip_reason: Option<String>,
}

fn raw_to_decimal(amount: u128, decimals: u8) -> Decimal {
    TokenAmount(amount).to_ui(decimals)
}

/// Runs the reward job body (§4.8). Caller wraps this with the execution
/// engine's gate/lock/timeout/classify logic (§4.9).
pub async fn run(
    store: &Store,
    ledger: &dyn LedgerAdapter,
    config: &Config,
    treasury_address: &str,
    job_start: i64,
) -> Result<RewardJobResult, StoreError> {
    // IncrementalScan, then RefreshBalances: the reward job piggybacks the
    // scanner and balance refresher so its view of holders is fresh before
    // scoring (§4.8).
    scanner::incremental(
        store,
        ledger,
        treasury_address,
        &config.token_mint,
        config.scan_signature_limit as u32,
    )
    .await
    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    balances::refresh_all(store, ledger, &config.token_mint, job_start).await?;

    let decimals = ledger
        .get_token_decimals(&config.token_mint)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let treasury_balance_raw = ledger
        .get_token_balance(treasury_address, &config.token_mint)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    if treasury_balance_raw.0 == 0 {
        let round = Round {
            id: new_round_id(),
            round_type: RoundType::Reward,
            ts: job_start,
            txs: vec![],
            meta: serde_json::json!({
                "winnersCount": 0,
                "perWinnerUi": 0,
                "totalDistributedUi": 0,
                "success": false,
            }),
        };
        store.insert_round(&round)?;
        crate::transparency::record_round(&config.data_dir.join("public"), &round).await;
        return Ok(RewardJobResult {
            round,
            skip_reason: Some("treasury token balance is zero".to_string()),
        });
    }

    let pct_bps = config.reward_pct_bps.min(config.max_reward_pct_bps) as u128;
    let distribute_raw = treasury_balance_raw.0 * pct_bps / 10_000;

    let eligible = eligible_scored_holders(
        store,
        job_start,
        (config.min_wallet_age_days as i64) * 86_400,
        config.min_continuity_secs as i64,
        config.min_cumulative_buy_sol,
        decimals,
    )?;

    if eligible.is_empty() || distribute_raw == 0 {
        let round = Round {
            id: new_round_id(),
            round_type: RoundType::Reward,
            ts: job_start,
            txs: vec![],
            meta: serde_json::json!({
                "winnersCount": 0,
                "perWinnerUi": 0,
                "totalDistributedUi": 0,
                "success": false,
            }),
        };
        store.insert_round(&round)?;
        crate::transparency::record_round(&config.data_dir.join("public"), &round).await;
        return Ok(RewardJobResult {
            round,
            skip_reason: Some("no eligible holders or nothing to distribute".to_string()),
        });
    }

    let (blockhash, _) = ledger
        .get_latest_blockhash()
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let seed = lottery_seed(job_start, &config.token_mint, &blockhash);

    let winners = select_winners(&eligible, config.winners_per_round as usize, seed);
    if winners.is_empty() {
        let round = Round {
            id: new_round_id(),
            round_type: RoundType::Reward,
            ts: job_start,
            txs: vec![],
            meta: serde_json::json!({
                "winnersCount": 0,
                "perWinnerUi": 0,
                "totalDistributedUi": 0,
                "success": false,
            }),
        };
        store.insert_round(&round)?;
        crate::transparency::record_round(&config.data_dir.join("public"), &round).await;
        return Ok(RewardJobResult {
            round,
            skip_reason: Some("no eligible holder has nonzero lottery weight".to_string()),
        });
    }
    let per_winner_raw = distribute_raw / winners.len() as u128;

    let winner_pairs: Vec<(String, TokenAmount)> = winners
        .iter()
        .map(|w| (w.address.clone(), TokenAmount(per_winner_raw)))
        .collect();

    let mut txs = Vec::new();
    let mut all_succeeded = true;
    let mut last_error = None;
    let batches: Vec<_> = winner_pairs.chunks(config.max_sends_per_tx as usize).collect();
    for (i, batch) in batches.iter().enumerate() {
        let outcome = ledger
            .execute_reward_batch(&config.token_mint, batch)
            .await;
        match outcome {
            Ok(outcome) => {
                txs.extend(outcome.signatures);
                if !outcome.success {
                    all_succeeded = false;
                    last_error = outcome.error;
                }
            }
            Err(e) => {
                all_succeeded = false;
                last_error = Some(e.to_string());
            }
        }
        if i + 1 < batches.len() {
            tokio::time::sleep(INTER_BATCH_DELAY).await;
        }
    }

    // Streak/TWB accrue for every eligible holder, not just winners (§4.8).
    let hours_elapsed = config.reward_interval_secs as f64 / 3600.0;
    for holder in &eligible {
        store.upsert_holder(&holder.address, job_start, |h| {
            h.streak_rounds += 1;
            let balance_ui = holder.token_balance_ui;
            h.twb_score += balance_ui * Decimal::try_from(hours_elapsed).unwrap_or(Decimal::ZERO);
        })?;
    }

    let total_distributed_ui = raw_to_decimal(per_winner_raw * winners.len() as u128, decimals);
    let per_winner_ui = raw_to_decimal(per_winner_raw, decimals);

    let round = Round {
        id: new_round_id(),
        round_type: RoundType::Reward,
        ts: job_start,
        txs,
        meta: serde_json::json!({
            "winnersCount": winners.len(),
            "perWinnerUi": per_winner_ui.to_f64(),
            "totalDistributedUi": total_distributed_ui.to_f64(),
            "lotterySeed": seed,
            "lotteryBlockhash": blockhash,
            "rewardPercentBps": config.reward_pct_bps,
            "maxRewardPercentBps": config.max_reward_pct_bps,
            "success": all_succeeded,
            "error": last_error,
        }),
    };
    store.insert_round(&round)?;
    crate::transparency::record_round(&config.data_dir.join("public"), &round).await;

    Ok(RewardJobResult {
        round,
        skip_reason: None,
    })
}
