//! The scheduler (C12): startup housekeeping, periodic triggers for the
//! buy/reward/scan jobs, heartbeat emission, and graceful shutdown (§4.10).
//! Trigger cadence and the server itself are wired by the `cli` crate;
//! this module owns the interval-to-trigger mapping and the tick loop's
//! control flow, ported from the shape of the teacher's sidecar run loop.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};
use vaultbot_tokio::notify_once::NotifyOnce;

use crate::clock::now_secs;
use crate::config::Config;
use crate::engine;
use crate::error::StoreError;
use crate::ledger::LedgerAdapter;
use crate::model::{LockType, RoundType};
use crate::store::Store;
use crate::{buy_job, reward_job, scanner};

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);
const SCAN_PERIOD: Duration = Duration::from_secs(600);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Maps a configured interval in seconds to a polling cadence for that
/// trigger (§4.10). The scheduler re-checks "has enough time elapsed
/// since the last round" at this cadence rather than sleeping for the
/// full interval, so a late config change or a missed tick is corrected
/// on the next poll instead of drifting forever.
pub fn trigger_poll_period(interval_secs: u64) -> Duration {
    if interval_secs < 60 {
        Duration::from_secs(60)
    } else if interval_secs < 3600 {
        Duration::from_secs(60 * (interval_secs / 60).max(1))
    } else if interval_secs < 86_400 {
        Duration::from_secs(3600 * (interval_secs / 3600).max(1))
    } else {
        Duration::from_secs(86_400)
    }
}

/// Shared scheduler state, constructed once at startup and handed to the
/// tick loop and the status HTTP server alike.
pub struct Scheduler<L: LedgerAdapter> {
    pub store: Store,
    pub ledger: L,
    pub config: Config,
    pub treasury_address: String,
    shutdown: NotifyOnce,
    scanning: tokio::sync::Mutex<()>,
}

impl<L: LedgerAdapter + Send + Sync + 'static> Scheduler<L> {
    pub fn new(store: Store, ledger: L, config: Config, treasury_address: String) -> Arc<Self> {
        Arc::new(Scheduler {
            store,
            ledger,
            config,
            treasury_address,
            shutdown: NotifyOnce::new(),
            scanning: tokio::sync::Mutex::new(()),
        })
    }

    /// Startup housekeeping common to every run mode (§4.10 step "Init"):
    /// clear stale locks, verify the ledger adapter is reachable, and run
    /// an initial scan before any periodic trigger fires.
    pub async fn init(&self) -> Result<(), StoreError> {
        let now = now_secs();
        self.store.clear_stale_locks(
            self.config.stale_lock_max_age().as_secs() as i64,
            now,
        )?;

        if let Err(e) = self.ledger.get_latest_blockhash().await {
            warn!(error = %e, "ledger adapter unreachable at startup");
        }

        self.run_scan().await?;
        self.store.set_heartbeat(now)?;
        Ok(())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send();
    }

    /// A clone of the shutdown handle, for callers (e.g. the status server)
    /// that need to wind down alongside the scheduler.
    pub fn shutdown_handle(&self) -> NotifyOnce {
        self.shutdown.clone()
    }

    /// Runs the tick loop until shutdown is requested. Each tick checks
    /// every trigger's timing guard independently; triggers never block
    /// each other (§4.10).
    pub async fn run(self: &Arc<Self>) -> Result<(), StoreError> {
        let mut last_heartbeat = now_secs();
        let mut last_scan_attempt = now_secs();
        let mut shutdown_rx = self.shutdown.clone();

        // The loop re-checks both job guards at the finer of the two
        // configured intervals' poll cadence (§4.10), so a trigger is never
        // missed by more than one poll period.
        let tick_period = trigger_poll_period(self.config.buy_interval_secs)
            .min(trigger_poll_period(self.config.reward_interval_secs));

        loop {
            if self.shutdown.try_recv() {
                break;
            }

            let now = now_secs();

            if now - last_heartbeat >= HEARTBEAT_PERIOD.as_secs() as i64 {
                self.store.set_heartbeat(now)?;
                last_heartbeat = now;
            }

            self.maybe_run_buy(now).await?;
            self.maybe_run_reward(now).await?;

            if now - last_scan_attempt >= SCAN_PERIOD.as_secs() as i64 {
                last_scan_attempt = now;
                let this = Arc::clone(self);
                vaultbot_tokio::task::LxTask::spawn("periodic-scan", async move {
                    if let Err(e) = this.run_scan().await {
                        warn!(error = %e, "periodic scan failed");
                    }
                })
                .detach();
            }

            tokio::select! {
                _ = tokio::time::sleep(tick_period) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        self.shutdown_sequence().await
    }

    async fn maybe_run_buy(&self, now: i64) -> Result<(), StoreError> {
        let last = self.store.latest_round(RoundType::Buy)?;
        let due = last
            .map(|r| now - r.ts >= self.config.buy_interval_secs as i64)
            .unwrap_or(true);
        if !due {
            return Ok(());
        }

        let config = &self.config;
        let store = &self.store;
        let ledger = &self.ledger;
        let treasury_address = &self.treasury_address;

        // Balance pre-check (§4.10): skip before touching the engine at all
        // if the treasury is already below the configured reserve.
        match ledger.get_native_balance(treasury_address).await {
            Ok(balance) => {
                let balance_sol = Decimal::from(balance.0) / Decimal::from(LAMPORTS_PER_SOL);
                if balance_sol < config.min_treasury_native_reserve_sol {
                    info!(
                        %balance_sol,
                        reserve = %config.min_treasury_native_reserve_sol,
                        "skipping buy job: treasury below minimum native reserve"
                    );
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, "balance pre-check failed, running buy job anyway"),
        }

        let outcome = engine::run_guarded(
            store,
            LockType::BuyJob,
            Duration::from_millis(config.buy_job_timeout_ms),
            config.max_consecutive_rpc_errors,
            || async {
                buy_job::run(store, ledger, config, treasury_address, now)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            },
        )
        .await?;
        info!(?outcome, "buy job tick");
        Ok(())
    }

    async fn maybe_run_reward(&self, now: i64) -> Result<(), StoreError> {
        let last = self.store.latest_round(RoundType::Reward)?;
        let due = last
            .map(|r| now - r.ts >= self.config.reward_interval_secs as i64)
            .unwrap_or(true);
        if !due {
            return Ok(());
        }

        let config = &self.config;
        let store = &self.store;
        let ledger = &self.ledger;
        let treasury_address = &self.treasury_address;

        // Balance pre-check (§4.10): skip before touching the engine at all
        // if the treasury doesn't hold enough reward tokens yet.
        match ledger.get_token_balance(treasury_address, &config.token_mint).await {
            Ok(balance) => {
                if balance.0 < config.min_treasury_token_balance_for_reward {
                    info!(
                        balance = balance.0,
                        minimum = config.min_treasury_token_balance_for_reward,
                        "skipping reward job: treasury below minimum reward token balance"
                    );
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, "balance pre-check failed, running reward job anyway"),
        }

        let outcome = engine::run_guarded(
            store,
            LockType::RewardJob,
            Duration::from_millis(config.reward_job_timeout_ms),
            config.max_consecutive_rpc_errors,
            || async {
                reward_job::run(store, ledger, config, treasury_address, now)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            },
        )
        .await?;
        info!(?outcome, "reward job tick");
        Ok(())
    }

    /// Runs an incremental scan, guarded by an in-process flag so two
    /// overlapping scan attempts (a periodic tick racing a reward job's
    /// own scan) never run concurrently (§4.10).
    async fn run_scan(&self) -> Result<(), StoreError> {
        let Ok(_guard) = self.scanning.try_lock() else {
            return Ok(());
        };
        scanner::incremental(
            &self.store,
            &self.ledger,
            &self.treasury_address,
            &self.config.token_mint,
            self.config.scan_signature_limit as u32,
        )
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Graceful shutdown (§4.10): stop accepting new triggers, wait up to
    /// [`SHUTDOWN_GRACE`] for any in-flight scan to finish, then flush the
    /// store. Safe to call more than once.
    async fn shutdown_sequence(&self) -> Result<(), StoreError> {
        info!("scheduler shutting down");
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, self.scanning.lock()).await;
        self.store.flush()?;
        Ok(())
    }
}
