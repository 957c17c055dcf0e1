//! VaultBot CLI argument surface.
//!
//! Follows the `OrEnvExt` pattern from the teacher's `common::or_env`: CLI
//! flags take priority, falling back to an environment variable of the
//! same semantic name when the flag is absent. Ported inline here since
//! the crate it lived in no longer exists in this workspace.

use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;
use vaultbot_core::config::ConfigInput;

/// Reads `self` from an env var if it's currently `None`/`false`.
pub trait OrEnvExt: Sized {
    fn or_env(self, env_var: &str) -> anyhow::Result<Self>;
    fn or_env_mut(&mut self, env_var: &str) -> anyhow::Result<&mut Self>;
}

impl<T: FromStr> OrEnvExt for Option<T>
where
    T::Err: std::fmt::Display,
{
    fn or_env(self, env_var: &str) -> anyhow::Result<Self> {
        if self.is_some() {
            return Ok(self);
        }
        match std::env::var(env_var) {
            Ok(raw) => {
                let value = raw
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("invalid value for {env_var}: {e}"))?;
                Ok(Some(value))
            }
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(anyhow::anyhow!("{env_var} is not valid UTF-8"))
            }
        }
    }

    fn or_env_mut(&mut self, env_var: &str) -> anyhow::Result<&mut Self> {
        if self.is_none() {
            *self = std::mem::take(self).or_env(env_var)?;
        }
        Ok(self)
    }
}

impl OrEnvExt for bool {
    fn or_env(self, env_var: &str) -> anyhow::Result<Self> {
        if self {
            return Ok(self);
        }
        match std::env::var(env_var) {
            Ok(raw) => raw
                .parse::<bool>()
                .map_err(|e| anyhow::anyhow!("invalid value for {env_var}: {e}")),
            Err(std::env::VarError::NotPresent) => Ok(false),
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(anyhow::anyhow!("{env_var} is not valid UTF-8"))
            }
        }
    }

    fn or_env_mut(&mut self, env_var: &str) -> anyhow::Result<&mut Self> {
        *self = (*self).or_env(env_var)?;
        Ok(self)
    }
}

/// One of the five mutually exclusive run modes (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Scheduler,
    Bootstrap,
    OnceBuy,
    OnceReward,
    ExitSafeMode,
}

/// VaultBot: an autonomous on-chain treasury bot.
#[derive(argh::FromArgs)]
pub struct VaultBotArgs {
    /// run a large bootstrap scan, then exit.
    #[argh(switch)]
    pub bootstrap: bool,

    /// guard and run a single buy job, then exit.
    #[argh(switch)]
    pub once_buy: bool,

    /// guard and run a single reward job, then exit.
    #[argh(switch)]
    pub once_reward: bool,

    /// clear the latched safe-mode flag, then exit.
    #[argh(switch)]
    pub exit_safe_mode: bool,

    /// JSON-RPC endpoint. Env: `RPC_URL`.
    #[argh(option)]
    pub rpc_url: Option<String>,

    /// enriched-transaction indexer API key. Env: `INDEXER_API_KEY`.
    #[argh(option)]
    pub indexer_api_key: Option<String>,

    /// the token mint being bought and distributed. Env: `TOKEN_MINT`.
    #[argh(option)]
    pub token_mint: Option<String>,

    /// the treasury's public address. Env: `TREASURY_ADDRESS`.
    #[argh(option)]
    pub treasury_address: Option<String>,

    /// path to the treasury signer's key file. Env: `TREASURY_KEY_PATH`.
    #[argh(option)]
    pub treasury_key_path: Option<PathBuf>,

    /// directory holding the embedded store and public transparency files.
    /// Env: `DATA_DIR`.
    #[argh(option)]
    pub data_dir: Option<PathBuf>,

    /// simulate swaps/transfers instead of submitting them. Env: `DRY_RUN`.
    #[argh(option)]
    pub dry_run: Option<bool>,

    /// seconds between buy rounds. Env: `BUY_INTERVAL_SECS`.
    #[argh(option)]
    pub buy_interval_secs: Option<u64>,

    /// seconds between reward rounds. Env: `REWARD_INTERVAL_SECS`.
    #[argh(option)]
    pub reward_interval_secs: Option<u64>,

    /// minimum wallet age, in days, to be reward-eligible. Env:
    /// `MIN_WALLET_AGE_DAYS`.
    #[argh(option)]
    pub min_wallet_age_days: Option<u64>,

    /// minimum unbroken holding duration, in seconds, to be reward-eligible.
    /// Env: `MIN_CONTINUITY_SECS`.
    #[argh(option)]
    pub min_continuity_secs: Option<u64>,

    /// minimum cumulative buy-detected volume, in SOL, to be reward-eligible.
    /// Env: `MIN_CUMULATIVE_BUY_SOL`.
    #[argh(option)]
    pub min_cumulative_buy_sol: Option<Decimal>,

    /// number of lottery winners drawn per reward round. Env:
    /// `WINNERS_PER_ROUND`.
    #[argh(option)]
    pub winners_per_round: Option<u32>,

    /// native-coin balance, in SOL, reserved for fees and never spent on
    /// buys. Env: `NATIVE_FEE_RESERVE_SOL`.
    #[argh(option)]
    pub native_fee_reserve_sol: Option<Decimal>,

    /// minimum buy size, in SOL, below which a round is skipped. Env:
    /// `MIN_BUY_SOL`.
    #[argh(option)]
    pub min_buy_sol: Option<Decimal>,

    /// maximum buy size, in SOL, spent in a single round. Env:
    /// `MAX_BUY_PER_INTERVAL_SOL`.
    #[argh(option)]
    pub max_buy_per_interval_sol: Option<Decimal>,

    /// swap slippage tolerance, in basis points. Env: `SLIPPAGE_BPS`.
    #[argh(option)]
    pub slippage_bps: Option<u16>,

    /// percent (bps) of treasury token balance distributed per reward
    /// round. Env: `REWARD_PCT_BPS`.
    #[argh(option)]
    pub reward_pct_bps: Option<u16>,

    /// hard cap (bps) on the reward percent, regardless of config. Env:
    /// `MAX_REWARD_PCT_BPS`.
    #[argh(option)]
    pub max_reward_pct_bps: Option<u16>,

    /// maximum winner transfers batched into a single transaction. Env:
    /// `MAX_SENDS_PER_TX`.
    #[argh(option)]
    pub max_sends_per_tx: Option<u32>,

    /// signature page size used during `--bootstrap`. Env:
    /// `BOOTSTRAP_SIGNATURE_LIMIT`.
    #[argh(option)]
    pub bootstrap_signature_limit: Option<u64>,

    /// signature page size used during an incremental scan. Env:
    /// `SCAN_SIGNATURE_LIMIT`.
    #[argh(option)]
    pub scan_signature_limit: Option<u64>,

    /// port the status HTTP server listens on. Env: `STATUS_PORT`.
    #[argh(option)]
    pub status_port: Option<u16>,

    /// allowed CORS origin for the status endpoint, or `"*"`. Env:
    /// `CORS_ALLOWED_ORIGIN`.
    #[argh(option)]
    pub cors_allowed_origin: Option<String>,

    /// buy job timeout, in milliseconds. Env: `BUY_JOB_TIMEOUT_MS`.
    #[argh(option)]
    pub buy_job_timeout_ms: Option<u64>,

    /// reward job timeout, in milliseconds. Env: `REWARD_JOB_TIMEOUT_MS`.
    #[argh(option)]
    pub reward_job_timeout_ms: Option<u64>,

    /// minimum treasury native balance, in SOL, required to attempt a buy.
    /// Env: `MIN_TREASURY_NATIVE_RESERVE_SOL`.
    #[argh(option)]
    pub min_treasury_native_reserve_sol: Option<Decimal>,

    /// minimum treasury token balance (raw units) required to attempt a
    /// reward round. Env: `MIN_TREASURY_TOKEN_BALANCE_FOR_REWARD`.
    #[argh(option)]
    pub min_treasury_token_balance_for_reward: Option<u128>,

    /// consecutive transient RPC errors before safe-mode trips. Env:
    /// `MAX_CONSECUTIVE_RPC_ERRORS`.
    #[argh(option)]
    pub max_consecutive_rpc_errors: Option<u32>,
}

impl VaultBotArgs {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut args = argh::from_env::<Self>();

        args.rpc_url.or_env_mut("RPC_URL")?;
        args.indexer_api_key.or_env_mut("INDEXER_API_KEY")?;
        args.token_mint.or_env_mut("TOKEN_MINT")?;
        args.treasury_address.or_env_mut("TREASURY_ADDRESS")?;
        args.treasury_key_path.or_env_mut("TREASURY_KEY_PATH")?;
        args.data_dir.or_env_mut("DATA_DIR")?;
        args.dry_run.or_env_mut("DRY_RUN")?;
        args.buy_interval_secs.or_env_mut("BUY_INTERVAL_SECS")?;
        args.reward_interval_secs.or_env_mut("REWARD_INTERVAL_SECS")?;
        args.min_wallet_age_days.or_env_mut("MIN_WALLET_AGE_DAYS")?;
        args.min_continuity_secs.or_env_mut("MIN_CONTINUITY_SECS")?;
        args.min_cumulative_buy_sol
            .or_env_mut("MIN_CUMULATIVE_BUY_SOL")?;
        args.winners_per_round.or_env_mut("WINNERS_PER_ROUND")?;
        args.native_fee_reserve_sol
            .or_env_mut("NATIVE_FEE_RESERVE_SOL")?;
        args.min_buy_sol.or_env_mut("MIN_BUY_SOL")?;
        args.max_buy_per_interval_sol
            .or_env_mut("MAX_BUY_PER_INTERVAL_SOL")?;
        args.slippage_bps.or_env_mut("SLIPPAGE_BPS")?;
        args.reward_pct_bps.or_env_mut("REWARD_PCT_BPS")?;
        args.max_reward_pct_bps.or_env_mut("MAX_REWARD_PCT_BPS")?;
        args.max_sends_per_tx.or_env_mut("MAX_SENDS_PER_TX")?;
        args.bootstrap_signature_limit
            .or_env_mut("BOOTSTRAP_SIGNATURE_LIMIT")?;
        args.scan_signature_limit
            .or_env_mut("SCAN_SIGNATURE_LIMIT")?;
        args.status_port.or_env_mut("STATUS_PORT")?;
        args.cors_allowed_origin
            .or_env_mut("CORS_ALLOWED_ORIGIN")?;
        args.buy_job_timeout_ms.or_env_mut("BUY_JOB_TIMEOUT_MS")?;
        args.reward_job_timeout_ms
            .or_env_mut("REWARD_JOB_TIMEOUT_MS")?;
        args.min_treasury_native_reserve_sol
            .or_env_mut("MIN_TREASURY_NATIVE_RESERVE_SOL")?;
        args.min_treasury_token_balance_for_reward
            .or_env_mut("MIN_TREASURY_TOKEN_BALANCE_FOR_REWARD")?;
        args.max_consecutive_rpc_errors
            .or_env_mut("MAX_CONSECUTIVE_RPC_ERRORS")?;

        Ok(args)
    }

    /// The single selected run mode. `--bootstrap`, `--once-buy`,
    /// `--once-reward`, and `--exit-safe-mode` are mutually exclusive.
    pub fn run_mode(&self) -> anyhow::Result<RunMode> {
        let flags = [
            self.bootstrap,
            self.once_buy,
            self.once_reward,
            self.exit_safe_mode,
        ];
        if flags.iter().filter(|set| **set).count() > 1 {
            return Err(anyhow::anyhow!(
                "--bootstrap, --once-buy, --once-reward, and \
                 --exit-safe-mode are mutually exclusive"
            ));
        }
        if self.bootstrap {
            Ok(RunMode::Bootstrap)
        } else if self.once_buy {
            Ok(RunMode::OnceBuy)
        } else if self.once_reward {
            Ok(RunMode::OnceReward)
        } else if self.exit_safe_mode {
            Ok(RunMode::ExitSafeMode)
        } else {
            Ok(RunMode::Scheduler)
        }
    }

    pub fn into_config_input(self) -> ConfigInput {
        ConfigInput {
            rpc_url: self.rpc_url,
            indexer_api_key: self.indexer_api_key,
            token_mint: self.token_mint,
            treasury_address: self.treasury_address,
            treasury_key_path: self.treasury_key_path,
            data_dir: self.data_dir,
            dry_run: self.dry_run,
            buy_interval_secs: self.buy_interval_secs,
            reward_interval_secs: self.reward_interval_secs,
            min_wallet_age_days: self.min_wallet_age_days,
            min_continuity_secs: self.min_continuity_secs,
            min_cumulative_buy_sol: self.min_cumulative_buy_sol,
            winners_per_round: self.winners_per_round,
            native_fee_reserve_sol: self.native_fee_reserve_sol,
            min_buy_sol: self.min_buy_sol,
            max_buy_per_interval_sol: self.max_buy_per_interval_sol,
            slippage_bps: self.slippage_bps,
            reward_pct_bps: self.reward_pct_bps,
            max_reward_pct_bps: self.max_reward_pct_bps,
            max_sends_per_tx: self.max_sends_per_tx,
            bootstrap_signature_limit: self.bootstrap_signature_limit,
            scan_signature_limit: self.scan_signature_limit,
            status_port: self.status_port,
            cors_allowed_origin: self.cors_allowed_origin,
            buy_job_timeout_ms: self.buy_job_timeout_ms,
            reward_job_timeout_ms: self.reward_job_timeout_ms,
            min_treasury_native_reserve_sol: self.min_treasury_native_reserve_sol,
            min_treasury_token_balance_for_reward: self
                .min_treasury_token_balance_for_reward,
            max_consecutive_rpc_errors: self.max_consecutive_rpc_errors,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn env_fallback_fills_missing_option() {
        // SAFETY: no other test in this process touches this key.
        unsafe { std::env::set_var("VAULTBOT_CLI_TEST_PORT", "9001") };
        let mut port: Option<u16> = None;
        port.or_env_mut("VAULTBOT_CLI_TEST_PORT").unwrap();
        assert_eq!(port, Some(9001));
        unsafe { std::env::remove_var("VAULTBOT_CLI_TEST_PORT") };
    }

    #[test]
    fn explicit_value_is_never_overridden_by_env() {
        unsafe { std::env::set_var("VAULTBOT_CLI_TEST_PORT2", "9001") };
        let mut port: Option<u16> = Some(1234);
        port.or_env_mut("VAULTBOT_CLI_TEST_PORT2").unwrap();
        assert_eq!(port, Some(1234));
        unsafe { std::env::remove_var("VAULTBOT_CLI_TEST_PORT2") };
    }
}
