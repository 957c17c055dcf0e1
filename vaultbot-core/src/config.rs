//! Typed, validated process-wide configuration (C1).
//!
//! Parsing raw strings from the CLI/environment is the `cli` crate's job
//! (it follows the `OrEnvExt` pattern from the teacher's `common::or_env`).
//! This module only owns the *typed, validated* shape and the validation
//! rules themselves, so the rules can be unit tested without touching
//! `argh` or environment variables at all.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::ConfigError;

/// Every raw input the bot needs, already parsed into its target type but
/// not yet range-checked. `None` means "not provided" and falls back to
/// the field's documented default (if any) or a missing-key error.
#[derive(Debug, Clone, Default)]
pub struct ConfigInput {
    pub rpc_url: Option<String>,
    pub indexer_api_key: Option<String>,
    pub token_mint: Option<String>,
    pub treasury_address: Option<String>,
    pub treasury_key_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub dry_run: Option<bool>,
    pub buy_interval_secs: Option<u64>,
    pub reward_interval_secs: Option<u64>,
    pub min_wallet_age_days: Option<u64>,
    pub min_continuity_secs: Option<u64>,
    pub min_cumulative_buy_sol: Option<Decimal>,
    pub winners_per_round: Option<u32>,
    pub native_fee_reserve_sol: Option<Decimal>,
    pub min_buy_sol: Option<Decimal>,
    pub max_buy_per_interval_sol: Option<Decimal>,
    pub slippage_bps: Option<u16>,
    pub reward_pct_bps: Option<u16>,
    pub max_reward_pct_bps: Option<u16>,
    pub max_sends_per_tx: Option<u32>,
    pub bootstrap_signature_limit: Option<u64>,
    pub scan_signature_limit: Option<u64>,
    pub status_port: Option<u16>,
    pub cors_allowed_origin: Option<String>,
    pub buy_job_timeout_ms: Option<u64>,
    pub reward_job_timeout_ms: Option<u64>,
    pub min_treasury_native_reserve_sol: Option<Decimal>,
    pub min_treasury_token_balance_for_reward: Option<u128>,
    pub max_consecutive_rpc_errors: Option<u32>,
}

/// Fully validated, immutable configuration. Constructed once at startup
/// via [`Config::validate`] and then shared (`Arc`) across the process.
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub indexer_api_key: String,
    pub token_mint: String,
    pub treasury_address: String,
    pub treasury_key_path: PathBuf,
    pub data_dir: PathBuf,
    pub dry_run: bool,
    pub buy_interval_secs: u64,
    pub reward_interval_secs: u64,
    pub min_wallet_age_days: u64,
    pub min_continuity_secs: u64,
    pub min_cumulative_buy_sol: Decimal,
    pub winners_per_round: u32,
    pub native_fee_reserve_sol: Decimal,
    pub min_buy_sol: Decimal,
    pub max_buy_per_interval_sol: Decimal,
    pub slippage_bps: u16,
    pub reward_pct_bps: u16,
    pub max_reward_pct_bps: u16,
    pub max_sends_per_tx: u32,
    pub bootstrap_signature_limit: u64,
    pub scan_signature_limit: u64,
    pub status_port: u16,
    pub cors_allowed_origin: String,
    pub buy_job_timeout_ms: u64,
    pub reward_job_timeout_ms: u64,
    pub min_treasury_native_reserve_sol: Decimal,
    pub min_treasury_token_balance_for_reward: u128,
    pub max_consecutive_rpc_errors: u32,
}

impl Config {
    pub fn buy_interval(&self) -> Duration {
        Duration::from_secs(self.buy_interval_secs)
    }

    pub fn reward_interval(&self) -> Duration {
        Duration::from_secs(self.reward_interval_secs)
    }

    /// `clear_stale` is called once at startup with `2 * max(buyInterval,
    /// rewardInterval)` per spec §4.1.
    pub fn stale_lock_max_age(&self) -> Duration {
        let longest = self.buy_interval_secs.max(self.reward_interval_secs);
        Duration::from_secs(longest.saturating_mul(2))
    }

    pub fn validate(input: ConfigInput) -> Result<Self, ConfigError> {
        fn required<T>(
            field: Option<T>,
            key: &'static str,
        ) -> Result<T, ConfigError> {
            field.ok_or(ConfigError::Missing(key))
        }

        let rpc_url = required(input.rpc_url, "RPC_URL")?;
        let indexer_api_key = required(input.indexer_api_key, "INDEXER_API_KEY")?;
        let token_mint = required(input.token_mint, "TOKEN_MINT")?;
        let treasury_address = required(input.treasury_address, "TREASURY_ADDRESS")?;
        let treasury_key_path =
            required(input.treasury_key_path, "TREASURY_KEY_PATH")?;
        let data_dir = input.data_dir.unwrap_or_else(|| PathBuf::from("data"));
        let dry_run = input.dry_run.unwrap_or(true);

        let buy_interval_secs = input.buy_interval_secs.unwrap_or(3600);
        let reward_interval_secs = input.reward_interval_secs.unwrap_or(7200);
        if buy_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "BUY_INTERVAL_SECS",
                reason: "must be > 0".into(),
            });
        }
        if reward_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "REWARD_INTERVAL_SECS",
                reason: "must be > 0".into(),
            });
        }

        let min_wallet_age_days = input.min_wallet_age_days.unwrap_or(7);
        let min_continuity_secs = input.min_continuity_secs.unwrap_or(86400);
        let min_cumulative_buy_sol = input
            .min_cumulative_buy_sol
            .unwrap_or(Decimal::ZERO);

        let winners_per_round = input.winners_per_round.unwrap_or(10);
        if winners_per_round == 0 {
            return Err(ConfigError::Invalid {
                key: "WINNERS_PER_ROUND",
                reason: "must be > 0".into(),
            });
        }

        let native_fee_reserve_sol =
            input.native_fee_reserve_sol.unwrap_or(Decimal::new(3, 2)); // 0.03
        let min_buy_sol = input.min_buy_sol.unwrap_or(Decimal::new(1, 2)); // 0.01
        let max_buy_per_interval_sol = input
            .max_buy_per_interval_sol
            .unwrap_or(Decimal::new(2, 1)); // 0.2
        if max_buy_per_interval_sol < min_buy_sol {
            return Err(ConfigError::Invalid {
                key: "MAX_BUY_PER_INTERVAL_SOL",
                reason: "must be >= MIN_BUY_SOL".into(),
            });
        }

        let slippage_bps = input.slippage_bps.unwrap_or(100);
        let reward_pct_bps = input.reward_pct_bps.unwrap_or(500);
        let max_reward_pct_bps = input.max_reward_pct_bps.unwrap_or(1000);
        if max_reward_pct_bps > 10_000 {
            return Err(ConfigError::Invalid {
                key: "MAX_REWARD_PCT_BPS",
                reason: "must be <= 10000".into(),
            });
        }
        if reward_pct_bps > max_reward_pct_bps {
            return Err(ConfigError::Invalid {
                key: "REWARD_PCT_BPS",
                reason: "must be <= MAX_REWARD_PCT_BPS".into(),
            });
        }

        let max_sends_per_tx = input.max_sends_per_tx.unwrap_or(10);
        let bootstrap_signature_limit =
            input.bootstrap_signature_limit.unwrap_or(10_000);
        let scan_signature_limit = input.scan_signature_limit.unwrap_or(1_000);
        let status_port = input.status_port.unwrap_or(8080);
        let cors_allowed_origin =
            input.cors_allowed_origin.unwrap_or_else(|| "*".to_string());
        let buy_job_timeout_ms = input.buy_job_timeout_ms.unwrap_or(60_000);
        let reward_job_timeout_ms =
            input.reward_job_timeout_ms.unwrap_or(120_000);
        let min_treasury_native_reserve_sol = input
            .min_treasury_native_reserve_sol
            .unwrap_or(Decimal::new(5, 2)); // 0.05
        let min_treasury_token_balance_for_reward = input
            .min_treasury_token_balance_for_reward
            .unwrap_or(0);
        let max_consecutive_rpc_errors =
            input.max_consecutive_rpc_errors.unwrap_or(3);
        if max_consecutive_rpc_errors == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONSECUTIVE_RPC_ERRORS",
                reason: "must be > 0".into(),
            });
        }

        Ok(Config {
            rpc_url,
            indexer_api_key,
            token_mint,
            treasury_address,
            treasury_key_path,
            data_dir,
            dry_run,
            buy_interval_secs,
            reward_interval_secs,
            min_wallet_age_days,
            min_continuity_secs,
            min_cumulative_buy_sol,
            winners_per_round,
            native_fee_reserve_sol,
            min_buy_sol,
            max_buy_per_interval_sol,
            slippage_bps,
            reward_pct_bps,
            max_reward_pct_bps,
            max_sends_per_tx,
            bootstrap_signature_limit,
            scan_signature_limit,
            status_port,
            cors_allowed_origin,
            buy_job_timeout_ms,
            reward_job_timeout_ms,
            min_treasury_native_reserve_sol,
            min_treasury_token_balance_for_reward,
            max_consecutive_rpc_errors,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal_input() -> ConfigInput {
        ConfigInput {
            rpc_url: Some("https://rpc.example.com".into()),
            indexer_api_key: Some("key".into()),
            token_mint: Some("Mint111".into()),
            treasury_address: Some("treasury".into()),
            treasury_key_path: Some(PathBuf::from("/secrets/treasury.json")),
            ..Default::default()
        }
    }

    #[test]
    fn missing_required_key_errors() {
        let input = ConfigInput::default();
        let err = Config::validate(input).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("RPC_URL")));
    }

    #[test]
    fn defaults_apply_when_optional_fields_absent() {
        let cfg = Config::validate(minimal_input()).unwrap();
        assert_eq!(cfg.buy_interval_secs, 3600);
        assert_eq!(cfg.reward_interval_secs, 7200);
        assert!(cfg.dry_run);
    }

    #[test]
    fn reward_pct_above_cap_is_rejected() {
        let mut input = minimal_input();
        input.max_reward_pct_bps = Some(500);
        input.reward_pct_bps = Some(1000);
        let err = Config::validate(input).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "REWARD_PCT_BPS", .. }));
    }

    #[test]
    fn max_buy_below_min_buy_is_rejected() {
        let mut input = minimal_input();
        input.min_buy_sol = Some(Decimal::new(5, 1));
        input.max_buy_per_interval_sol = Some(Decimal::new(1, 1));
        let err = Config::validate(input).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "MAX_BUY_PER_INTERVAL_SOL",
                ..
            }
        ));
    }

    #[test]
    fn stale_lock_max_age_is_twice_the_longest_interval() {
        let mut input = minimal_input();
        input.buy_interval_secs = Some(100);
        input.reward_interval_secs = Some(50);
        let cfg = Config::validate(input).unwrap();
        assert_eq!(cfg.stale_lock_max_age(), Duration::from_secs(200));
    }
}
