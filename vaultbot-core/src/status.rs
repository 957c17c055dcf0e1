//! The status snapshot (C13, projector half): assembles the read-only
//! JSON view of bot state, plus its tamper-evidence checksum (§4.11).
//! The HTTP surface that serves this snapshot lives in the `cli` crate.

use ring::digest;
use serde::Serialize;

use crate::config::Config;
use crate::error::StoreError;
use crate::model::RoundType;
use crate::store::Store;

const HEARTBEAT_STALE_AFTER_SECS: i64 = 60;

/// The fields covered by the checksum, in the exact order they're
/// concatenated (§4.11). Keeping this as its own struct (rather than
/// slicing the full snapshot) makes the covered/uncovered boundary
/// explicit.
#[derive(Debug, Serialize)]
struct ChecksumFields {
    now: i64,
    bot_online: bool,
    safe_mode: bool,
    last_buy_ts: Option<i64>,
    last_reward_ts: Option<i64>,
    next_buy_ts: Option<i64>,
    next_reward_ts: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub now: i64,
    pub source_of_truth: &'static str,
    pub bot_online: bool,
    pub heartbeat_age_seconds: i64,
    pub safe_mode: bool,
    pub safe_mode_reason: Option<String>,
    pub dry_run: bool,
    pub last_buy_ts: Option<i64>,
    pub last_reward_ts: Option<i64>,
    pub next_buy_ts: Option<i64>,
    pub next_reward_ts: Option<i64>,
    pub buy_interval_seconds: u64,
    pub reward_interval_seconds: u64,
    pub buy_in_progress: bool,
    pub reward_in_progress: bool,
    pub last_buy_tx: Option<String>,
    pub last_reward_txs: Vec<String>,
    pub checksum: String,
}

/// Builds the current status snapshot from store state (§4.11).
pub fn build_snapshot(store: &Store, config: &Config, now: i64) -> Result<StatusSnapshot, StoreError> {
    let heartbeat = store.get_heartbeat()?;
    // -1 is the spec's sentinel for "no heartbeat recorded yet", distinct
    // from a numeric age so JSON consumers doing arithmetic/comparisons on
    // this field never see `null` (§4.11).
    let heartbeat_age_seconds = heartbeat.map(|hb| now - hb).unwrap_or(-1);
    let bot_online = heartbeat.is_some() && heartbeat_age_seconds < HEARTBEAT_STALE_AFTER_SECS;

    let safe_mode = store.is_safe_mode()?;
    let safe_mode_reason = store.safe_mode_reason()?;

    let last_buy = store.latest_round(RoundType::Buy)?;
    let last_reward = store.latest_round(RoundType::Reward)?;

    let last_buy_ts = last_buy.as_ref().map(|r| r.ts);
    let last_reward_ts = last_reward.as_ref().map(|r| r.ts);

    let next_buy_ts = last_buy_ts.map(|ts| ts + config.buy_interval_secs as i64);
    let next_reward_ts = last_reward_ts.map(|ts| ts + config.reward_interval_secs as i64);

    let buy_in_progress = store.lock_held(crate::model::LockType::BuyJob)?;
    let reward_in_progress = store.lock_held(crate::model::LockType::RewardJob)?;

    let last_buy_tx = last_buy.as_ref().and_then(|r| r.txs.first().cloned());
    let last_reward_txs = last_reward.as_ref().map(|r| r.txs.clone()).unwrap_or_default();

    let checksum_fields = ChecksumFields {
        now,
        bot_online,
        safe_mode,
        last_buy_ts,
        last_reward_ts,
        next_buy_ts,
        next_reward_ts,
    };
    let checksum = compute_checksum(&checksum_fields);

    Ok(StatusSnapshot {
        now,
        source_of_truth: "server",
        bot_online,
        heartbeat_age_seconds,
        safe_mode,
        safe_mode_reason,
        dry_run: config.dry_run,
        last_buy_ts,
        last_reward_ts,
        next_buy_ts,
        next_reward_ts,
        buy_interval_seconds: config.buy_interval_secs,
        reward_interval_seconds: config.reward_interval_secs,
        buy_in_progress,
        reward_in_progress,
        last_buy_tx,
        last_reward_txs,
        checksum,
    })
}

/// First 16 hex characters of the SHA-256 digest of the checksum fields'
/// canonical JSON encoding (§4.11). Intended as a tamper-evidence hint for
/// API consumers, not a cryptographic commitment.
fn compute_checksum(fields: &ChecksumFields) -> String {
    let json = serde_json::to_vec(fields).expect("checksum fields always serialize");
    let digest = digest::digest(&digest::SHA256, &json);
    let hex: String = digest.as_ref().iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_config() -> Config {
        Config::validate(crate::config::ConfigInput {
            rpc_url: Some("https://rpc".into()),
            indexer_api_key: Some("k".into()),
            token_mint: Some("MINT".into()),
            treasury_address: Some("treasury".into()),
            treasury_key_path: Some("/secrets/key.json".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn bot_offline_when_no_heartbeat_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let config = test_config();
        let snapshot = build_snapshot(&store, &config, 1000).unwrap();
        assert!(!snapshot.bot_online);
        assert_eq!(snapshot.heartbeat_age_seconds, -1);
    }

    #[test]
    fn bot_online_shortly_after_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.set_heartbeat(1000).unwrap();
        let config = test_config();
        let snapshot = build_snapshot(&store, &config, 1010).unwrap();
        assert!(snapshot.bot_online);
    }

    #[test]
    fn checksum_changes_when_safe_mode_flips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let config = test_config();

        let before = build_snapshot(&store, &config, 1000).unwrap();
        store.enter_safe_mode("test").unwrap();
        let after = build_snapshot(&store, &config, 1000).unwrap();

        assert_ne!(before.checksum, after.checksum);
        assert_eq!(after.checksum.len(), 16);
    }

    #[test]
    fn next_timestamps_derive_from_last_round_plus_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .insert_round(&crate::model::Round {
                id: "r1".into(),
                round_type: RoundType::Buy,
                ts: 1000,
                txs: vec![],
                meta: serde_json::json!({}),
            })
            .unwrap();
        let config = test_config();
        let snapshot = build_snapshot(&store, &config, 1500).unwrap();
        assert_eq!(
            snapshot.next_buy_ts,
            Some(1000 + config.buy_interval_secs as i64)
        );
        assert_eq!(snapshot.next_reward_ts, None);
    }
}
