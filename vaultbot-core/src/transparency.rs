//! Side-file transparency artifacts (C15, §4.15): best-effort JSON/JSONL
//! snapshots of the latest buy/reward attempt, written under a `public/`
//! directory for external observers. Never authoritative — the store is.
//! A write failure here is logged and swallowed; it must never fail a job.

use std::path::Path;

use tracing::warn;

use crate::model::{Round, RoundType};

const LAST_BUY_FILE: &str = "last_buy.json";
const LAST_REWARD_FILE: &str = "last_reward.json";
const HISTORY_FILE: &str = "history.jsonl";

/// Writes `last_buy.json`/`last_reward.json` and appends to `history.jsonl`
/// for a just-inserted round. Best-effort: any I/O or serialization error
/// is logged and otherwise ignored.
pub async fn record_round(public_dir: &Path, round: &Round) {
    if let Err(e) = tokio::fs::create_dir_all(public_dir).await {
        warn!(error = %e, dir = %public_dir.display(), "failed to create public/ directory");
        return;
    }

    let snapshot_name = match round.round_type {
        RoundType::Buy => LAST_BUY_FILE,
        RoundType::Reward => LAST_REWARD_FILE,
    };

    match serde_json::to_vec_pretty(round) {
        Ok(json) => {
            if let Err(e) = tokio::fs::write(public_dir.join(snapshot_name), &json).await {
                warn!(error = %e, file = snapshot_name, "failed to write transparency snapshot");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize round for transparency snapshot"),
    }

    match serde_json::to_string(round) {
        Ok(mut line) => {
            line.push('\n');
            let result = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(public_dir.join(HISTORY_FILE))
                .await;
            match result {
                Ok(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    if let Err(e) = file.write_all(line.as_bytes()).await {
                        warn!(error = %e, "failed to append to history.jsonl");
                    }
                }
                Err(e) => warn!(error = %e, "failed to open history.jsonl"),
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize round for history.jsonl"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn writes_snapshot_and_appends_history() {
        let dir = tempfile::tempdir().unwrap();
        let public_dir = dir.path().join("public");

        let round = Round {
            id: "r1".into(),
            round_type: RoundType::Buy,
            ts: 1000,
            txs: vec!["sig1".into()],
            meta: serde_json::json!({"success": true}),
        };
        record_round(&public_dir, &round).await;

        let snapshot = tokio::fs::read_to_string(public_dir.join(LAST_BUY_FILE))
            .await
            .unwrap();
        assert!(snapshot.contains("\"r1\""));

        let history = tokio::fs::read_to_string(public_dir.join(HISTORY_FILE))
            .await
            .unwrap();
        assert_eq!(history.lines().count(), 1);

        let round2 = Round {
            id: "r2".into(),
            round_type: RoundType::Buy,
            ts: 2000,
            txs: vec![],
            meta: serde_json::json!({"success": false}),
        };
        record_round(&public_dir, &round2).await;

        let snapshot2 = tokio::fs::read_to_string(public_dir.join(LAST_BUY_FILE))
            .await
            .unwrap();
        assert!(snapshot2.contains("\"r2\""));
        assert!(!snapshot2.contains("\"r1\""));

        let history2 = tokio::fs::read_to_string(public_dir.join(HISTORY_FILE))
            .await
            .unwrap();
        assert_eq!(history2.lines().count(), 2);
    }
}
