//! The execution engine (C11): the safe-mode gate, single-flight lock,
//! timeout wrapper, and error classification that every job body runs
//! through (§4.9).

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{JobOutcome, StoreError};
use crate::model::LockType;
use crate::store::{current_pid, Store};

/// Runs `job` under the engine's standard wrapping: bail out early if
/// safe mode is latched, acquire the single-flight lock for `lock_type`
/// (skip if already held), run with a hard timeout, classify the
/// outcome, and always release the lock before returning (§4.9).
pub async fn run_guarded<F, Fut, T, E>(
    store: &Store,
    lock_type: LockType,
    timeout: Duration,
    max_consecutive_rpc_errors: u32,
    job: F,
) -> Result<JobOutcome, StoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    if store.is_safe_mode()? {
        return Ok(JobOutcome::Skipped {
            reason: "bot is in safe mode".to_string(),
        });
    }

    let now = crate::clock::now_secs();
    if !store.acquire_lock(lock_type, current_pid(), now)? {
        return Ok(JobOutcome::Skipped {
            reason: format!("{lock_type} lock already held"),
        });
    }

    let outcome = match tokio::time::timeout(timeout, job()).await {
        Ok(Ok(_)) => {
            store.set_consecutive_rpc_errors(0)?;
            JobOutcome::Completed
        }
        Ok(Err(e)) => classify_failure(store, e, max_consecutive_rpc_errors)?,
        Err(_) => {
            warn!(%lock_type, "job timed out");
            JobOutcome::TimedOut
        }
    };

    // Always release, even on failure or timeout (§4.9).
    store.release_lock(lock_type)?;

    Ok(outcome)
}

fn classify_failure<E: std::fmt::Display>(
    store: &Store,
    error: E,
    max_consecutive_rpc_errors: u32,
) -> Result<JobOutcome, StoreError> {
    let message = error.to_string();
    const PATTERNS: &[&str] = &["503", "429", "timeout", "ECONNREFUSED", "fetch failed"];
    let is_transient = PATTERNS.iter().any(|p| message.contains(p));

    if is_transient {
        let count = store.consecutive_rpc_errors()? + 1;
        store.set_consecutive_rpc_errors(count)?;
        if count >= max_consecutive_rpc_errors {
            warn!(count, "tripping safe mode after consecutive RPC errors");
            store.enter_safe_mode(&format!(
                "{count} consecutive transient RPC errors"
            ))?;
        }
    } else {
        info!(error = %message, "job failed with a non-transient error");
    }

    Ok(JobOutcome::Failed { error: message })
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn safe_mode_skips_without_touching_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.enter_safe_mode("test").unwrap();

        let outcome = run_guarded(
            &store,
            LockType::BuyJob,
            Duration::from_secs(1),
            3,
            || async { Ok::<(), anyhow::Error>(()) },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, JobOutcome::Skipped { .. }));
        assert!(!store.lock_held(LockType::BuyJob).unwrap());
    }

    #[tokio::test]
    async fn held_lock_causes_a_skip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.acquire_lock(LockType::BuyJob, 999, 0).unwrap();

        let outcome = run_guarded(
            &store,
            LockType::BuyJob,
            Duration::from_secs(1),
            3,
            || async { Ok::<(), anyhow::Error>(()) },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, JobOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn lock_is_released_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let outcome = run_guarded(
            &store,
            LockType::RewardJob,
            Duration::from_secs(1),
            3,
            || async { Ok::<(), anyhow::Error>(()) },
        )
        .await
        .unwrap();

        assert!(outcome.is_completed());
        assert!(!store.lock_held(LockType::RewardJob).unwrap());
    }

    #[tokio::test]
    async fn transient_error_increments_counter_and_trips_safe_mode_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        for _ in 0..2 {
            let outcome = run_guarded(
                &store,
                LockType::BuyJob,
                Duration::from_secs(1),
                3,
                || async { Err::<(), anyhow::Error>(anyhow::anyhow!("503 Service Unavailable")) },
            )
            .await
            .unwrap();
            assert!(matches!(outcome, JobOutcome::Failed { .. }));
        }
        assert!(!store.is_safe_mode().unwrap());

        run_guarded(
            &store,
            LockType::BuyJob,
            Duration::from_secs(1),
            3,
            || async { Err::<(), anyhow::Error>(anyhow::anyhow!("503 Service Unavailable")) },
        )
        .await
        .unwrap();
        assert!(store.is_safe_mode().unwrap());
    }

    #[tokio::test]
    async fn non_transient_error_does_not_touch_the_counter() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        run_guarded(
            &store,
            LockType::BuyJob,
            Duration::from_secs(1),
            3,
            || async { Err::<(), anyhow::Error>(anyhow::anyhow!("invalid slippage")) },
        )
        .await
        .unwrap();

        assert_eq!(store.consecutive_rpc_errors().unwrap(), 0);
    }

    #[tokio::test]
    async fn timeout_does_not_increment_the_counter() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let outcome = run_guarded(
            &store,
            LockType::BuyJob,
            Duration::from_millis(10),
            3,
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), anyhow::Error>(())
            },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, JobOutcome::TimedOut));
        assert_eq!(store.consecutive_rpc_errors().unwrap(), 0);
        assert!(!store.lock_held(LockType::BuyJob).unwrap());
    }
}
