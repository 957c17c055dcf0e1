//! The durable store (C2): a single-file embedded database (`sled`) with
//! its own write-ahead journal, exposing small typed operations per
//! entity rather than a generic query API.
//!
//! Sled keeps keys in byte-lexicographic order within a tree, so rounds
//! are keyed `"<type>:<ts zero-padded>:<id>"` to make "most recent round
//! of this type" (used constantly by the status projector and the
//! scheduler's timing guard) a single reverse range scan instead of a
//! full table scan.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::model::{ExecutionLock, Holder, LockType, Round, RoundType, ScanCursor};

const TREE_HOLDERS: &str = "holders";
const TREE_ROUNDS: &str = "rounds";
const TREE_SCAN_STATE: &str = "scan_state";
const TREE_EXECUTION_LOCKS: &str = "execution_locks";
const TREE_BOT_STATE: &str = "bot_state";

const KEY_SCAN_CURSOR: &str = "cursor";
const KEY_HEARTBEAT_TS: &str = "heartbeat_ts";
const KEY_SAFE_MODE: &str = "safe_mode";
const KEY_SAFE_MODE_REASON: &str = "safe_mode_reason";
const KEY_CONSECUTIVE_RPC_ERRORS: &str = "consecutive_rpc_errors";

#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    holders: sled::Tree,
    rounds: sled::Tree,
    scan_state: sled::Tree,
    execution_locks: sled::Tree,
    bot_state: sled::Tree,
}

fn to_store_err(e: sled::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Unavailable(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl Store {
    /// Opens (or creates) the embedded database at `path`. Fails with
    /// [`StoreError::Corrupt`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let holders = db.open_tree(TREE_HOLDERS).map_err(to_store_err)?;
        let rounds = db.open_tree(TREE_ROUNDS).map_err(to_store_err)?;
        let scan_state = db.open_tree(TREE_SCAN_STATE).map_err(to_store_err)?;
        let execution_locks =
            db.open_tree(TREE_EXECUTION_LOCKS).map_err(to_store_err)?;
        let bot_state = db.open_tree(TREE_BOT_STATE).map_err(to_store_err)?;
        Ok(Store {
            db,
            holders,
            rounds,
            scan_state,
            execution_locks,
            bot_state,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(to_store_err)?;
        Ok(())
    }

    // --- holders --- //

    pub fn get_holder(&self, address: &str) -> Result<Option<Holder>, StoreError> {
        match self.holders.get(address).map_err(to_store_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert a newly discovered holder if absent; a no-op if the address
    /// is already known (never overwrites existing history).
    pub fn discover_holder(
        &self,
        address: &str,
        seen_ts: i64,
    ) -> Result<(), StoreError> {
        if self.holders.contains_key(address).map_err(to_store_err)? {
            return Ok(());
        }
        let holder = Holder::new_discovered(address.to_string(), seen_ts);
        self.holders
            .insert(address, encode(&holder)?)
            .map_err(to_store_err)?;
        Ok(())
    }

    /// Applies `mutate` to the holder's current state (or a freshly
    /// discovered holder if unknown) and persists the result. Fields the
    /// caller doesn't touch inside `mutate` are preserved, matching the
    /// "omitted fields are preserved" upsert semantics in §4.1.
    pub fn upsert_holder(
        &self,
        address: &str,
        now: i64,
        mutate: impl FnOnce(&mut Holder),
    ) -> Result<Holder, StoreError> {
        let mut holder = self
            .get_holder(address)?
            .unwrap_or_else(|| Holder::new_discovered(address.to_string(), now));
        mutate(&mut holder);
        self.holders
            .insert(address, encode(&holder)?)
            .map_err(to_store_err)?;
        Ok(holder)
    }

    pub fn all_holders(&self) -> Result<Vec<Holder>, StoreError> {
        let mut out = Vec::new();
        for entry in self.holders.iter() {
            let (_, bytes) = entry.map_err(to_store_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Reward-eligibility query (I3). Expressed as a full-table filter:
    /// at the single-embedded-process scale this system runs at, a scan
    /// over all known holders is cheap enough that a secondary index
    /// would be premature.
    pub fn eligible_holders(
        &self,
        now: i64,
        min_age_secs: i64,
        min_continuity_secs: i64,
        min_cumulative_buy: Decimal,
    ) -> Result<Vec<Holder>, StoreError> {
        Ok(self
            .all_holders()?
            .into_iter()
            .filter(|h| {
                h.is_eligible(now, min_age_secs, min_continuity_secs, min_cumulative_buy)
            })
            .collect())
    }

    // --- rounds --- //

    fn round_key(round_type: RoundType, ts: i64, id: &str) -> String {
        // `ts` is always non-negative wall-clock seconds; zero-pad so byte
        // order matches numeric order.
        format!("{round_type}:{ts:020}:{id}")
    }

    /// Appends a round record. Rounds are append-only (I6); there is no
    /// update or delete operation.
    pub fn insert_round(&self, round: &Round) -> Result<(), StoreError> {
        let key = Self::round_key(round.round_type, round.ts, &round.id);
        self.rounds
            .insert(key, encode(round)?)
            .map_err(to_store_err)?;
        Ok(())
    }

    /// The most recently inserted round of the given type, or `None` if
    /// none exists yet.
    pub fn latest_round(
        &self,
        round_type: RoundType,
    ) -> Result<Option<Round>, StoreError> {
        let prefix = format!("{round_type}:");
        match self.rounds.scan_prefix(&prefix).last() {
            Some(entry) => {
                let (_, bytes) = entry.map_err(to_store_err)?;
                Ok(Some(decode(&bytes)?))
            }
            None => Ok(None),
        }
    }

    // --- scan cursor --- //

    pub fn get_cursor(&self) -> Result<Option<ScanCursor>, StoreError> {
        match self.scan_state.get(KEY_SCAN_CURSOR).map_err(to_store_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Cursors advance monotonically by recency (§3 Lifecycles): the
    /// caller is responsible for only ever passing the newest signature
    /// seen in a batch.
    pub fn set_cursor(&self, cursor: &ScanCursor) -> Result<(), StoreError> {
        self.scan_state
            .insert(KEY_SCAN_CURSOR, encode(cursor)?)
            .map_err(to_store_err)?;
        Ok(())
    }

    // --- execution locks --- //

    /// Atomically acquires `lock_type`. Returns `true` if acquired,
    /// `false` if already held (I4: at most one row per lock type).
    pub fn acquire_lock(
        &self,
        lock_type: LockType,
        owner_pid: u32,
        now: i64,
    ) -> Result<bool, StoreError> {
        let lock = ExecutionLock {
            lock_type,
            acquired_ts: now,
            owner_pid,
        };
        let key = lock_type.to_string();
        let bytes = encode(&lock)?;
        let result = self
            .execution_locks
            .compare_and_swap(&key, None as Option<&[u8]>, Some(bytes))
            .map_err(to_store_err)?;
        Ok(result.is_ok())
    }

    /// Releases `lock_type`. Always safe and idempotent.
    pub fn release_lock(&self, lock_type: LockType) -> Result<(), StoreError> {
        self.execution_locks
            .remove(lock_type.to_string())
            .map_err(to_store_err)?;
        Ok(())
    }

    pub fn lock_held(&self, lock_type: LockType) -> Result<bool, StoreError> {
        Ok(self
            .execution_locks
            .contains_key(lock_type.to_string())
            .map_err(to_store_err)?)
    }

    /// Deletes any lock rows older than `max_age_secs`. Called exactly
    /// once at startup with `2 * max(buyInterval, rewardInterval)`.
    pub fn clear_stale_locks(
        &self,
        max_age_secs: i64,
        now: i64,
    ) -> Result<(), StoreError> {
        let mut stale_keys = Vec::new();
        for entry in self.execution_locks.iter() {
            let (key, bytes) = entry.map_err(to_store_err)?;
            let lock: ExecutionLock = decode(&bytes)?;
            if now - lock.acquired_ts >= max_age_secs {
                stale_keys.push(key);
            }
        }
        for key in stale_keys {
            self.execution_locks.remove(key).map_err(to_store_err)?;
        }
        Ok(())
    }

    // --- bot state --- //

    pub fn set_heartbeat(&self, now: i64) -> Result<(), StoreError> {
        self.bot_state
            .insert(KEY_HEARTBEAT_TS, encode(&now)?)
            .map_err(to_store_err)?;
        Ok(())
    }

    pub fn get_heartbeat(&self) -> Result<Option<i64>, StoreError> {
        match self.bot_state.get(KEY_HEARTBEAT_TS).map_err(to_store_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Sets the latched safe-mode flag (I5). Idempotent: setting it again
    /// just updates the reason.
    pub fn enter_safe_mode(&self, reason: &str) -> Result<(), StoreError> {
        self.bot_state
            .insert(KEY_SAFE_MODE, encode(&true)?)
            .map_err(to_store_err)?;
        self.bot_state
            .insert(KEY_SAFE_MODE_REASON, encode(&reason.to_string())?)
            .map_err(to_store_err)?;
        Ok(())
    }

    /// The only operator-mediated write path in the system (§9): clears
    /// the latched safe-mode flag.
    pub fn exit_safe_mode(&self) -> Result<(), StoreError> {
        self.bot_state.remove(KEY_SAFE_MODE).map_err(to_store_err)?;
        self.bot_state
            .remove(KEY_SAFE_MODE_REASON)
            .map_err(to_store_err)?;
        Ok(())
    }

    pub fn is_safe_mode(&self) -> Result<bool, StoreError> {
        Ok(self.bot_state.contains_key(KEY_SAFE_MODE).map_err(to_store_err)?)
    }

    pub fn safe_mode_reason(&self) -> Result<Option<String>, StoreError> {
        match self
            .bot_state
            .get(KEY_SAFE_MODE_REASON)
            .map_err(to_store_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn consecutive_rpc_errors(&self) -> Result<u32, StoreError> {
        match self
            .bot_state
            .get(KEY_CONSECUTIVE_RPC_ERRORS)
            .map_err(to_store_err)?
        {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Ok(0),
        }
    }

    pub fn set_consecutive_rpc_errors(&self, count: u32) -> Result<(), StoreError> {
        self.bot_state
            .insert(KEY_CONSECUTIVE_RPC_ERRORS, encode(&count)?)
            .map_err(to_store_err)?;
        Ok(())
    }
}

/// Process id used as lock ownership metadata. Not used for correctness
/// (the store's uniqueness constraint is what matters); purely
/// informational for operators inspecting a stale lock.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Current wall-clock seconds, duplicated here (rather than importing
/// `crate::clock`) only to avoid a cyclic doc reference; callers should
/// prefer `crate::clock::now_secs`.
#[allow(dead_code)]
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}
