//! Core execution engine and holder-accounting engine for the treasury bot.
//!
//! This crate owns everything that must be deterministic and durable:
//! configuration, the embedded store, the ledger-scanning holder registry,
//! the weighted lottery, the buy/reward job state machines, the execution
//! engine's safe-mode/locking rules, the scheduler, and the read-only
//! status projection. HTTP transport and process wiring live in the `cli`
//! binary crate.

pub mod age_cache;
pub mod balances;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod lottery;
pub mod model;
pub mod reward_job;
pub mod buy_job;
pub mod scanner;
pub mod scheduler;
pub mod scoring;
pub mod status;
pub mod store;
pub mod transparency;

pub use config::Config;
pub use error::{CoreError, JobOutcome};
pub use ledger::LedgerAdapter;
pub use store::Store;
