//! Usage ledger and the quota engine that evaluates it against plans.

pub mod engine;
pub mod ledger;
pub mod locks;

pub use engine::{OverageHandler, QuotaEngine, UNLIMITED};
pub use ledger::{InMemoryUsageRepository, UsageLedgerEntry, UsageRepository, UsageUpdate};
pub use locks::{KeyedLockGuard, KeyedLocks};
