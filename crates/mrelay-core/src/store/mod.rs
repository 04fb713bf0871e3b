//! Shared, expiring state: processed-event records and per-user media counters.
//!
//! Both live behind [`KvStore`], a tiny key/value capability with the atomic
//! check-and-mutate operations the pipeline needs. Any backend with native
//! atomic increment + expire can implement it; [`memory::MemoryStore`] is the
//! in-process one.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

pub mod idempotency;
pub mod memory;
pub mod quota;

pub use idempotency::{Claim, IdempotencyStore};
pub use memory::MemoryStore;
pub use quota::QuotaTracker;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Create `key` with the given ttl unless a live entry already exists.
    ///
    /// Returns `true` when this call created the entry. Exactly one of any
    /// number of concurrent callers for the same key observes `true`.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Current counter value (0 when absent or expired).
    async fn count(&self, key: &str) -> Result<u64>;

    /// Increment the counter unless it already reached `ceiling`.
    ///
    /// The expiry is set to `window` only when the increment creates the
    /// counter; later increments leave it untouched. Returns the new value, or
    /// `None` without mutating anything when the ceiling was reached.
    async fn increment_below(&self, key: &str, ceiling: u64, window: Duration)
        -> Result<Option<u64>>;

    /// Time left before `key` expires, `None` when absent or without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}
