//! SweepLease trait definition.

use std::time::Duration;

use async_trait::async_trait;

use super::Result;

/// Store-level lease electing a single sweeper across processes.
///
/// A lease is held by one `holder` until it is released or its ttl lapses.
/// Re-acquiring by the current holder renews it.
///
/// Implementations:
/// - `SqliteSweepLease`: lease row shared by every process on the database
/// - `MemorySweepLease`: in-process only
/// - `LocalSweepLease` (in `sweeper`): always granted
#[async_trait]
pub trait SweepLease: Send + Sync {
    /// Try to take (or renew) the lease. Returns false if another holder has it.
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// Give the lease up. No-op if `holder` does not hold it.
    async fn release(&self, holder: &str) -> Result<()>;
}
