//! Expiration sweeper configuration.

use std::time::Duration;

use serde::Deserialize;

/// How sweeps are fenced across processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseMode {
    /// Only the in-process guard. Fine for a single instance.
    #[default]
    Local,
    /// A lease row in the shared store elects one sweeper per database.
    Store,
}

/// Sweeper scheduling and isolation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Run the background scheduler.
    pub enabled: bool,
    /// Seconds between expiration sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds between look-ahead reports.
    pub report_interval_secs: u64,
    /// Days ahead the look-ahead report covers.
    pub report_horizon_days: u32,
    /// Budget for retiring one member's lots, in milliseconds.
    pub member_timeout_ms: u64,
    /// Members retired in parallel.
    pub member_concurrency: usize,
    /// Cross-process fencing.
    pub lease: LeaseMode,
    /// Lifetime of a store lease; should exceed the longest sweep.
    pub lease_ttl_secs: u64,
    /// Lease holder name. Generated per process when unset.
    pub holder_id: Option<String>,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 24 * 60 * 60,
            report_interval_secs: 7 * 24 * 60 * 60,
            report_horizon_days: 7,
            member_timeout_ms: 30_000,
            member_concurrency: 4,
            lease: LeaseMode::Local,
            lease_ttl_secs: 60 * 60,
            holder_id: None,
        }
    }
}

impl SweeperConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn member_timeout(&self) -> Duration {
        Duration::from_millis(self.member_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Configured holder id, or one unique to this process.
    pub fn holder(&self) -> String {
        self.holder_id.clone().unwrap_or_else(|| {
            format!("pointledger-{}-{}", std::process::id(), uuid::Uuid::new_v4().simple())
        })
    }
}
