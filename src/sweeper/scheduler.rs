//! Background scheduling for the expiration sweeper.
//!
//! One task drives two timers: the expiration sweep (daily by default) and
//! the look-ahead report (weekly by default). Both fire once at startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{ExpirationSweeper, SweepOutcome};
use crate::config::SweeperConfig;
use crate::ledger::Result;

/// Periodic sweep and look-ahead report.
pub struct SweepScheduler {
    sweeper: Arc<ExpirationSweeper>,
    sweep_interval: Duration,
    report_interval: Duration,
    report_horizon_days: u32,
}

impl SweepScheduler {
    pub fn new(sweeper: Arc<ExpirationSweeper>, config: &SweeperConfig) -> Self {
        Self {
            sweeper,
            sweep_interval: config.sweep_interval(),
            report_interval: config.report_interval(),
            report_horizon_days: config.report_horizon_days,
        }
    }

    /// Set custom sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set custom report interval.
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Spawn the scheduler as a background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_timer = tokio::time::interval(self.sweep_interval);
            sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut report_timer = tokio::time::interval(self.report_interval);
            report_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                sweep_interval_secs = self.sweep_interval.as_secs(),
                report_interval_secs = self.report_interval.as_secs(),
                "Sweep scheduler started"
            );

            loop {
                tokio::select! {
                    _ = sweep_timer.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "Scheduled sweep failed");
                        }
                    }
                    _ = report_timer.tick() => {
                        if let Err(e) = self.sweeper.report_expiring(self.report_horizon_days).await {
                            warn!(error = %e, "Look-ahead report failed");
                        }
                    }
                }
            }
        })
    }

    /// Run one sweep now (for testing or manual invocation).
    pub async fn run_once(&self) -> Result<SweepOutcome> {
        self.sweeper.sweep().await
    }
}
