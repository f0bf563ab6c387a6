//! Expiration sweeper.
//!
//! Retires earned lots whose expiration has passed. For every due lot the
//! sweeper flags the lot and appends one `Expired` entry for whatever was
//! still left on it, both in one atomic store call per member. A lot that
//! was already fully spent is flagged without an entry.
//!
//! A sweep is guarded twice: an in-process flag makes overlapping calls
//! return `AlreadyRunning`, and a `SweepLease` can extend that to several
//! processes sharing one database. The lease is renewed while the sweep
//! runs. Each member's retirement is also written under a `JournalGuard`,
//! so a sweep that loses its lease still cannot double-expire a lot.

mod scheduler;

pub use scheduler::SweepScheduler;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audit::{self, AuditRecord, AuditRecorder};
use crate::clock::Clock;
use crate::config::SweeperConfig;
use crate::ledger::{
    validate, Journal, LedgerError, LotId, LotKind, MemberId, MemberLocks, PointLot, Result,
    GUARDED_WRITE_ATTEMPTS,
};
use crate::storage::{self, JournalGuard, LotFilter, LotOrder, LotStore, StorageError, SweepLease};

/// Floor for the lease renewal period.
const MIN_RENEW_PERIOD: Duration = Duration::from_millis(10);

/// Whether a sweep is in progress in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Running,
}

/// A member whose lots could not be retired in this sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSweepError {
    pub member_id: MemberId,
    pub message: String,
}

/// Summary of one completed sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub lots_retired: usize,
    pub members_affected: usize,
    pub processed_ids: Vec<LotId>,
    pub errors: Vec<MemberSweepError>,
}

/// Result of asking for a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep holds the guard; nothing was done.
    AlreadyRunning,
}

/// Lease that is always granted. Single-process deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSweepLease;

#[async_trait]
impl SweepLease for LocalSweepLease {
    async fn try_acquire(&self, _holder: &str, _ttl: Duration) -> storage::Result<bool> {
        Ok(true)
    }

    async fn release(&self, _holder: &str) -> storage::Result<()> {
        Ok(())
    }
}

/// Resets the running flag however the sweep ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Retires expired lots.
pub struct ExpirationSweeper {
    store: Arc<dyn LotStore>,
    audit: Arc<dyn AuditRecorder>,
    clock: Arc<dyn Clock>,
    locks: Arc<MemberLocks>,
    lease: Arc<dyn SweepLease>,
    holder: String,
    lease_ttl: Duration,
    member_timeout: Duration,
    member_concurrency: usize,
    running: AtomicBool,
}

impl ExpirationSweeper {
    /// Create a sweeper guarded by the in-process flag only.
    pub fn new(
        store: Arc<dyn LotStore>,
        audit: Arc<dyn AuditRecorder>,
        clock: Arc<dyn Clock>,
        locks: Arc<MemberLocks>,
        config: &SweeperConfig,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            locks,
            lease: Arc::new(LocalSweepLease),
            holder: config.holder(),
            lease_ttl: config.lease_ttl(),
            member_timeout: config.member_timeout(),
            member_concurrency: config.member_concurrency.max(1),
            running: AtomicBool::new(false),
        }
    }

    /// Fence sweeps with a shared lease as well.
    pub fn with_lease(mut self, lease: Arc<dyn SweepLease>) -> Self {
        self.lease = lease;
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn state(&self) -> SweeperState {
        if self.running.load(Ordering::Acquire) {
            SweeperState::Running
        } else {
            SweeperState::Idle
        }
    }

    /// Retire every due lot.
    ///
    /// Returns `AlreadyRunning` without touching the store if a sweep is in
    /// progress here or, with a shared lease, in another process. Failures
    /// for individual members are collected in the report; only failures
    /// that stop the whole sweep (the initial scan, the lease) are errors.
    #[tracing::instrument(name = "sweeper.sweep", skip_all, fields(holder = %self.holder))]
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Sweep already running in this process");
            return Ok(SweepOutcome::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        if !self.lease.try_acquire(&self.holder, self.lease_ttl).await? {
            info!("Sweep lease held by another process");
            return Ok(SweepOutcome::AlreadyRunning);
        }

        let result = {
            let sweep = self.sweep_due();
            tokio::pin!(sweep);
            let period = (self.lease_ttl / 3).max(MIN_RENEW_PERIOD);
            let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    result = &mut sweep => break result,
                    _ = renew.tick() => self.renew_lease().await,
                }
            }
        };

        if let Err(e) = self.lease.release(&self.holder).await {
            warn!(error = %e, "Failed to release sweep lease");
        }

        result.map(SweepOutcome::Completed)
    }

    /// Extend the lease mid-sweep. Losing it is logged, not fatal.
    async fn renew_lease(&self) {
        match self.lease.try_acquire(&self.holder, self.lease_ttl).await {
            Ok(true) => debug!("Sweep lease renewed"),
            Ok(false) => warn!("Sweep lease taken by another holder mid-sweep"),
            Err(e) => warn!(error = %e, "Failed to renew sweep lease"),
        }
    }

    async fn sweep_due(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let due = self
            .store
            .scan(&LotFilter::all().unretired_earned().expires_at_or_before(now))
            .await?;

        let mut by_member: BTreeMap<MemberId, Vec<LotId>> = BTreeMap::new();
        for lot in due {
            by_member.entry(lot.member_id).or_default().push(lot.id);
        }
        debug!(members = by_member.len(), "Members with due lots");

        let outcomes: Vec<(MemberId, std::result::Result<Vec<LotId>, String>)> =
            stream::iter(by_member)
                .map(|(member_id, candidates)| async move {
                    let outcome = match tokio::time::timeout(
                        self.member_timeout,
                        self.retire_member(&member_id, &candidates, now),
                    )
                    .await
                    {
                        Ok(Ok(retired)) => Ok(retired),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!(
                            "timed out after {}ms",
                            self.member_timeout.as_millis()
                        )),
                    };
                    (member_id, outcome)
                })
                .buffered(self.member_concurrency)
                .collect()
                .await;

        let mut report = SweepReport::default();
        for (member_id, outcome) in outcomes {
            match outcome {
                Ok(retired) if retired.is_empty() => {}
                Ok(retired) => {
                    report.members_affected += 1;
                    report.lots_retired += retired.len();
                    report.processed_ids.extend(retired);
                }
                Err(message) => {
                    warn!(member_id = %member_id, error = %message, "Member sweep failed");
                    report.errors.push(MemberSweepError { member_id, message });
                }
            }
        }

        info!(
            lots_retired = report.lots_retired,
            members_affected = report.members_affected,
            errors = report.errors.len(),
            "Expiration sweep complete"
        );
        Ok(report)
    }

    /// Retire one member's due lots under that member's lock.
    ///
    /// The journal is re-read after taking the lock, so lots retired or drawn
    /// down since the initial scan are handled with current numbers. If the
    /// journal moves again before the write lands, it is re-read and the
    /// retirement replanned.
    async fn retire_member(
        &self,
        member_id: &MemberId,
        candidates: &[LotId],
        now: DateTime<Utc>,
    ) -> Result<Vec<LotId>> {
        let _member = self.locks.lock(member_id).await;

        let mut attempt = 1;
        loop {
            let journal = Journal::new(self.store.scan(&LotFilter::for_member(member_id)).await?);
            let balance = journal.available_balance(now)?;
            let (retired, entries) = Self::plan_retirement(&journal, member_id, candidates, now)?;
            if retired.is_empty() {
                return Ok(retired);
            }

            let guard = JournalGuard::new(member_id, journal.len());
            match self.store.retire(&guard, &retired, entries.clone()).await {
                Ok(()) => {
                    debug!(member_id = %member_id, lots = retired.len(), entries = entries.len(), "Lots retired");
                    // Due lots are already outside the available balance, so
                    // retiring them leaves it unchanged.
                    let records: Vec<AuditRecord> = entries
                        .iter()
                        .map(|entry| AuditRecord::for_lot(entry, balance, balance))
                        .collect();
                    audit::deliver(self.audit.as_ref(), &records).await;
                    return Ok(retired);
                }
                Err(
                    err @ (StorageError::JournalConflict { .. } | StorageError::AlreadyRetired(_)),
                ) if attempt < GUARDED_WRITE_ATTEMPTS => {
                    debug!(member_id = %member_id, attempt, error = %err, "Journal moved, replanning retirement");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Due candidates to flag, and an `Expired` entry for each one with
    /// points left on it.
    fn plan_retirement(
        journal: &Journal,
        member_id: &MemberId,
        candidates: &[LotId],
        now: DateTime<Utc>,
    ) -> Result<(Vec<LotId>, Vec<PointLot>)> {
        let mut retired = Vec::new();
        let mut entries = Vec::new();
        for id in candidates {
            let Some(lot) = journal.find(*id) else {
                continue;
            };
            if !lot.is_due(now) {
                continue;
            }
            let remaining = journal.remaining(lot);
            if remaining < Decimal::ZERO {
                error!(member_id = %member_id, lot_id = %lot.id, remaining = %remaining, "Lot consumed beyond its amount");
                return Err(LedgerError::ConsistencyViolation(format!(
                    "lot {} consumed beyond its amount (remaining {remaining})",
                    lot.id
                )));
            }
            retired.push(lot.id);
            if remaining > Decimal::ZERO {
                entries.push(PointLot::journal_entry(
                    member_id.clone(),
                    LotKind::Expired,
                    remaining,
                    lot.id,
                    format!(
                        "Expired lot {} earned {}",
                        lot.id,
                        lot.created_at.format("%Y-%m-%d")
                    ),
                    now,
                ));
            }
        }
        Ok((retired, entries))
    }

    /// Unretired earned lots expiring within the next `days` days, soonest first.
    pub async fn find_expiring_within(&self, days: u32) -> Result<Vec<PointLot>> {
        let days = validate::horizon_days(days)?;
        let now = self.clock.now();
        let horizon = validate::days_after(now, days)?;
        let lots = self
            .store
            .scan(
                &LotFilter::all()
                    .unretired_earned()
                    .expires_after(now)
                    .expires_at_or_before(horizon)
                    .order(LotOrder::ExpiresAsc),
            )
            .await?;
        Ok(lots)
    }

    /// Log, per member, what will expire within `days` days.
    ///
    /// The reported amount is what is still unspent on those lots. Returns
    /// the number of members reported.
    pub async fn report_expiring(&self, days: u32) -> Result<usize> {
        let lots = self.find_expiring_within(days).await?;

        let mut by_member: BTreeMap<MemberId, Vec<LotId>> = BTreeMap::new();
        for lot in lots {
            by_member.entry(lot.member_id).or_default().push(lot.id);
        }

        let mut reported = 0;
        for (member_id, lot_ids) in &by_member {
            let journal =
                Journal::new(self.store.scan(&LotFilter::for_member(member_id)).await?);
            let amount: Decimal = lot_ids
                .iter()
                .filter_map(|id| journal.find(*id))
                .map(|lot| journal.remaining(lot).max(Decimal::ZERO))
                .sum();
            if amount.is_zero() {
                continue;
            }
            info!(
                member_id = %member_id,
                lots = lot_ids.len(),
                amount = %amount,
                horizon_days = days,
                "Points expiring soon"
            );
            reported += 1;
        }
        Ok(reported)
    }
}
