//! Ledger engine: earn, deduct, exchange and the balance queries.
//!
//! Every mutation runs under the member's lock from `MemberLocks`: the
//! journal is scanned, the balance is derived from it, and the resulting
//! writes are committed before the lock is released. Balances are never
//! cached; each call recomputes them from a fresh scan.
//!
//! The lock only covers this process. Consuming writes also carry a
//! `JournalGuard` with the length of the scanned journal, which the store
//! re-checks inside its write transaction. When another process got there
//! first the plan is rebuilt from a fresh scan.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::error::{LedgerError, Result};
use super::fifo::{self, FifoError};
use super::journal::Journal;
use super::locks::MemberLocks;
use super::types::{HistoryEntry, HistoryPage, LotId, LotKind, MemberId, PointBalance, PointLot};
use super::validate;
use crate::audit::{self, AuditRecord, AuditRecorder};
use crate::clock::Clock;
use crate::config::LedgerPolicy;
use crate::storage::{JournalGuard, LotFilter, LotOrder, LotStore, StorageError};

/// Attempts at a guarded write before a journal conflict is surfaced.
pub(crate) const GUARDED_WRITE_ATTEMPTS: u32 = 8;

/// Lot-based point accounting over a `LotStore`.
pub struct LedgerEngine {
    store: Arc<dyn LotStore>,
    audit: Arc<dyn AuditRecorder>,
    clock: Arc<dyn Clock>,
    locks: Arc<MemberLocks>,
    policy: LedgerPolicy,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn LotStore>,
        audit: Arc<dyn AuditRecorder>,
        clock: Arc<dyn Clock>,
        locks: Arc<MemberLocks>,
        policy: LedgerPolicy,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            locks,
            policy,
        }
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// Scan a member's whole journal.
    async fn journal(&self, member_id: &MemberId) -> Result<Journal> {
        let lots = self.store.scan(&LotFilter::for_member(member_id)).await?;
        Ok(Journal::new(lots))
    }

    fn violation(&self, member_id: &MemberId, err: FifoError) -> LedgerError {
        error!(member_id = %member_id, error = %err, "Ledger consistency violation");
        err.into()
    }

    /// Credit `amount` points to a member as a new earned lot.
    ///
    /// `expiration_days` counts from now; when absent the policy default
    /// applies, and with no default the lot never expires.
    #[tracing::instrument(name = "ledger.earn", skip_all, fields(member_id = %member_id, amount = %amount))]
    pub async fn earn(
        &self,
        member_id: &MemberId,
        amount: Decimal,
        description: &str,
        expiration_days: Option<u32>,
    ) -> Result<PointLot> {
        validate::member_id(member_id)?;
        let amount = validate::amount(amount, &self.policy)?;
        let description = validate::description(description, &self.policy)?;
        let days = expiration_days
            .or(self.policy.default_expiration_days)
            .map(|days| validate::expiration_days(days, &self.policy))
            .transpose()?;

        let _member = self.locks.lock(member_id).await;
        let now = self.clock.now();
        let expires_at = days
            .map(|days| validate::days_after(now, days))
            .transpose()?;

        let before = self
            .journal(member_id)
            .await?
            .available_balance(now)
            .map_err(|e| self.violation(member_id, e))?;

        let lot = PointLot::earned(member_id.clone(), amount, description, expires_at, now);
        self.store.insert(lot.clone()).await?;

        info!(lot_id = %lot.id, expires_at = ?lot.expires_at, "Points earned");
        audit::deliver(
            self.audit.as_ref(),
            &[AuditRecord::for_lot(&lot, before, before + amount)],
        )
        .await;

        Ok(lot)
    }

    /// Spend points, oldest lots first.
    #[tracing::instrument(name = "ledger.deduct", skip_all, fields(member_id = %member_id, amount = %amount))]
    pub async fn deduct(
        &self,
        member_id: &MemberId,
        amount: Decimal,
        description: &str,
    ) -> Result<Vec<PointLot>> {
        self.consume(LotKind::Deducted, member_id, amount, description)
            .await
    }

    /// Convert points into something else, oldest lots first.
    #[tracing::instrument(name = "ledger.exchange", skip_all, fields(member_id = %member_id, amount = %amount))]
    pub async fn exchange(
        &self,
        member_id: &MemberId,
        amount: Decimal,
        label: &str,
    ) -> Result<Vec<PointLot>> {
        self.consume(LotKind::Exchanged, member_id, amount, label)
            .await
    }

    async fn consume(
        &self,
        kind: LotKind,
        member_id: &MemberId,
        amount: Decimal,
        description: &str,
    ) -> Result<Vec<PointLot>> {
        validate::member_id(member_id)?;
        let amount = validate::amount(amount, &self.policy)?;
        let description = validate::description(description, &self.policy)?;

        let _member = self.locks.lock(member_id).await;
        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            let journal = self.journal(member_id).await?;
            let (available, entries) =
                self.plan_entries(&journal, kind, member_id, amount, description, now)?;
            let guard = JournalGuard::new(member_id, journal.len());

            match self.store.append_guarded(&guard, entries.clone()).await {
                Ok(()) => {
                    self.record_consumption(kind, available, &entries).await;
                    return Ok(entries);
                }
                Err(err @ StorageError::JournalConflict { .. })
                    if attempt < GUARDED_WRITE_ATTEMPTS =>
                {
                    debug!(attempt, error = %err, "Journal moved, replanning");
                    attempt += 1;
                }
                Err(err) => {
                    if matches!(err, StorageError::JournalConflict { .. }) {
                        warn!(attempts = attempt, error = %err, "Giving up on contended journal");
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// FIFO entries drawing `amount` from the journal, plus the balance
    /// they were planned against.
    fn plan_entries(
        &self,
        journal: &Journal,
        kind: LotKind,
        member_id: &MemberId,
        amount: Decimal,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(Decimal, Vec<PointLot>)> {
        let positions = journal
            .positions(now)
            .map_err(|e| self.violation(member_id, e))?;
        let available = fifo::total(&positions);

        if amount > available {
            info!(available = %available, "Insufficient points");
            return Err(LedgerError::InsufficientPoints {
                required: amount,
                available,
            });
        }

        let plan = fifo::plan(&positions, amount).map_err(|e| self.violation(member_id, e))?;
        debug!(kind = %kind, lots = plan.len(), "FIFO plan");

        let entries = plan
            .iter()
            .map(|step| {
                PointLot::journal_entry(
                    member_id.clone(),
                    kind,
                    step.take,
                    step.source,
                    format!("{description} (from lot {})", step.source),
                    now,
                )
            })
            .collect();
        Ok((available, entries))
    }

    async fn record_consumption(&self, kind: LotKind, available: Decimal, entries: &[PointLot]) {
        let mut balance = available;
        let records: Vec<AuditRecord> = entries
            .iter()
            .map(|entry| {
                let before = balance;
                balance -= entry.amount.abs();
                AuditRecord::for_lot(entry, before, balance)
            })
            .collect();

        info!(
            kind = %kind,
            entries = entries.len(),
            balance = %balance,
            "Points consumed"
        );
        audit::deliver(self.audit.as_ref(), &records).await;
    }

    /// Points the member can spend right now.
    pub async fn get_available_balance(&self, member_id: &MemberId) -> Result<Decimal> {
        validate::member_id(member_id)?;
        let now = self.clock.now();
        self.journal(member_id)
            .await?
            .available_balance(now)
            .map_err(|e| self.violation(member_id, e))
    }

    /// Lifetime totals per kind plus the available balance.
    pub async fn get_point_balance(&self, member_id: &MemberId) -> Result<PointBalance> {
        validate::member_id(member_id)?;
        let now = self.clock.now();
        self.journal(member_id)
            .await?
            .totals(now)
            .map_err(|e| self.violation(member_id, e))
    }

    /// One page of the member's journal, newest first. Pages start at 1.
    pub async fn get_point_history(
        &self,
        member_id: &MemberId,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage> {
        validate::member_id(member_id)?;
        validate::page(page, page_size, &self.policy)?;

        let offset = u64::from(page - 1) * u64::from(page_size);
        let filter = LotFilter::for_member(member_id)
            .order(LotOrder::CreatedDesc)
            .page(u64::from(page_size), offset);

        let lots = self.store.scan(&filter).await?;
        let total = self.store.count(&LotFilter::for_member(member_id)).await?;

        Ok(HistoryPage {
            items: lots.into_iter().map(HistoryEntry::from).collect(),
            page,
            page_size,
            total,
        })
    }

    pub async fn get_lot(&self, lot_id: LotId) -> Result<PointLot> {
        self.store
            .get(lot_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("lot {lot_id}")))
    }
}
