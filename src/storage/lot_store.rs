//! LotStore trait definition.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Result, StorageError};
use crate::ledger::{LotId, LotKind, MemberId, PointLot};

/// Interface for lot persistence.
///
/// Lots are append-only: there is no update and no delete. The single
/// permitted mutation is `retire`, which flips `is_expired` on earned lots
/// from false to true together with appending the matching journal entries.
///
/// Implementations:
/// - `SqliteLotStore`: SQLite storage
/// - `MemoryLotStore`: In-memory storage (tests, ephemeral deployments)
#[async_trait]
pub trait LotStore: Send + Sync {
    /// Append one lot.
    async fn insert(&self, lot: PointLot) -> Result<()>;

    /// Append several lots atomically: either all are stored or none are.
    async fn insert_batch(&self, lots: Vec<PointLot>) -> Result<()>;

    /// Append lots for `guard.member_id` only if the member's journal still
    /// has `guard.expected_len` lots when the write transaction starts.
    ///
    /// Fails with `JournalConflict` (and writes nothing) otherwise.
    async fn append_guarded(&self, guard: &JournalGuard, lots: Vec<PointLot>) -> Result<()>;

    /// Fetch one lot by id.
    async fn get(&self, id: LotId) -> Result<Option<PointLot>>;

    /// Lots matching `filter`, in `filter.order`, honouring limit/offset.
    async fn scan(&self, filter: &LotFilter) -> Result<Vec<PointLot>>;

    /// Number of lots matching `filter` (limit/offset ignored).
    async fn count(&self, filter: &LotFilter) -> Result<u64>;

    /// Flag earned lots expired and append journal entries, atomically.
    ///
    /// Checked against `guard` like `append_guarded`. Fails with
    /// `AlreadyRetired` (and writes nothing) if any id is not an earned lot
    /// whose flag is still false.
    async fn retire(
        &self,
        guard: &JournalGuard,
        lot_ids: &[LotId],
        entries: Vec<PointLot>,
    ) -> Result<()>;
}

/// Optimistic concurrency check on one member's journal.
///
/// Lots are append-only, so the number of lots a member has is a version of
/// their journal. A guarded write built from a scan of `expected_len` lots
/// is refused if anything was appended for the member in the meantime, by
/// this process or another one sharing the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalGuard {
    pub member_id: MemberId,
    pub expected_len: u64,
}

impl JournalGuard {
    pub fn new(member_id: &MemberId, expected_len: u64) -> Self {
        Self {
            member_id: member_id.clone(),
            expected_len,
        }
    }

    /// Fail with `JournalConflict` unless `actual_len` is the expected one.
    pub fn check(&self, actual_len: u64) -> Result<()> {
        if actual_len != self.expected_len {
            return Err(StorageError::JournalConflict {
                member_id: self.member_id.clone(),
                expected: self.expected_len,
                actual: actual_len,
            });
        }
        Ok(())
    }
}

/// Result ordering for scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LotOrder {
    /// Oldest first (`created_at`, then id). Consumption order.
    #[default]
    CreatedAsc,
    /// Newest first (`created_at`, then id, both descending). History order.
    CreatedDesc,
    /// Soonest expiry first (`expires_at`, then id).
    ExpiresAsc,
}

impl LotOrder {
    pub fn compare(self, a: &PointLot, b: &PointLot) -> Ordering {
        match self {
            LotOrder::CreatedAsc => a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)),
            LotOrder::CreatedDesc => b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)),
            LotOrder::ExpiresAsc => a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)),
        }
    }
}

/// Scan predicate. Unset fields match everything.
///
/// The expiry bounds only match lots that have an `expires_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LotFilter {
    pub member_id: Option<MemberId>,
    pub kind: Option<LotKind>,
    pub is_expired: Option<bool>,
    /// `expires_at > bound`
    pub expires_after: Option<DateTime<Utc>>,
    /// `expires_at <= bound`
    pub expires_at_or_before: Option<DateTime<Utc>>,
    pub order: LotOrder,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl LotFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_member(member_id: &MemberId) -> Self {
        Self {
            member_id: Some(member_id.clone()),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: LotKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Earned lots the sweeper has not retired yet.
    pub fn unretired_earned(mut self) -> Self {
        self.kind = Some(LotKind::Earned);
        self.is_expired = Some(false);
        self
    }

    pub fn expires_after(mut self, bound: DateTime<Utc>) -> Self {
        self.expires_after = Some(bound);
        self
    }

    pub fn expires_at_or_before(mut self, bound: DateTime<Utc>) -> Self {
        self.expires_at_or_before = Some(bound);
        self
    }

    pub fn order(mut self, order: LotOrder) -> Self {
        self.order = order;
        self
    }

    pub fn page(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// In-process evaluation of the predicate (ordering and paging excluded).
    pub fn matches(&self, lot: &PointLot) -> bool {
        if self.member_id.as_ref().is_some_and(|m| *m != lot.member_id) {
            return false;
        }
        if self.kind.is_some_and(|k| k != lot.kind) {
            return false;
        }
        if self.is_expired.is_some_and(|e| e != lot.is_expired) {
            return false;
        }
        if let Some(bound) = self.expires_after {
            if !lot.expires_at.is_some_and(|at| at > bound) {
                return false;
            }
        }
        if let Some(bound) = self.expires_at_or_before {
            if !lot.expires_at.is_some_and(|at| at <= bound) {
                return false;
            }
        }
        true
    }
}
