//! In-memory storage implementations.
//!
//! Used for tests and ephemeral deployments. Failure injection hooks let
//! tests exercise the ledger's error paths without a real database.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::{JournalGuard, LotFilter, LotStore, Result, StorageError, SweepLease};
use crate::ledger::{LotId, LotKind, MemberId, PointLot};

/// Lot store that keeps everything in a vector.
#[derive(Default)]
pub struct MemoryLotStore {
    lots: RwLock<Vec<PointLot>>,
    fail_on_insert: RwLock<bool>,
    fail_on_scan: RwLock<bool>,
    fail_retire_for: RwLock<HashSet<MemberId>>,
    retire_delay_for: RwLock<HashMap<MemberId, Duration>>,
    append_delay_for: RwLock<HashMap<MemberId, Duration>>,
}

impl MemoryLotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    pub async fn set_fail_on_scan(&self, fail: bool) {
        *self.fail_on_scan.write().await = fail;
    }

    /// Make `retire` fail for lots belonging to `member_id`.
    pub async fn fail_retire_for(&self, member_id: MemberId) {
        self.fail_retire_for.write().await.insert(member_id);
    }

    /// Make `retire` stall for lots belonging to `member_id`.
    pub async fn delay_retire_for(&self, member_id: MemberId, delay: Duration) {
        self.retire_delay_for.write().await.insert(member_id, delay);
    }

    /// Make `append_guarded` stall for `member_id` before it checks the guard.
    pub async fn delay_append_for(&self, member_id: MemberId, delay: Duration) {
        self.append_delay_for.write().await.insert(member_id, delay);
    }

    pub async fn len(&self) -> usize {
        self.lots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lots.read().await.is_empty()
    }

    async fn check_insert(&self) -> Result<()> {
        if *self.fail_on_insert.read().await {
            return Err(StorageError::Unavailable("insert failure injected".to_string()));
        }
        Ok(())
    }
}

fn journal_len(stored: &[PointLot], member_id: &MemberId) -> u64 {
    stored.iter().filter(|lot| lot.member_id == *member_id).count() as u64
}

fn append(stored: &mut Vec<PointLot>, lots: Vec<PointLot>) -> Result<()> {
    let mut seen: HashSet<LotId> = stored.iter().map(|lot| lot.id).collect();
    for lot in &lots {
        if !seen.insert(lot.id) {
            return Err(StorageError::DuplicateLot(lot.id));
        }
    }
    stored.extend(lots);
    Ok(())
}

#[async_trait]
impl LotStore for MemoryLotStore {
    async fn insert(&self, lot: PointLot) -> Result<()> {
        self.check_insert().await?;
        append(&mut *self.lots.write().await, vec![lot])
    }

    async fn insert_batch(&self, lots: Vec<PointLot>) -> Result<()> {
        if lots.is_empty() {
            return Ok(());
        }
        self.check_insert().await?;
        append(&mut *self.lots.write().await, lots)
    }

    async fn append_guarded(&self, guard: &JournalGuard, lots: Vec<PointLot>) -> Result<()> {
        let delay = self.append_delay_for.read().await.get(&guard.member_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_insert().await?;
        let mut stored = self.lots.write().await;
        guard.check(journal_len(&stored, &guard.member_id))?;
        append(&mut stored, lots)
    }

    async fn get(&self, id: LotId) -> Result<Option<PointLot>> {
        Ok(self
            .lots
            .read()
            .await
            .iter()
            .find(|lot| lot.id == id)
            .cloned())
    }

    async fn scan(&self, filter: &LotFilter) -> Result<Vec<PointLot>> {
        if *self.fail_on_scan.read().await {
            return Err(StorageError::Unavailable("scan failure injected".to_string()));
        }
        let mut matched: Vec<PointLot> = self
            .lots
            .read()
            .await
            .iter()
            .filter(|lot| filter.matches(lot))
            .cloned()
            .collect();
        matched.sort_by(|a, b| filter.order.compare(a, b));

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, filter: &LotFilter) -> Result<u64> {
        if *self.fail_on_scan.read().await {
            return Err(StorageError::Unavailable("scan failure injected".to_string()));
        }
        Ok(self
            .lots
            .read()
            .await
            .iter()
            .filter(|lot| filter.matches(lot))
            .count() as u64)
    }

    async fn retire(
        &self,
        guard: &JournalGuard,
        lot_ids: &[LotId],
        entries: Vec<PointLot>,
    ) -> Result<()> {
        let member_id = &guard.member_id;
        let delay = self.retire_delay_for.read().await.get(member_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_retire_for.read().await.contains(member_id) {
            return Err(StorageError::Unavailable(format!(
                "retire failure injected for {member_id}"
            )));
        }

        let mut stored = self.lots.write().await;
        guard.check(journal_len(&stored, member_id))?;

        let mut positions = Vec::with_capacity(lot_ids.len());
        for id in lot_ids {
            let position = stored
                .iter()
                .position(|lot| lot.id == *id && lot.kind == LotKind::Earned && !lot.is_expired)
                .ok_or(StorageError::AlreadyRetired(*id))?;
            if positions.contains(&position) {
                return Err(StorageError::AlreadyRetired(*id));
            }
            positions.push(position);
        }

        append(&mut stored, entries)?;
        for position in positions {
            stored[position].is_expired = true;
        }
        Ok(())
    }
}

/// Lease held in process memory.
#[derive(Default)]
pub struct MemorySweepLease {
    state: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl MemorySweepLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SweepLease for MemorySweepLease {
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let free = match state.as_ref() {
            None => true,
            Some((current, expires_at)) => current == holder || *expires_at <= now,
        };
        if free {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
            *state = Some((holder.to_string(), expires_at));
        }
        Ok(free)
    }

    async fn release(&self, holder: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.as_ref().is_some_and(|(current, _)| current == holder) {
            *state = None;
        }
        Ok(())
    }
}
