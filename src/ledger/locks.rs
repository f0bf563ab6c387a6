//! Per-member serialization of ledger mutations.
//!
//! A balance check and the writes it authorises must run as one unit per
//! member, or two concurrent deducts can both pass the check against the same
//! lots. `MemberLocks` hands out one async mutex per member; different
//! members never wait on each other beyond the registry lookup.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::types::MemberId;

/// Registry size above which dead entries are pruned on insert.
const PRUNE_THRESHOLD: usize = 1024;

/// Keyed async mutex registry.
#[derive(Debug, Default)]
pub struct MemberLocks {
    registry: Mutex<HashMap<MemberId, Weak<Mutex<()>>>>,
}

/// Held while a member's journal is being mutated.
pub struct MemberGuard {
    _guard: OwnedMutexGuard<()>,
}

impl MemberLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `member_id`.
    pub async fn lock(&self, member_id: &MemberId) -> MemberGuard {
        let lock = self.lock_for(member_id).await;
        MemberGuard {
            _guard: lock.lock_owned().await,
        }
    }

    async fn lock_for(&self, member_id: &MemberId) -> Arc<Mutex<()>> {
        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.get(member_id).and_then(Weak::upgrade) {
            return existing;
        }
        if registry.len() >= PRUNE_THRESHOLD {
            registry.retain(|_, weak| weak.strong_count() > 0);
        }
        let lock = Arc::new(Mutex::new(()));
        registry.insert(member_id.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Members with a live lock (held or awaited).
    pub async fn active(&self) -> usize {
        self.registry
            .lock()
            .await
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
