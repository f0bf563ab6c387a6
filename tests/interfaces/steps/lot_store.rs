//! LotStore interface step definitions.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cucumber::{given, then, when, World};
use pointledger::ledger::{LotId, LotKind, MemberId, PointLot};
use pointledger::storage::{JournalGuard, LotFilter, LotOrder, LotStore, StorageError};
use rust_decimal::Decimal;

use crate::backend::{StorageBackend, StorageContext};

/// Test context for LotStore scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct LotStoreWorld {
    backend: StorageBackend,
    context: Option<StorageContext>,
    now: DateTime<Utc>,
    lots: HashMap<String, PointLot>,
    fetched: Option<Option<PointLot>>,
    scanned: Vec<PointLot>,
    last_error: Option<StorageError>,
    guard: Option<JournalGuard>,
}

impl LotStoreWorld {
    fn new() -> Self {
        Self {
            backend: StorageBackend::from_env(),
            context: None,
            now: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
            lots: HashMap::new(),
            fetched: None,
            scanned: Vec::new(),
            last_error: None,
            guard: None,
        }
    }

    fn store(&self) -> &dyn LotStore {
        self.context
            .as_ref()
            .expect("Storage context not initialized")
            .lot_store
            .as_ref()
    }

    fn lot(&self, name: &str) -> &PointLot {
        self.lots
            .get(name)
            .unwrap_or_else(|| panic!("no lot named {name}"))
    }

    async fn store_earned(
        &mut self,
        name: String,
        member: String,
        amount: Decimal,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let lot = PointLot::earned(
            MemberId::new(member),
            amount,
            format!("lot {name}"),
            expires_at,
            created_at,
        );
        self.store()
            .insert(lot.clone())
            .await
            .expect("Failed to insert lot");
        self.lots.insert(name, lot);
    }

    async fn guard_for(&self, member_id: &MemberId) -> JournalGuard {
        let len = self
            .store()
            .count(&LotFilter::for_member(member_id))
            .await
            .expect("Failed to count");
        JournalGuard::new(member_id, len)
    }

    fn expired_entry(&self, name: &str, source: &PointLot) -> PointLot {
        PointLot::journal_entry(
            source.member_id.clone(),
            LotKind::Expired,
            source.amount,
            source.id,
            format!("expired {name}"),
            self.now,
        )
    }

    fn names_to_ids(&self, names: &str) -> Vec<LotId> {
        names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| self.lot(name).id)
            .collect()
    }
}

fn points(text: &str) -> Decimal {
    Decimal::from_str(text).expect("not a decimal")
}

// --- Background ---

#[given("a LotStore backend")]
async fn given_lot_store_backend(world: &mut LotStoreWorld) {
    println!("Using backend: {}", world.backend.name());
    world.context = Some(StorageContext::new(world.backend).await);
}

// --- Given steps ---

#[given(expr = "an earned lot {string} of {word} points for member {string}")]
async fn given_earned_lot(world: &mut LotStoreWorld, name: String, amount: String, member: String) {
    let now = world.now;
    world
        .store_earned(name, member, points(&amount), now, None)
        .await;
}

#[given(expr = "an earned lot {string} of {word} points for member {string} created {int} days ago")]
async fn given_earned_lot_created(
    world: &mut LotStoreWorld,
    name: String,
    amount: String,
    member: String,
    days: i64,
) {
    let created_at = world.now - Duration::days(days);
    world
        .store_earned(name, member, points(&amount), created_at, None)
        .await;
}

#[given(expr = "an earned lot {string} of {word} points for member {string} expiring {int} days ago")]
async fn given_earned_lot_lapsed(
    world: &mut LotStoreWorld,
    name: String,
    amount: String,
    member: String,
    days: i64,
) {
    let expires_at = world.now - Duration::days(days);
    let created_at = expires_at - Duration::days(30);
    world
        .store_earned(name, member, points(&amount), created_at, Some(expires_at))
        .await;
}

#[given(expr = "an earned lot {string} of {word} points for member {string} expiring in {int} days")]
async fn given_earned_lot_expiring(
    world: &mut LotStoreWorld,
    name: String,
    amount: String,
    member: String,
    days: i64,
) {
    let now = world.now;
    world
        .store_earned(name, member, points(&amount), now, Some(now + Duration::days(days)))
        .await;
}

#[given(expr = "lots {string} for member {string} created a day apart")]
async fn given_lots_a_day_apart(world: &mut LotStoreWorld, names: String, member: String) {
    let names: Vec<String> = names.split(',').map(|n| n.trim().to_string()).collect();
    let count = names.len() as i64;
    for (i, name) in names.into_iter().enumerate() {
        let created_at = world.now - Duration::days(count - i as i64);
        world
            .store_earned(name, member.clone(), Decimal::ONE, created_at, None)
            .await;
    }
}

#[given(expr = "a deduction {string} of {word} points from lot {string}")]
async fn given_deduction(world: &mut LotStoreWorld, name: String, amount: String, source: String) {
    let source = world.lot(&source).clone();
    let entry = PointLot::journal_entry(
        source.member_id.clone(),
        LotKind::Deducted,
        points(&amount),
        source.id,
        format!("deduction {name}"),
        world.now,
    );
    world
        .store()
        .insert(entry.clone())
        .await
        .expect("Failed to insert entry");
    world.lots.insert(name, entry);
}

#[given(expr = "lot {string} has been retired")]
async fn given_lot_retired(world: &mut LotStoreWorld, name: String) {
    let lot = world.lot(&name).clone();
    let guard = world.guard_for(&lot.member_id).await;
    world
        .store()
        .retire(&guard, &[lot.id], Vec::new())
        .await
        .expect("Failed to retire lot");
}

#[given(expr = "a journal guard taken for member {string}")]
async fn given_journal_guard(world: &mut LotStoreWorld, member: String) {
    world.guard = Some(world.guard_for(&MemberId::new(member)).await);
}

// --- When steps ---

#[when(expr = "I fetch lot {string}")]
async fn when_fetch_lot(world: &mut LotStoreWorld, name: String) {
    let id = world.lot(&name).id;
    world.fetched = Some(world.store().get(id).await.expect("Failed to get lot"));
}

#[when("I fetch an unknown lot")]
async fn when_fetch_unknown(world: &mut LotStoreWorld) {
    world.fetched = Some(
        world
            .store()
            .get(LotId::new())
            .await
            .expect("Failed to get lot"),
    );
}

#[when(expr = "I insert lot {string} again")]
async fn when_insert_again(world: &mut LotStoreWorld, name: String) {
    let lot = world.lot(&name).clone();
    world.last_error = world.store().insert(lot).await.err();
}

#[when(expr = "I insert a batch of a new lot {string} for member {string} and lot {string}")]
async fn when_insert_batch_with_duplicate(
    world: &mut LotStoreWorld,
    fresh: String,
    member: String,
    existing: String,
) {
    let lot = PointLot::earned(
        MemberId::new(member),
        Decimal::ONE,
        format!("lot {fresh}"),
        None,
        world.now,
    );
    let duplicate = world.lot(&existing).clone();
    world.lots.insert(fresh, lot.clone());
    world.last_error = world.store().insert_batch(vec![lot, duplicate]).await.err();
}

#[when(expr = "I scan member {string} oldest first")]
async fn when_scan_oldest_first(world: &mut LotStoreWorld, member: String) {
    let filter = LotFilter::for_member(&MemberId::new(member));
    world.scanned = world.store().scan(&filter).await.expect("Failed to scan");
}

#[when(expr = "I scan member {string} newest first with limit {int} and offset {int}")]
async fn when_scan_newest_first_paged(
    world: &mut LotStoreWorld,
    member: String,
    limit: u64,
    offset: u64,
) {
    let filter = LotFilter::for_member(&MemberId::new(member))
        .order(LotOrder::CreatedDesc)
        .page(limit, offset);
    world.scanned = world.store().scan(&filter).await.expect("Failed to scan");
}

#[when("I scan unretired earned lots expiring by now")]
async fn when_scan_due(world: &mut LotStoreWorld) {
    let filter = LotFilter::all()
        .unretired_earned()
        .expires_at_or_before(world.now);
    world.scanned = world.store().scan(&filter).await.expect("Failed to scan");
}

#[when(expr = "I retire lot {string} with an expired entry {string}")]
async fn when_retire_with_entry(world: &mut LotStoreWorld, name: String, entry_name: String) {
    let lot = world.lot(&name).clone();
    let entry = world.expired_entry(&entry_name, &lot);
    world.lots.insert(entry_name, entry.clone());
    let guard = match world.guard.clone() {
        Some(guard) => guard,
        None => world.guard_for(&lot.member_id).await,
    };
    world.last_error = world.store().retire(&guard, &[lot.id], vec![entry]).await.err();
}

#[when(expr = "I retire lot {string} with no entries")]
async fn when_retire_without_entries(world: &mut LotStoreWorld, name: String) {
    let lot = world.lot(&name).clone();
    let guard = world.guard_for(&lot.member_id).await;
    world.last_error = world.store().retire(&guard, &[lot.id], Vec::new()).await.err();
}

#[when(expr = "I append a deduction {string} of {word} points from lot {string} under the guard")]
async fn when_append_under_guard(
    world: &mut LotStoreWorld,
    name: String,
    amount: String,
    source: String,
) {
    let source = world.lot(&source).clone();
    let guard = world.guard.clone().expect("No journal guard taken");
    let entry = PointLot::journal_entry(
        source.member_id.clone(),
        LotKind::Deducted,
        points(&amount),
        source.id,
        format!("deduction {name}"),
        world.now,
    );
    world.lots.insert(name, entry.clone());
    world.last_error = world.store().append_guarded(&guard, vec![entry]).await.err();
}

// --- Then steps ---

#[then(expr = "the fetched lot matches {string}")]
async fn then_fetched_matches(world: &mut LotStoreWorld, name: String) {
    let expected = world.lot(&name).clone();
    assert_eq!(world.fetched.clone().flatten(), Some(expected));
}

#[then("no lot is returned")]
async fn then_no_lot(world: &mut LotStoreWorld) {
    assert_eq!(world.fetched, Some(None));
}

#[then("the operation fails with a duplicate lot error")]
async fn then_duplicate_error(world: &mut LotStoreWorld) {
    assert!(
        matches!(world.last_error, Some(StorageError::DuplicateLot(_))),
        "expected DuplicateLot, got {:?}",
        world.last_error
    );
}

#[then("the operation fails with an already retired error")]
async fn then_already_retired_error(world: &mut LotStoreWorld) {
    assert!(
        matches!(world.last_error, Some(StorageError::AlreadyRetired(_))),
        "expected AlreadyRetired, got {:?}",
        world.last_error
    );
}

#[then("the operation fails with a journal conflict error")]
async fn then_journal_conflict_error(world: &mut LotStoreWorld) {
    assert!(
        matches!(world.last_error, Some(StorageError::JournalConflict { .. })),
        "expected JournalConflict, got {:?}",
        world.last_error
    );
}

#[then("the operation succeeds")]
async fn then_succeeds(world: &mut LotStoreWorld) {
    assert!(world.last_error.is_none(), "unexpected error {:?}", world.last_error);
}

#[then(expr = "lot {string} is not stored")]
async fn then_not_stored(world: &mut LotStoreWorld, name: String) {
    let id = world.lot(&name).id;
    assert_eq!(world.store().get(id).await.expect("Failed to get lot"), None);
}

#[then(expr = "member {string} has {int} lots")]
async fn then_member_count(world: &mut LotStoreWorld, member: String, count: u64) {
    let filter = LotFilter::for_member(&MemberId::new(member));
    assert_eq!(
        world.store().count(&filter).await.expect("Failed to count"),
        count
    );
}

#[then(expr = "the scan returns {string}")]
async fn then_scan_returns(world: &mut LotStoreWorld, names: String) {
    let expected = world.names_to_ids(&names);
    let actual: Vec<LotId> = world.scanned.iter().map(|lot| lot.id).collect();
    assert_eq!(actual, expected);
}

#[then(expr = "lot {string} is flagged expired")]
async fn then_flagged(world: &mut LotStoreWorld, name: String) {
    let id = world.lot(&name).id;
    let lot = world
        .store()
        .get(id)
        .await
        .expect("Failed to get lot")
        .expect("Lot missing");
    assert!(lot.is_expired);
}

#[then(expr = "lot {string} is stored with amount {word}")]
async fn then_stored_with_amount(world: &mut LotStoreWorld, name: String, amount: String) {
    let id = world.lot(&name).id;
    let lot = world
        .store()
        .get(id)
        .await
        .expect("Failed to get lot")
        .expect("Lot missing");
    assert_eq!(lot.amount, points(&amount));
    assert_eq!(lot.kind, LotKind::Expired);
}
