//! End-to-end ledger scenarios against SQLite.
//!
//! Run with: cargo test --test ledger_scenarios
//!
//! Each test gets its own database file in a temporary directory.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use pointledger::audit::MemoryAuditRecorder;
use pointledger::clock::ManualClock;
use pointledger::config::{Config, LeaseMode, StorageConfig, SweeperConfig};
use pointledger::ledger::{LedgerError, LotKind, MemberId};
use pointledger::storage::{init_storage, StorageBackend};
use pointledger::sweeper::SweepOutcome;
use pointledger::PointLedger;

fn sqlite_config(dir: &TempDir) -> Config {
    let path = dir.path().join("ledger.db");
    Config {
        storage: StorageConfig::sqlite(path.to_string_lossy()),
        sweeper: SweeperConfig {
            enabled: false,
            ..SweeperConfig::default()
        },
        ..Config::default()
    }
}

async fn sqlite_backend(dir: &TempDir) -> StorageBackend {
    init_storage(&sqlite_config(dir).storage)
        .await
        .expect("Failed to open SQLite storage")
}

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap(),
    ))
}

#[tokio::test]
async fn test_earn_deduct_and_reject_overdraw() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::from_config(&sqlite_config(&dir)).await.unwrap();
    let m = MemberId::new("member-1");

    let first = ledger.earn(&m, dec!(100), "welcome", None).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let second = ledger.earn(&m, dec!(50), "promo", Some(30)).await.unwrap();
    assert_eq!(ledger.get_available_balance(&m).await.unwrap(), dec!(150));

    let entries = ledger.deduct(&m, dec!(120), "checkout").await.unwrap();
    let drawn: Vec<_> = entries
        .iter()
        .map(|e| (e.source_lot_id, e.amount))
        .collect();
    assert_eq!(
        drawn,
        vec![(Some(first.id), dec!(-100)), (Some(second.id), dec!(-20))]
    );
    assert_eq!(ledger.get_available_balance(&m).await.unwrap(), dec!(30));

    let total_before = ledger.get_point_history(&m, 1, 100).await.unwrap().total;
    let err = ledger.deduct(&m, dec!(50), "checkout").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientPoints { required, available }
            if required == dec!(50) && available == dec!(30)
    ));
    assert_eq!(
        ledger.get_point_history(&m, 1, 100).await.unwrap().total,
        total_before
    );
}

#[tokio::test]
async fn test_exchange_follows_fifo_across_three_lots() {
    let dir = TempDir::new().unwrap();
    let backend = sqlite_backend(&dir).await;
    let clock = manual_clock();
    let ledger = PointLedger::builder(backend.lots)
        .clock(clock.clone())
        .build();
    let m = MemberId::new("member-1");

    let mut lots = Vec::new();
    for amount in [dec!(50), dec!(30), dec!(40)] {
        lots.push(ledger.earn(&m, amount, "earn", None).await.unwrap());
        clock.advance(Duration::minutes(1));
    }

    let entries = ledger.exchange(&m, dec!(75), "flight").await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].source_lot_id, Some(lots[0].id));
    assert_eq!(entries[0].amount, dec!(-50));
    assert_eq!(entries[1].source_lot_id, Some(lots[1].id));
    assert_eq!(entries[1].amount, dec!(-25));
    assert!(entries.iter().all(|e| e.kind == LotKind::Exchanged));
    assert_eq!(ledger.get_available_balance(&m).await.unwrap(), dec!(45));

    let balance = ledger.get_point_balance(&m).await.unwrap();
    assert_eq!(balance.total_earned, dec!(120));
    assert_eq!(balance.total_exchanged, dec!(75));
}

#[tokio::test]
async fn test_expiration_sweep_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let backend = sqlite_backend(&dir).await;
    let clock = manual_clock();
    let audit = Arc::new(MemoryAuditRecorder::new());
    let ledger = PointLedger::builder(backend.lots)
        .clock(clock.clone())
        .audit(audit.clone())
        .build();
    let m = MemberId::new("member-1");

    ledger.earn(&m, dec!(100), "welcome", None).await.unwrap();
    clock.advance(Duration::seconds(1));
    let lapsing = ledger.earn(&m, dec!(40), "promo", Some(7)).await.unwrap();
    clock.advance(Duration::seconds(1));
    ledger.deduct(&m, dec!(110), "checkout").await.unwrap();
    assert_eq!(ledger.get_available_balance(&m).await.unwrap(), dec!(30));

    clock.advance(Duration::days(7));
    assert_eq!(ledger.get_available_balance(&m).await.unwrap(), Decimal::ZERO);

    let first = ledger.sweep().await.unwrap();
    let second = ledger.sweep().await.unwrap();

    match first {
        SweepOutcome::Completed(report) => {
            assert_eq!(report.processed_ids, vec![lapsing.id]);
            assert_eq!(report.members_affected, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    match second {
        SweepOutcome::Completed(report) => assert_eq!(report.lots_retired, 0),
        other => panic!("unexpected outcome {other:?}"),
    }

    let balance = ledger.get_point_balance(&m).await.unwrap();
    assert_eq!(balance.total_expired, dec!(30));
    assert_eq!(balance.available_balance, Decimal::ZERO);

    let history: Decimal = ledger
        .get_point_history(&m, 1, 100)
        .await
        .unwrap()
        .items
        .iter()
        .map(|e| e.signed_amount)
        .sum();
    assert_eq!(history, balance.available_balance);
    assert!(ledger.get_lot(lapsing.id).await.unwrap().is_expired);

    let expired_records = audit
        .records_for(&m)
        .await
        .into_iter()
        .filter(|r| r.kind == LotKind::Expired)
        .count();
    assert_eq!(expired_records, 1);
}

#[tokio::test]
async fn test_concurrent_deducts_on_one_member() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(PointLedger::from_config(&sqlite_config(&dir)).await.unwrap());
    let m = MemberId::new("member-1");
    ledger.earn(&m, dec!(100), "welcome", None).await.unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let m = m.clone();
            tokio::spawn(async move { ledger.deduct(&m, dec!(30), "race").await })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientPoints { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(ledger.get_available_balance(&m).await.unwrap(), dec!(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deducts_across_instances_on_one_database() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir);
    let instances = [
        Arc::new(PointLedger::from_config(&config).await.unwrap()),
        Arc::new(PointLedger::from_config(&config).await.unwrap()),
    ];
    let m = MemberId::new("member-1");
    instances[0].earn(&m, dec!(100), "welcome", None).await.unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let ledger = Arc::clone(&instances[i % 2]);
            let m = m.clone();
            tokio::spawn(async move { ledger.deduct(&m, dec!(30), "race").await })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientPoints { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(succeeded, 3);
    for ledger in &instances {
        assert_eq!(ledger.get_available_balance(&m).await.unwrap(), dec!(10));
        let balance = ledger.get_point_balance(&m).await.unwrap();
        assert_eq!(balance.total_deducted, dec!(90));
    }
}

#[tokio::test]
async fn test_instances_expire_a_lot_once() {
    let dir = TempDir::new().unwrap();
    let first = sqlite_backend(&dir).await;
    let second = sqlite_backend(&dir).await;
    let clock = manual_clock();
    let ledgers: Vec<_> = [first, second]
        .into_iter()
        .map(|backend| {
            Arc::new(
                PointLedger::builder(backend.lots)
                    .clock(clock.clone())
                    .build(),
            )
        })
        .collect();
    let m = MemberId::new("member-1");
    ledgers[0].earn(&m, dec!(100), "welcome", None).await.unwrap();
    clock.advance(Duration::seconds(1));
    ledgers[0].earn(&m, dec!(40), "promo", Some(1)).await.unwrap();
    clock.advance(Duration::days(2));

    let (a, b) = tokio::join!(ledgers[0].sweep(), ledgers[1].sweep());

    let retired: usize = [a.unwrap(), b.unwrap()]
        .iter()
        .map(|outcome| match outcome {
            SweepOutcome::Completed(report) => {
                assert!(report.errors.is_empty(), "{:?}", report.errors);
                report.lots_retired
            }
            SweepOutcome::AlreadyRunning => 0,
        })
        .sum();
    assert_eq!(retired, 1);

    let balance = ledgers[1].get_point_balance(&m).await.unwrap();
    assert_eq!(balance.total_expired, dec!(40));
    assert_eq!(balance.available_balance, dec!(100));
}

#[tokio::test]
async fn test_journal_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir);
    let m = MemberId::new("member-1");

    {
        let ledger = PointLedger::from_config(&config).await.unwrap();
        ledger.earn(&m, dec!(12.34), "welcome", None).await.unwrap();
        ledger.deduct(&m, dec!(2.34), "coffee").await.unwrap();
    }

    let reopened = PointLedger::from_config(&config).await.unwrap();
    assert_eq!(reopened.get_available_balance(&m).await.unwrap(), dec!(10));
    assert_eq!(
        reopened.get_point_history(&m, 1, 10).await.unwrap().total,
        2
    );
}

#[tokio::test]
async fn test_store_lease_elects_one_sweeper() {
    let dir = TempDir::new().unwrap();
    let backend = sqlite_backend(&dir).await;
    let clock = manual_clock();
    let sweeper_config = SweeperConfig {
        enabled: false,
        lease: LeaseMode::Store,
        holder_id: Some("instance-a".to_string()),
        ..SweeperConfig::default()
    };
    let ledger = PointLedger::builder(backend.lots.clone())
        .clock(clock.clone())
        .lease(backend.lease.clone())
        .sweeper_config(sweeper_config)
        .build();
    let m = MemberId::new("member-1");
    ledger.earn(&m, dec!(5), "promo", Some(1)).await.unwrap();
    clock.advance(Duration::days(2));

    assert!(backend
        .lease
        .try_acquire("instance-b", StdDuration::from_secs(60))
        .await
        .unwrap());
    assert_eq!(ledger.sweep().await.unwrap(), SweepOutcome::AlreadyRunning);

    backend.lease.release("instance-b").await.unwrap();
    assert!(matches!(
        ledger.sweep().await.unwrap(),
        SweepOutcome::Completed(ref report) if report.lots_retired == 1
    ));
}

#[tokio::test]
async fn test_expiring_lookahead() {
    let dir = TempDir::new().unwrap();
    let backend = sqlite_backend(&dir).await;
    let clock = manual_clock();
    let ledger = PointLedger::builder(backend.lots)
        .clock(clock.clone())
        .build();

    let soon = ledger
        .earn(&MemberId::new("a"), dec!(5), "promo", Some(3))
        .await
        .unwrap();
    ledger
        .earn(&MemberId::new("b"), dec!(5), "promo", Some(30))
        .await
        .unwrap();
    ledger
        .earn(&MemberId::new("c"), dec!(5), "welcome", None)
        .await
        .unwrap();

    let expiring = ledger.get_expiring_within(7).await.unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].id, soon.id);

    assert!(matches!(
        ledger.get_expiring_within(u32::MAX).await,
        Err(LedgerError::Validation(_))
    ));
}
