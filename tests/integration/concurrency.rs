//! Several processes racing to sync the same database

use crate::common::{self, TestDatabase};
use driftguard::migration::{sync, MigrationStatus, SyncLockGuard};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_syncs_apply_the_plan_once() {
    let db = TestDatabase::new();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let path = db.path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let executor = driftguard::SqliteExecutor::open(&path).expect("Failed to open database");
                let options = common::options().host_id(format!("bot-{i}"));
                barrier.wait();
                let report = sync(&executor, &common::registry_v1(), &options);
                (report.is_success(), report.operations_applied.len(), report.is_noop())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("sync thread panicked"))
        .collect();

    assert!(results.iter().all(|(ok, _, _)| *ok), "{results:?}");
    assert_eq!(results.iter().filter(|(_, applied, _)| *applied == 2).count(), 1);
    assert_eq!(results.iter().filter(|(_, _, noop)| *noop).count(), 1);

    let executor = db.executor();
    let records = common::ledger(&executor);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, MigrationStatus::Applied);
    assert!(common::remaining_diff(&executor, &common::registry_v1()).is_empty());
}

#[test]
fn test_sync_times_out_while_another_holds_the_lock() {
    let db = TestDatabase::new();
    let holder = db.executor();
    let guard = SyncLockGuard::acquire(&holder, Duration::from_secs(1)).unwrap();

    let executor = db.executor();
    let options = common::options().lock_timeout(Duration::from_millis(200));
    let report = sync(&executor, &common::registry_v1(), &options);

    let err = report.error.as_ref().expect("expected a lock timeout");
    assert_eq!(err.kind(), "lock_timeout");
    assert!(err.is_retryable());
    assert!(report.plan.is_none());
    assert!(common::table_names(&executor).is_empty());

    guard.release().unwrap();
    let report = sync(&executor, &common::registry_v1(), &common::options());
    assert!(report.is_success(), "{report}");
}
