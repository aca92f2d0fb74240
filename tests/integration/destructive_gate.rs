//! Destructive plans wait for confirmation

use crate::common::{self, TestDatabase};
use driftguard::migration::{sync, MigrationStatus};
use driftguard::safety::RiskTier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_dropping_a_column_is_blocked_without_confirmation() {
    let db = TestDatabase::new();
    let executor = db.executor();
    assert!(sync(&executor, &common::registry_v1(), &common::options()).is_success());

    let report = sync(&executor, &common::registry_v2(), &common::options());
    assert!(report.is_blocked(), "{report}");
    assert_eq!(report.outcome(), "confirmation_required");
    assert!(report.operations_applied.is_empty());
    assert_eq!(report.operations_skipped, vec!["drop column characters.legacy_gold".to_string()]);

    let blocked = &report.destructive_operations_blocked;
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].operation, "drop column characters.legacy_gold");
    assert_eq!(blocked[0].tier, RiskTier::Destructive);
    assert!(blocked[0].reason.contains("legacy_gold"), "{}", blocked[0].reason);

    assert!(common::column_names(&executor, "characters").contains(&"legacy_gold".to_string()));
    assert_eq!(common::ledger(&executor).len(), 1);
}

#[test]
fn test_auto_confirm_applies_destructive_plan() {
    let db = TestDatabase::new();
    let executor = db.executor();
    assert!(sync(&executor, &common::registry_v1(), &common::options()).is_success());

    let options = common::options().auto_confirm_destructive(true);
    let report = sync(&executor, &common::registry_v2(), &options);
    assert!(report.is_success(), "{report}");
    assert_eq!(report.operations_applied, vec!["drop column characters.legacy_gold".to_string()]);
    assert!(report.destructive_operations_blocked.is_empty());
    assert!(!common::column_names(&executor, "characters").contains(&"legacy_gold".to_string()));

    let records = common::ledger(&executor);
    assert_eq!(records.len(), 2);
    assert_eq!(Some(&records[1].checksum), report.plan_checksum.as_ref());
    assert_eq!(records[1].status, MigrationStatus::Applied);
}

#[test]
fn test_confirmation_callback_decides() {
    let db = TestDatabase::new();
    let executor = db.executor();
    assert!(sync(&executor, &common::registry_v1(), &common::options()).is_success());

    let asked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&asked);
    let refuse = common::options().confirm_with(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    });
    let report = sync(&executor, &common::registry_v2(), &refuse);
    assert!(report.is_blocked(), "{report}");
    assert_eq!(asked.load(Ordering::SeqCst), 1);

    let approve = common::options().confirm_with(|plan| plan.len() == 1);
    let report = sync(&executor, &common::registry_v2(), &approve);
    assert!(report.is_success(), "{report}");
    assert!(common::remaining_diff(&executor, &common::registry_v2()).is_empty());
}

#[test]
fn test_safe_plans_skip_the_confirmation_callback() {
    let db = TestDatabase::new();
    let executor = db.executor();

    let options = common::options().confirm_with(|_| panic!("safe plans are never confirmed"));
    let report = sync(&executor, &common::registry_v1(), &options);
    assert!(report.is_success(), "{report}");
}
