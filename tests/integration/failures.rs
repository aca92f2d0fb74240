//! Runs that stop early, and what they leave behind

use crate::common::{self, TestDatabase};
use driftguard::executor::{DbError, Dialect, SchemaExecutor, SqlRow, SqlValue};
use driftguard::migration::{sync, CancelFlag, SyncError, VersionLedger};
use driftguard::registry::{EntityDef, FieldDef, ModelRegistry};
use driftguard::schema::LogicalType;
use driftguard::SqliteExecutor;

/// Fails every catalog read of column metadata
struct BrokenCatalog {
    inner: SqliteExecutor,
}

impl SchemaExecutor for BrokenCatalog {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.inner.execute(sql, params)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError> {
        if sql.contains("pragma_table_info") {
            return Err(DbError::QueryError("catalog unavailable".to_string()));
        }
        self.inner.query_all(sql, params)
    }
}

#[test]
fn test_corrupt_ledger_stops_the_run() {
    let db = TestDatabase::new();
    let executor = db.executor();
    VersionLedger::new(&executor).bootstrap().unwrap();
    executor
        .execute(
            "INSERT INTO driftguard_ledger (checksum, label, applied_at, host, status) \
             VALUES ($1, 'hand edit', '2026-01-01T00:00:00+00:00', 'ops', 'exploded')",
            &[SqlValue::from("a".repeat(64))],
        )
        .unwrap();

    let report = sync(&executor, &common::registry_v1(), &common::options());
    assert!(matches!(report.error, Some(SyncError::LedgerCorruption(_))), "{report}");
    assert!(report.plan.is_none());
    assert!(common::table_names(&executor).is_empty());
}

#[test]
fn test_ledger_with_wrong_columns_is_corrupt() {
    let db = TestDatabase::new();
    let executor = db.executor();
    executor
        .execute("CREATE TABLE driftguard_ledger (id INTEGER PRIMARY KEY, version TEXT)", &[])
        .unwrap();

    let report = sync(&executor, &common::registry_v1(), &common::options());
    assert_eq!(report.outcome(), "ledger_corruption", "{report}");
    assert!(common::table_names(&executor).is_empty());
}

#[test]
fn test_introspection_failure_stops_the_run() {
    let db = TestDatabase::new();
    let seed = db.executor();
    seed.execute("CREATE TABLE users (discord_id INTEGER PRIMARY KEY)", &[])
        .unwrap();

    let executor = BrokenCatalog { inner: db.executor() };
    let report = sync(&executor, &common::registry_v1(), &common::options());
    match &report.error {
        Some(SyncError::Introspection(msg)) => assert!(msg.contains("catalog unavailable"), "{msg}"),
        other => panic!("expected Introspection, got {other:?}"),
    }
    assert!(report.plan.is_none());
    assert_eq!(common::table_names(&seed), vec!["users"]);
}

#[test]
fn test_cancelled_before_start() {
    let db = TestDatabase::new();
    let executor = db.executor();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = sync(&executor, &common::registry_v1(), &common::options().cancel_flag(cancel));
    match &report.error {
        Some(SyncError::Cancelled { committed, compensations }) => {
            assert!(committed.is_empty());
            assert!(compensations.is_empty());
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert!(common::table_names(&executor).is_empty());
}

#[test]
fn test_reapplying_a_recorded_plan_needs_an_operator() {
    let db = TestDatabase::new();
    let executor = db.executor();
    assert!(sync(&executor, &common::registry_v1(), &common::options()).is_success());

    let with_title = ModelRegistry::new()
        .entity(common::users())
        .entity(common::characters_v1().field(FieldDef::new("title", LogicalType::Text)));
    let applied = sync(&executor, &with_title, &common::options());
    assert!(applied.is_success(), "{applied}");

    // someone drops the column by hand; the same plan comes back
    executor
        .execute("ALTER TABLE characters DROP COLUMN title", &[])
        .unwrap();
    let report = sync(&executor, &with_title, &common::options());
    match &report.error {
        Some(SyncError::AlreadyApplied { checksum }) => {
            assert_eq!(Some(checksum), applied.plan_checksum.as_ref());
        }
        other => panic!("expected AlreadyApplied, got {other:?}"),
    }
    assert!(!report.error.as_ref().is_some_and(SyncError::is_retryable));
    assert_eq!(report.operations_skipped, vec!["add column characters.title text NULL".to_string()]);
    assert_eq!(common::ledger(&executor).len(), 2);
}

#[test]
fn test_duplicate_table_declaration() {
    let db = TestDatabase::new();
    let executor = db.executor();
    let registry = common::registry_v1().entity(
        EntityDef::new("Member", "users")
            .field(FieldDef::new("id", LogicalType::BigInt).primary_key()),
    );

    let report = sync(&executor, &registry, &common::options());
    match &report.error {
        Some(SyncError::DuplicateTable { table, first, second }) => {
            assert_eq!(table, "users");
            assert_eq!(first, "User");
            assert_eq!(second, "Member");
        }
        other => panic!("expected DuplicateTable, got {other:?}"),
    }
    assert!(common::table_names(&executor).is_empty());
}

#[test]
fn test_index_on_unknown_column_is_a_config_error() {
    let db = TestDatabase::new();
    let executor = db.executor();
    let registry = ModelRegistry::new().entity(common::users().index(&["nickname"]));

    let report = sync(&executor, &registry, &common::options());
    assert_eq!(report.outcome(), "config", "{report}");
    assert!(common::table_names(&executor).is_empty());
}
