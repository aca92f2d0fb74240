//! Creating a schema from nothing, re-running, and evolving it safely

use crate::common::{self, TestDatabase};
use driftguard::migration::{sync, MigrationStatus};
use driftguard::registry::{EntityDef, FieldDef, ModelRegistry};
use driftguard::schema::LogicalType;
use driftguard::SchemaExecutor;

#[test]
fn test_sync_creates_declared_schema() {
    let db = TestDatabase::new();
    let executor = db.executor();
    let registry = common::registry_v1();

    let report = sync(&executor, &registry, &common::options());
    assert!(report.is_success(), "{report}");
    assert_eq!(
        report.operations_applied,
        vec![
            "create table users (3 columns)".to_string(),
            "create table characters (6 columns)".to_string(),
        ]
    );
    assert_eq!(common::table_names(&executor), vec!["characters", "users"]);
    assert!(common::remaining_diff(&executor, &registry).is_empty());

    let record = report.ledger_record.expect("ledger record");
    assert_eq!(record.status, MigrationStatus::Applied);
    assert_eq!(record.host, "test-host");
    assert_eq!(Some(record.checksum), report.plan_checksum);
}

#[test]
fn test_second_sync_is_a_no_op() {
    let db = TestDatabase::new();
    let executor = db.executor();
    let registry = common::registry_v1();

    assert!(sync(&executor, &registry, &common::options()).is_success());
    let second = sync(&executor, &registry, &common::options());

    assert!(second.is_noop(), "{second}");
    assert!(second.operations_applied.is_empty());
    assert!(second.ledger_record.is_none());
    assert_eq!(common::ledger(&executor).len(), 1);
}

#[test]
fn test_safe_changes_apply_without_confirmation() {
    let db = TestDatabase::new();
    let executor = db.executor();
    assert!(sync(&executor, &common::registry_v1(), &common::options()).is_success());
    executor
        .execute(
            "INSERT INTO users (discord_id, name) VALUES (1, 'ada')",
            &[],
        )
        .unwrap();
    executor
        .execute(
            "INSERT INTO characters (discord_id, guild_id, slot, gold) VALUES (1, 10, 0, 250)",
            &[],
        )
        .unwrap();

    // nullable column, widened type, new index
    let mut characters = common::characters_v1();
    for field in &mut characters.fields {
        if field.name == "gold" {
            field.logical_type = LogicalType::BigInt;
        }
    }
    let characters = characters
        .field(FieldDef::new("title", LogicalType::Text))
        .index(&["slot"]);
    let registry = ModelRegistry::new().entity(common::users()).entity(characters);

    let report = sync(&executor, &registry, &common::options());
    assert!(report.is_success(), "{report}");
    assert_eq!(
        report.operations_applied,
        vec![
            "add column characters.title text NULL".to_string(),
            "alter column characters.gold type integer -> bigint".to_string(),
            "add index ix_characters_slot on characters (slot)".to_string(),
        ]
    );
    assert!(common::remaining_diff(&executor, &registry).is_empty());

    // the type change rebuilt the table; rows survive it
    assert_eq!(common::count(&executor, "SELECT gold FROM characters WHERE discord_id = 1"), 250);
    assert_eq!(common::count(&executor, "SELECT COUNT(*) FROM characters"), 1);
    assert_eq!(common::ledger(&executor).len(), 2);
}

#[test]
fn test_dry_run_leaves_database_untouched() {
    let db = TestDatabase::new();
    let executor = db.executor();

    let report = sync(&executor, &common::registry_v1(), &common::options().dry_run(true));
    assert!(report.is_success(), "{report}");
    assert_eq!(report.outcome(), "dry_run");
    assert!(report.operations_applied.is_empty());
    assert_eq!(report.operations_skipped.len(), 2);
    assert_eq!(report.plan.as_ref().map(|p| p.len()), Some(2));
    assert!(common::table_names(&executor).is_empty());
    assert!(common::ledger(&executor).is_empty());
}

#[test]
fn test_undeclared_tables_are_kept_outside_strict_mode() {
    let db = TestDatabase::new();
    let executor = db.executor();
    executor
        .execute("CREATE TABLE bot_cache (key TEXT PRIMARY KEY, value TEXT)", &[])
        .unwrap();
    let registry = ModelRegistry::new().entity(common::users());

    let report = sync(&executor, &registry, &common::options());
    assert!(report.is_success(), "{report}");
    assert!(report
        .operations_skipped
        .contains(&"keep undeclared table bot_cache".to_string()));
    assert_eq!(common::table_names(&executor), vec!["bot_cache", "users"]);

    // strict mode wants it gone, which is destructive
    let report = sync(&executor, &registry, &common::strict_options());
    assert!(report.is_blocked(), "{report}");
    assert_eq!(report.destructive_operations_blocked.len(), 1);
    assert_eq!(report.destructive_operations_blocked[0].operation, "drop table bot_cache");

    let confirmed = common::strict_options().auto_confirm_destructive(true);
    let report = sync(&executor, &registry, &confirmed);
    assert!(report.is_success(), "{report}");
    assert_eq!(common::table_names(&executor), vec!["users"]);
}

#[test]
fn test_retired_table_is_dropped_outside_strict_mode() {
    let db = TestDatabase::new();
    let executor = db.executor();
    let with_inventory = ModelRegistry::new().entity(common::users()).entity(
        EntityDef::new("Inventory", "old_inventory")
            .field(FieldDef::new("id", LogicalType::BigInt).primary_key()),
    );
    assert!(sync(&executor, &with_inventory, &common::options()).is_success());

    let retired = ModelRegistry::new().entity(common::users()).retire("old_inventory");
    let report = sync(&executor, &retired, &common::options().auto_confirm_destructive(true));
    assert!(report.is_success(), "{report}");
    assert_eq!(report.operations_applied, vec!["drop table old_inventory".to_string()]);
    assert_eq!(common::table_names(&executor), vec!["users"]);
}

#[test]
fn test_table_can_be_declared_again_after_retirement() {
    let db = TestDatabase::new();
    let executor = db.executor();
    let events = || {
        EntityDef::new("Event", "events")
            .field(FieldDef::new("id", LogicalType::BigInt).primary_key())
            .field(FieldDef::new("kind", LogicalType::string(32)).not_null())
    };
    let base = ModelRegistry::new().entity(common::users());
    let with_events = ModelRegistry::new().entity(common::users()).entity(events());
    let retired = ModelRegistry::new().entity(common::users()).retire("events");

    assert!(sync(&executor, &base, &common::options()).is_success());
    let declared = sync(&executor, &with_events, &common::options());
    assert!(declared.is_success(), "{declared}");
    let dropped = sync(&executor, &retired, &common::options().auto_confirm_destructive(true));
    assert!(dropped.is_success(), "{dropped}");
    assert_eq!(common::table_names(&executor), vec!["users"]);

    let redeclared = sync(&executor, &with_events, &common::options());
    assert!(redeclared.is_success(), "{redeclared}");
    assert_eq!(redeclared.operations_applied, vec!["create table events (2 columns)".to_string()]);
    assert_ne!(redeclared.plan_checksum, declared.plan_checksum);
    assert_eq!(common::table_names(&executor), vec!["events", "users"]);
    assert!(sync(&executor, &with_events, &common::options()).is_noop());
    assert_eq!(common::ledger(&executor).len(), 4);
}
