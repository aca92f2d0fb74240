//! Column renames are only applied when declared

use crate::common::{self, TestDatabase};
use driftguard::migration::{sync, SyncError};
use driftguard::registry::{EntityDef, ModelRegistry};
use driftguard::{ColumnRename, SchemaExecutor};

/// `characters` with `gold` renamed to `coins`
fn characters_with_coins() -> EntityDef {
    let mut entity = common::characters_v1();
    for field in &mut entity.fields {
        if field.name == "gold" {
            field.name = "coins".to_string();
        }
    }
    entity
}

fn seeded() -> (TestDatabase, driftguard::SqliteExecutor) {
    let db = TestDatabase::new();
    let executor = db.executor();
    assert!(sync(&executor, &common::registry_v1(), &common::options()).is_success());
    executor
        .execute("INSERT INTO users (discord_id, name) VALUES (7, 'grace')", &[])
        .unwrap();
    executor
        .execute(
            "INSERT INTO characters (discord_id, guild_id, slot, gold) VALUES (7, 3, 0, 980)",
            &[],
        )
        .unwrap();
    (db, executor)
}

#[test]
fn test_undeclared_rename_is_a_drop_and_an_add() {
    let (_db, executor) = seeded();
    let registry = ModelRegistry::new()
        .entity(common::users())
        .entity(characters_with_coins());

    let report = sync(&executor, &registry, &common::options());
    assert!(report.is_blocked(), "{report}");

    let blocked: Vec<&str> = report
        .destructive_operations_blocked
        .iter()
        .map(|b| b.operation.as_str())
        .collect();
    assert_eq!(blocked.len(), 2, "{blocked:?}");
    assert!(blocked.contains(&"drop column characters.gold"));
    assert!(blocked.contains(&"add column characters.coins integer NOT NULL"));
    assert!(report
        .destructive_operations_blocked
        .iter()
        .any(|b| b.reason.contains("may be a rename of characters.gold")));

    assert_eq!(common::count(&executor, "SELECT gold FROM characters WHERE discord_id = 7"), 980);
}

#[test]
fn test_declared_rename_keeps_the_data() {
    let (_db, executor) = seeded();
    let registry = ModelRegistry::new()
        .entity(common::users())
        .entity(characters_with_coins());
    let options = common::options().rename(ColumnRename::new("characters", "gold", "coins"));

    let report = sync(&executor, &registry, &options);
    assert!(report.is_success(), "{report}");
    assert_eq!(report.operations_applied, vec!["rename column characters.gold -> coins".to_string()]);
    assert_eq!(common::count(&executor, "SELECT coins FROM characters WHERE discord_id = 7"), 980);
    assert!(common::remaining_diff(&executor, &registry).is_empty());

    // the rename is done; running again without the override changes nothing
    let again = sync(&executor, &registry, &common::options());
    assert!(again.is_noop(), "{again}");
}

#[test]
fn test_rename_of_missing_column_is_rejected() {
    let (_db, executor) = seeded();
    let options = common::options().rename(ColumnRename::new("characters", "silver", "coins"));

    let report = sync(&executor, &common::registry_v1(), &options);
    match &report.error {
        Some(SyncError::Config(msg)) => assert!(msg.contains("silver"), "{msg}"),
        other => panic!("expected Config, got {other:?}"),
    }
    assert!(common::column_names(&executor, "characters").contains(&"gold".to_string()));
}
