//! Tables that reference each other

use crate::common::{self, TestDatabase};
use driftguard::migration::sync;
use driftguard::registry::{EntityDef, FieldDef, ModelRegistry};
use driftguard::schema::LogicalType;

fn guilds() -> EntityDef {
    EntityDef::new("Guild", "guilds")
        .field(FieldDef::new("id", LogicalType::BigInt).primary_key())
        .field(FieldDef::new("owner_id", LogicalType::BigInt).references("members", "id"))
}

fn members() -> EntityDef {
    EntityDef::new("Member", "members")
        .field(FieldDef::new("id", LogicalType::BigInt).primary_key())
        .field(FieldDef::new("guild_id", LogicalType::BigInt).references("guilds", "id"))
}

fn cyclic_registry() -> ModelRegistry {
    ModelRegistry::new().entity(common::users()).entity(guilds()).entity(members())
}

#[test]
fn test_cycle_is_created_before_its_foreign_keys() {
    let db = TestDatabase::new();
    let executor = db.executor();

    let preview = sync(&executor, &cyclic_registry(), &common::options().dry_run(true));
    assert!(preview.is_success(), "{preview}");
    let plan = preview.plan.expect("plan");
    let descriptions = plan.descriptions();
    let position = |needle: &str| {
        descriptions
            .iter()
            .position(|d| d.as_str() == needle)
            .unwrap_or_else(|| panic!("{needle} missing from {descriptions:?}"))
    };

    let guilds_created = position("create table guilds (2 columns)");
    let members_created = position("create table members (2 columns)");
    let guild_fk = position("add foreign key guilds_owner_id_fkey on guilds (owner_id) -> members (id)");
    let member_fk = position("add foreign key members_guild_id_fkey on members (guild_id) -> guilds (id)");
    assert!(guilds_created < guild_fk && guilds_created < member_fk);
    assert!(members_created < guild_fk && members_created < member_fk);
    assert_eq!(plan.len(), 5);

    let report = sync(&executor, &cyclic_registry(), &common::options());
    assert!(report.is_success(), "{report}");
    assert_eq!(report.operations_applied, descriptions);
    assert!(common::remaining_diff(&executor, &cyclic_registry()).is_empty());
}

#[test]
fn test_retiring_a_cycle_drops_foreign_keys_first() {
    let db = TestDatabase::new();
    let executor = db.executor();
    assert!(sync(&executor, &cyclic_registry(), &common::options()).is_success());

    let retired = ModelRegistry::new()
        .entity(common::users())
        .retire("guilds")
        .retire("members");
    let report = sync(&executor, &retired, &common::options().auto_confirm_destructive(true));
    assert!(report.is_success(), "{report}");

    let applied = &report.operations_applied;
    assert_eq!(applied.len(), 4, "{applied:?}");
    assert!(applied[..2].iter().all(|d| d.starts_with("drop foreign key")));
    assert!(applied[2..].iter().all(|d| d.starts_with("drop table")));
    assert_eq!(common::table_names(&executor), vec!["users"]);
}
