//! Shared fixtures: temporary databases and the game-bot models used across tests

#![allow(dead_code)]

use driftguard::executor::SchemaExecutor;
use driftguard::introspect::inspect;
use driftguard::migration::{MigrationRecord, VersionLedger};
use driftguard::registry::{EntityDef, FieldDef, ModelRegistry};
use driftguard::schema::{LogicalType, ReferentialAction};
use driftguard::{diff, extract::extract, SqliteExecutor, SyncOptions};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// A database file that lives as long as the value
pub struct TestDatabase {
    _dir: TempDir,
    pub path: PathBuf,
}

impl TestDatabase {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("driftguard.db");
        Self { _dir: dir, path }
    }

    /// A fresh connection; each one is its own session
    pub fn executor(&self) -> SqliteExecutor {
        SqliteExecutor::open(&self.path).expect("Failed to open database")
    }
}

pub fn options() -> SyncOptions {
    SyncOptions::new(false)
        .lock_timeout(Duration::from_secs(10))
        .host_id("test-host")
}

pub fn strict_options() -> SyncOptions {
    SyncOptions::new(true)
        .lock_timeout(Duration::from_secs(10))
        .host_id("test-host")
}

pub fn users() -> EntityDef {
    EntityDef::new("User", "users")
        .field(FieldDef::new("discord_id", LogicalType::BigInt).primary_key())
        .field(FieldDef::new("name", LogicalType::string(100)).not_null())
        .field(FieldDef::new("created_at", LogicalType::TimestampTz))
}

/// `characters` as first shipped, still carrying `legacy_gold`
pub fn characters_v1() -> EntityDef {
    EntityDef::new("Character", "characters")
        .field(FieldDef::new("id", LogicalType::BigInt).primary_key().auto_increment())
        .field(
            FieldDef::new("discord_id", LogicalType::BigInt)
                .not_null()
                .references("users", "discord_id")
                .on_delete(ReferentialAction::Cascade),
        )
        .field(FieldDef::new("guild_id", LogicalType::BigInt).not_null().indexed())
        .field(FieldDef::new("slot", LogicalType::Integer).not_null().default_value("0"))
        .field(FieldDef::new("gold", LogicalType::Integer).not_null().default_value("0"))
        .field(FieldDef::new("legacy_gold", LogicalType::BigInt))
        .unique_group(Some("unique_user_guild_slot"), &["discord_id", "guild_id", "slot"])
}

/// `characters` after `legacy_gold` was removed from the model
pub fn characters_v2() -> EntityDef {
    let mut entity = characters_v1();
    entity.fields.retain(|f| f.name != "legacy_gold");
    entity
}

pub fn registry_v1() -> ModelRegistry {
    ModelRegistry::new().entity(users()).entity(characters_v1())
}

pub fn registry_v2() -> ModelRegistry {
    ModelRegistry::new().entity(users()).entity(characters_v2())
}

/// Operations still needed to reach `registry` from the live schema
pub fn remaining_diff(executor: &dyn SchemaExecutor, registry: &ModelRegistry) -> Vec<String> {
    let live = inspect(executor).expect("Failed to inspect");
    let target = extract(registry).expect("Failed to extract");
    diff(&live, &target, false, &BTreeSet::new())
        .iter()
        .map(ToString::to_string)
        .collect()
}

pub fn table_names(executor: &dyn SchemaExecutor) -> Vec<String> {
    inspect(executor)
        .expect("Failed to inspect")
        .table_names()
        .map(str::to_string)
        .collect()
}

pub fn column_names(executor: &dyn SchemaExecutor, table: &str) -> Vec<String> {
    let snapshot = inspect(executor).expect("Failed to inspect");
    snapshot
        .table(table)
        .map(|t| t.columns_in_order().into_iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default()
}

pub fn ledger(executor: &dyn SchemaExecutor) -> Vec<MigrationRecord> {
    VersionLedger::new(executor).records().expect("Failed to read ledger")
}

pub fn count(executor: &dyn SchemaExecutor, sql: &str) -> i64 {
    executor
        .query_one(sql, &[])
        .and_then(|row| row.get_i64(0))
        .expect("Failed to count")
}
