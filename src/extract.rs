//! Declared schema extraction.
//!
//! Turns a [`ModelRegistry`] into the [`SchemaSnapshot`] the models require.
//! Generated constraint and index names follow the names `PostgreSQL` itself
//! picks for inline constraints, so a database created by hand or by an older
//! tool from the same models diffs to empty.

use crate::migration::SyncError;
use crate::registry::{EntityDef, ModelRegistry};
use crate::schema::{
    is_reserved_table, truncate_identifier, ColumnDescriptor, ForeignKeyDescriptor,
    IndexDescriptor, LogicalType, SchemaSnapshot, TableDescriptor, UniqueConstraint,
};
use std::collections::{BTreeMap, BTreeSet};

/// `ix_<table>_<columns>`
#[must_use]
pub fn index_name(table: &str, columns: &[String]) -> String {
    truncate_identifier(&format!("ix_{table}_{}", columns.join("_")))
}

/// `<table>_<columns>_key`
#[must_use]
pub fn unique_name(table: &str, columns: &[String]) -> String {
    truncate_identifier(&format!("{table}_{}_key", columns.join("_")))
}

/// `<table>_<columns>_fkey`
#[must_use]
pub fn foreign_key_name(table: &str, columns: &[String]) -> String {
    truncate_identifier(&format!("{table}_{}_fkey", columns.join("_")))
}

/// Build the declared snapshot
///
/// # Errors
///
/// - `SyncError::DuplicateTable` if two entities map to one table
/// - `SyncError::Config` for empty entities, duplicate fields, annotations
///   naming unknown columns, or invalid auto-increment fields
pub fn extract(registry: &ModelRegistry) -> Result<SchemaSnapshot, SyncError> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for entity in &registry.entities {
        if let Some(first) = owners.insert(entity.table.as_str(), entity.name.as_str()) {
            return Err(SyncError::DuplicateTable {
                table: entity.table.clone(),
                first: first.to_string(),
                second: entity.name.clone(),
            });
        }
    }

    let mut tables = Vec::with_capacity(registry.entities.len());
    for entity in &registry.entities {
        tables.push(extract_entity(entity)?);
    }
    let snapshot = SchemaSnapshot::from_tables(tables);

    // References into declared tables must name declared columns
    for table in snapshot.tables() {
        for fk in &table.foreign_keys {
            if let Some(target) = snapshot.table(&fk.referenced_table) {
                for col in &fk.referenced_columns {
                    if !target.has_column(col) {
                        return Err(SyncError::Config(format!(
                            "foreign key {} on '{}' references unknown column {}.{}",
                            fk.name, table.name, fk.referenced_table, col
                        )));
                    }
                }
            }
        }
    }

    for retired in &registry.retired_tables {
        if snapshot.contains(retired) {
            return Err(SyncError::Config(format!(
                "table '{retired}' is both declared and retired"
            )));
        }
    }

    Ok(snapshot)
}

fn config_err(entity: &EntityDef, msg: impl AsRef<str>) -> SyncError {
    SyncError::Config(format!(
        "entity '{}' (table '{}'): {}",
        entity.name,
        entity.table,
        msg.as_ref()
    ))
}

fn extract_entity(entity: &EntityDef) -> Result<TableDescriptor, SyncError> {
    if entity.table.trim().is_empty() {
        return Err(config_err(entity, "table name is empty"));
    }
    if is_reserved_table(&entity.table) {
        return Err(config_err(entity, "table name is reserved"));
    }
    if entity.fields.is_empty() {
        return Err(config_err(entity, "entity declares no fields"));
    }

    let table_name = entity.table.as_str();
    let mut table = TableDescriptor::new(table_name);
    let mut seen = BTreeSet::new();
    let primary_keys = entity.fields.iter().filter(|f| f.primary_key).count();

    for (ordinal, field) in entity.fields.iter().enumerate() {
        if !seen.insert(field.name.as_str()) {
            return Err(config_err(entity, format!("field '{}' is declared twice", field.name)));
        }

        let mut logical_type = field.logical_type.clone();
        if field.auto_increment {
            if !logical_type.is_integer() {
                return Err(config_err(
                    entity,
                    format!("auto-increment field '{}' must be an integer type", field.name),
                ));
            }
            if !field.primary_key || primary_keys != 1 {
                return Err(config_err(
                    entity,
                    format!(
                        "auto-increment field '{}' must be the table's only primary key",
                        field.name
                    ),
                ));
            }
            logical_type = LogicalType::BigInt;
        }
        // numeric(p) is stored with scale 0
        if let LogicalType::Decimal {
            precision: Some(_),
            scale: scale @ None,
        } = &mut logical_type
        {
            *scale = Some(0);
        }

        let column = ColumnDescriptor {
            name: field.name.clone(),
            logical_type,
            nullable: field.nullable && !field.primary_key,
            default: field.default.clone(),
            primary_key: field.primary_key,
            auto_increment: field.auto_increment,
            ordinal: u32::try_from(ordinal).unwrap_or(u32::MAX),
        };
        table.columns.insert(column.name.clone(), column);

        let cols = vec![field.name.clone()];
        if field.index {
            table
                .indexes
                .insert(IndexDescriptor::new(index_name(table_name, &cols), cols.clone(), false));
        }
        if field.unique && !(field.primary_key && primary_keys == 1) {
            table
                .unique_constraints
                .insert(UniqueConstraint::new(unique_name(table_name, &cols), cols.clone()));
        }
        if let Some(reference) = &field.references {
            table.foreign_keys.insert(
                ForeignKeyDescriptor::new(
                    foreign_key_name(table_name, &cols),
                    cols,
                    reference.table.clone(),
                    vec![reference.column.clone()],
                )
                .on_delete(reference.on_delete),
            );
        }
    }

    let check_columns = |what: &str, columns: &[String]| -> Result<(), SyncError> {
        if columns.is_empty() {
            return Err(config_err(entity, format!("{what} lists no columns")));
        }
        for col in columns {
            if !seen.contains(col.as_str()) {
                return Err(config_err(entity, format!("{what} names unknown column '{col}'")));
            }
        }
        Ok(())
    };

    for index in &entity.indexes {
        check_columns("index", &index.columns)?;
        let name = index
            .name
            .as_deref()
            .map_or_else(|| index_name(table_name, &index.columns), truncate_identifier);
        table
            .indexes
            .insert(IndexDescriptor::new(name, index.columns.clone(), index.unique));
    }

    for group in &entity.unique_groups {
        check_columns("unique group", &group.columns)?;
        let name = group
            .name
            .as_deref()
            .map_or_else(|| unique_name(table_name, &group.columns), truncate_identifier);
        table
            .unique_constraints
            .insert(UniqueConstraint::new(name, group.columns.clone()));
    }

    for fk in &entity.foreign_keys {
        check_columns("foreign key", &fk.columns)?;
        if fk.columns.len() != fk.referenced_columns.len() {
            return Err(config_err(
                entity,
                format!(
                    "foreign key on ({}) has {} referenced columns",
                    fk.columns.join(", "),
                    fk.referenced_columns.len()
                ),
            ));
        }
        let name = fk
            .name
            .as_deref()
            .map_or_else(|| foreign_key_name(table_name, &fk.columns), truncate_identifier);
        table.foreign_keys.insert(
            ForeignKeyDescriptor::new(
                name,
                fk.columns.clone(),
                fk.referenced_table.clone(),
                fk.referenced_columns.clone(),
            )
            .on_delete(fk.on_delete),
        );
    }

    let mut index_names = BTreeSet::new();
    for index in &table.indexes {
        if !index_names.insert(index.name.as_str()) {
            return Err(config_err(entity, format!("index name '{}' is used twice", index.name)));
        }
    }
    let mut fk_names = BTreeSet::new();
    for fk in &table.foreign_keys {
        if !fk_names.insert(fk.name.as_str()) {
            return Err(config_err(entity, format!("foreign key name '{}' is used twice", fk.name)));
        }
    }

    Ok(table)
}
