//! Diff engine: current snapshot + target snapshot -> raw operations.
//!
//! The diff is a pure function of its inputs. Both snapshots are ordered
//! maps, so the same pair always yields the same operations in the same
//! order. Renames are never inferred; an operator can supply explicit
//! [`ColumnRename`] overrides, applied with [`apply_renames`] before diffing.

use crate::migration::SyncError;
use crate::operation::DiffOperation;
use crate::schema::{SchemaSnapshot, TableDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Compute the operations that turn `current` into `target`
///
/// Tables present only in `current` are dropped when `strict_mode` is on or
/// when the table is listed in `retired`; otherwise they are left alone.
#[must_use]
pub fn diff(
    current: &SchemaSnapshot,
    target: &SchemaSnapshot,
    strict_mode: bool,
    retired: &BTreeSet<String>,
) -> Vec<DiffOperation> {
    let mut ops = Vec::new();

    for table in target.tables() {
        match current.table(&table.name) {
            None => ops.push(DiffOperation::CreateTable {
                table: table.clone(),
            }),
            Some(live) => diff_table(live, table, &mut ops),
        }
    }

    for table in current.tables() {
        if target.contains(&table.name) {
            continue;
        }
        if strict_mode || retired.contains(&table.name) {
            ops.push(DiffOperation::DropTable {
                table: table.clone(),
            });
        } else {
            log::debug!("leaving undeclared table '{}' in place", table.name);
        }
    }

    ops
}

fn diff_table(current: &TableDescriptor, target: &TableDescriptor, ops: &mut Vec<DiffOperation>) {
    let name = &target.name;

    for column in target.columns_in_order() {
        let Some(live) = current.columns.get(&column.name) else {
            ops.push(DiffOperation::AddColumn {
                table: name.clone(),
                column: column.clone(),
            });
            continue;
        };
        if live.logical_type != column.logical_type {
            ops.push(DiffOperation::AlterColumnType {
                table: name.clone(),
                column: column.name.clone(),
                from: live.logical_type.clone(),
                to: column.logical_type.clone(),
            });
        }
        if live.nullable != column.nullable {
            ops.push(DiffOperation::AlterColumnNullability {
                table: name.clone(),
                column: column.name.clone(),
                logical_type: column.logical_type.clone(),
                from_nullable: live.nullable,
                to_nullable: column.nullable,
            });
        }
    }

    for column in current.columns_in_order() {
        if !target.has_column(&column.name) {
            ops.push(DiffOperation::DropColumn {
                table: name.clone(),
                column: column.clone(),
            });
        }
    }

    for index in current.indexes.difference(&target.indexes) {
        ops.push(DiffOperation::DropIndex {
            table: name.clone(),
            index: index.clone(),
        });
    }
    for index in target.indexes.difference(&current.indexes) {
        ops.push(DiffOperation::AddIndex {
            table: name.clone(),
            index: index.clone(),
        });
    }

    for fk in current.foreign_keys.difference(&target.foreign_keys) {
        ops.push(DiffOperation::DropForeignKey {
            table: name.clone(),
            foreign_key: fk.clone(),
        });
    }
    for fk in target.foreign_keys.difference(&current.foreign_keys) {
        ops.push(DiffOperation::AddForeignKey {
            table: name.clone(),
            foreign_key: fk.clone(),
        });
    }

    // Unique constraints compare by column group; the live name is kept for drops
    for constraint in current
        .unique_constraints
        .difference(&target.unique_constraints)
    {
        ops.push(DiffOperation::DropUniqueConstraint {
            table: name.clone(),
            constraint: constraint.clone(),
        });
    }
    for constraint in target
        .unique_constraints
        .difference(&current.unique_constraints)
    {
        ops.push(DiffOperation::AddUniqueConstraint {
            table: name.clone(),
            constraint: constraint.clone(),
        });
    }
}

/// Operator override declaring that a column was renamed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRename {
    pub table: String,
    pub from: String,
    pub to: String,
}

impl ColumnRename {
    pub fn new(table: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Apply rename overrides to the live snapshot
///
/// Returns the rewritten snapshot to diff against plus one
/// [`DiffOperation::RenameColumn`] per override.
///
/// # Errors
///
/// Returns `SyncError::Config` if an override does not describe a rename
/// between the two snapshots: the table or source column is missing from the
/// live schema, the new name already exists there, or the target still
/// declares the old name or lacks the new one.
pub fn apply_renames(
    current: &SchemaSnapshot,
    target: &SchemaSnapshot,
    renames: &[ColumnRename],
) -> Result<(SchemaSnapshot, Vec<DiffOperation>), SyncError> {
    let mut snapshot = current.clone();
    let mut ops = Vec::with_capacity(renames.len());

    for rename in renames {
        let ColumnRename { table, from, to } = rename;
        let Some(live) = snapshot.table(table) else {
            return Err(SyncError::Config(format!(
                "rename {table}.{from} -> {to}: table '{table}' does not exist"
            )));
        };
        if !live.has_column(from) {
            return Err(SyncError::Config(format!(
                "rename {table}.{from} -> {to}: column '{from}' does not exist"
            )));
        }
        if live.has_column(to) {
            return Err(SyncError::Config(format!(
                "rename {table}.{from} -> {to}: column '{to}' already exists"
            )));
        }
        let Some(declared) = target.table(table) else {
            return Err(SyncError::Config(format!(
                "rename {table}.{from} -> {to}: table '{table}' is not declared"
            )));
        };
        if !declared.has_column(to) || declared.has_column(from) {
            return Err(SyncError::Config(format!(
                "rename {table}.{from} -> {to}: declared columns do not match the rename"
            )));
        }

        snapshot = rename_column(&snapshot, table, from, to);
        ops.push(DiffOperation::RenameColumn {
            table: table.clone(),
            from: from.clone(),
            to: to.clone(),
        });
    }

    Ok((snapshot, ops))
}

/// Rename a column and every reference to it, including foreign keys in
/// other tables
pub(crate) fn rename_column(
    snapshot: &SchemaSnapshot,
    table: &str,
    from: &str,
    to: &str,
) -> SchemaSnapshot {
    let swap = |cols: &[String]| -> Vec<String> {
        cols.iter()
            .map(|c| if c == from { to.to_string() } else { c.clone() })
            .collect()
    };

    snapshot
        .tables()
        .map(|t| {
            let mut t = t.clone();
            if t.name == table {
                if let Some(mut column) = t.columns.remove(from) {
                    column.name = to.to_string();
                    t.columns.insert(to.to_string(), column);
                }
                t.indexes = t
                    .indexes
                    .into_iter()
                    .map(|mut ix| {
                        ix.columns = swap(&ix.columns);
                        ix
                    })
                    .collect();
                t.unique_constraints = t
                    .unique_constraints
                    .into_iter()
                    .map(|mut uc| {
                        uc.columns = swap(&uc.columns);
                        uc
                    })
                    .collect();
            }
            t.foreign_keys = t
                .foreign_keys
                .into_iter()
                .map(|mut fk| {
                    if t.name == table {
                        fk.columns = swap(&fk.columns);
                    }
                    if fk.referenced_table == table {
                        fk.referenced_columns = swap(&fk.referenced_columns);
                    }
                    fk
                })
                .collect();
            t
        })
        .collect()
}
