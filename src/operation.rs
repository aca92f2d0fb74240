//! Schema change operations.
//!
//! Each [`DiffOperation`] carries every descriptor needed to execute it and to
//! build its reverse without looking at the database again.

use crate::schema::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, LogicalType, TableDescriptor,
    UniqueConstraint,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOperation {
    CreateTable {
        table: TableDescriptor,
    },
    DropTable {
        table: TableDescriptor,
    },
    AddColumn {
        table: String,
        column: ColumnDescriptor,
    },
    DropColumn {
        table: String,
        column: ColumnDescriptor,
    },
    AlterColumnType {
        table: String,
        column: String,
        from: LogicalType,
        to: LogicalType,
    },
    AlterColumnNullability {
        table: String,
        column: String,
        logical_type: LogicalType,
        from_nullable: bool,
        to_nullable: bool,
    },
    AddIndex {
        table: String,
        index: IndexDescriptor,
    },
    DropIndex {
        table: String,
        index: IndexDescriptor,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDescriptor,
    },
    DropForeignKey {
        table: String,
        foreign_key: ForeignKeyDescriptor,
    },
    AddUniqueConstraint {
        table: String,
        constraint: UniqueConstraint,
    },
    DropUniqueConstraint {
        table: String,
        constraint: UniqueConstraint,
    },
    /// Only produced from an explicit operator override
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
}

impl DiffOperation {
    /// Table the operation acts on
    #[must_use]
    pub fn table_name(&self) -> &str {
        match self {
            DiffOperation::CreateTable { table } | DiffOperation::DropTable { table } => &table.name,
            DiffOperation::AddColumn { table, .. }
            | DiffOperation::DropColumn { table, .. }
            | DiffOperation::AlterColumnType { table, .. }
            | DiffOperation::AlterColumnNullability { table, .. }
            | DiffOperation::AddIndex { table, .. }
            | DiffOperation::DropIndex { table, .. }
            | DiffOperation::AddForeignKey { table, .. }
            | DiffOperation::DropForeignKey { table, .. }
            | DiffOperation::AddUniqueConstraint { table, .. }
            | DiffOperation::DropUniqueConstraint { table, .. }
            | DiffOperation::RenameColumn { table, .. } => table,
        }
    }

    /// Name of the object (column, index, constraint, table) acted on
    #[must_use]
    pub fn object_name(&self) -> &str {
        match self {
            DiffOperation::CreateTable { table } | DiffOperation::DropTable { table } => &table.name,
            DiffOperation::AddColumn { column, .. } | DiffOperation::DropColumn { column, .. } => {
                &column.name
            }
            DiffOperation::AlterColumnType { column, .. }
            | DiffOperation::AlterColumnNullability { column, .. } => column,
            DiffOperation::AddIndex { index, .. } | DiffOperation::DropIndex { index, .. } => &index.name,
            DiffOperation::AddForeignKey { foreign_key, .. }
            | DiffOperation::DropForeignKey { foreign_key, .. } => &foreign_key.name,
            DiffOperation::AddUniqueConstraint { constraint, .. }
            | DiffOperation::DropUniqueConstraint { constraint, .. } => &constraint.name,
            DiffOperation::RenameColumn { from, .. } => from,
        }
    }

    /// Short variant name
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DiffOperation::CreateTable { .. } => "create_table",
            DiffOperation::DropTable { .. } => "drop_table",
            DiffOperation::AddColumn { .. } => "add_column",
            DiffOperation::DropColumn { .. } => "drop_column",
            DiffOperation::AlterColumnType { .. } => "alter_column_type",
            DiffOperation::AlterColumnNullability { .. } => "alter_column_nullability",
            DiffOperation::AddIndex { .. } => "add_index",
            DiffOperation::DropIndex { .. } => "drop_index",
            DiffOperation::AddForeignKey { .. } => "add_foreign_key",
            DiffOperation::DropForeignKey { .. } => "drop_foreign_key",
            DiffOperation::AddUniqueConstraint { .. } => "add_unique_constraint",
            DiffOperation::DropUniqueConstraint { .. } => "drop_unique_constraint",
            DiffOperation::RenameColumn { .. } => "rename_column",
        }
    }

    /// The operation that undoes this one
    ///
    /// Undoing a drop restores structure only; dropped data is not recovered.
    #[must_use]
    pub fn reverse(&self) -> DiffOperation {
        match self.clone() {
            DiffOperation::CreateTable { table } => DiffOperation::DropTable { table },
            DiffOperation::DropTable { table } => DiffOperation::CreateTable { table },
            DiffOperation::AddColumn { table, column } => DiffOperation::DropColumn { table, column },
            DiffOperation::DropColumn { table, column } => DiffOperation::AddColumn { table, column },
            DiffOperation::AlterColumnType {
                table,
                column,
                from,
                to,
            } => DiffOperation::AlterColumnType {
                table,
                column,
                from: to,
                to: from,
            },
            DiffOperation::AlterColumnNullability {
                table,
                column,
                logical_type,
                from_nullable,
                to_nullable,
            } => DiffOperation::AlterColumnNullability {
                table,
                column,
                logical_type,
                from_nullable: to_nullable,
                to_nullable: from_nullable,
            },
            DiffOperation::AddIndex { table, index } => DiffOperation::DropIndex { table, index },
            DiffOperation::DropIndex { table, index } => DiffOperation::AddIndex { table, index },
            DiffOperation::AddForeignKey { table, foreign_key } => {
                DiffOperation::DropForeignKey { table, foreign_key }
            }
            DiffOperation::DropForeignKey { table, foreign_key } => {
                DiffOperation::AddForeignKey { table, foreign_key }
            }
            DiffOperation::AddUniqueConstraint { table, constraint } => {
                DiffOperation::DropUniqueConstraint { table, constraint }
            }
            DiffOperation::DropUniqueConstraint { table, constraint } => {
                DiffOperation::AddUniqueConstraint { table, constraint }
            }
            DiffOperation::RenameColumn { table, from, to } => DiffOperation::RenameColumn {
                table,
                from: to,
                to: from,
            },
        }
    }

    /// Human-readable one-line description
    #[must_use]
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "NULL"
    } else {
        "NOT NULL"
    }
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffOperation::CreateTable { table } => {
                write!(f, "create table {} ({} columns)", table.name, table.columns.len())
            }
            DiffOperation::DropTable { table } => write!(f, "drop table {}", table.name),
            DiffOperation::AddColumn { table, column } => write!(
                f,
                "add column {table}.{} {} {}",
                column.name,
                column.logical_type,
                nullability(column.nullable)
            ),
            DiffOperation::DropColumn { table, column } => {
                write!(f, "drop column {table}.{}", column.name)
            }
            DiffOperation::AlterColumnType {
                table,
                column,
                from,
                to,
            } => write!(f, "alter column {table}.{column} type {from} -> {to}"),
            DiffOperation::AlterColumnNullability {
                table,
                column,
                from_nullable,
                to_nullable,
                ..
            } => write!(
                f,
                "alter column {table}.{column} {} -> {}",
                nullability(*from_nullable),
                nullability(*to_nullable)
            ),
            DiffOperation::AddIndex { table, index } => write!(
                f,
                "add {}index {} on {table} ({})",
                if index.unique { "unique " } else { "" },
                index.name,
                index.columns.join(", ")
            ),
            DiffOperation::DropIndex { table, index } => {
                write!(f, "drop index {} on {table}", index.name)
            }
            DiffOperation::AddForeignKey { table, foreign_key } => write!(
                f,
                "add foreign key {} on {table} ({}) -> {} ({})",
                foreign_key.name,
                foreign_key.columns.join(", "),
                foreign_key.referenced_table,
                foreign_key.referenced_columns.join(", ")
            ),
            DiffOperation::DropForeignKey { table, foreign_key } => {
                write!(f, "drop foreign key {} on {table}", foreign_key.name)
            }
            DiffOperation::AddUniqueConstraint { table, constraint } => write!(
                f,
                "add unique constraint {} on {table} ({})",
                constraint.name,
                constraint.columns.join(", ")
            ),
            DiffOperation::DropUniqueConstraint { table, constraint } => {
                write!(f, "drop unique constraint {} on {table}", constraint.name)
            }
            DiffOperation::RenameColumn { table, from, to } => {
                write!(f, "rename column {table}.{from} -> {to}")
            }
        }
    }
}
