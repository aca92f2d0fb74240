//! Schema snapshot model.
//!
//! A [`SchemaSnapshot`] is the complete, immutable description of one schema:
//! either the live database (built by [`crate::introspect`]) or the declared
//! models (built by [`crate::extract`]). Both sides use the same descriptors
//! so they can be compared by value.

mod types;

pub use types::{LogicalType, ReferentialAction};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// PostgreSQL's identifier limit; generated names are truncated to it
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Version ledger table
pub const LEDGER_TABLE: &str = "driftguard_ledger";
/// Single-row lock table used where advisory locks are unavailable
pub const LOCK_TABLE: &str = "driftguard_lock";
/// Prefix of scratch tables created while rebuilding a SQLite table
pub const REBUILD_PREFIX: &str = "__driftguard_rebuild_";

/// Tables owned by driftguard or the database engine itself
///
/// These never appear in a snapshot and may not be declared by a model.
#[must_use]
pub fn is_reserved_table(name: &str) -> bool {
    name == LEDGER_TABLE
        || name == LOCK_TABLE
        || name.starts_with("__driftguard")
        || name.starts_with("sqlite_")
}

/// Truncate an identifier to [`MAX_IDENTIFIER_BYTES`] on a char boundary
#[must_use]
pub fn truncate_identifier(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_BYTES {
        return name.to_string();
    }
    let mut end = MAX_IDENTIFIER_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    /// Default expression as SQL text
    pub default: Option<String>,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Position used when rendering `CREATE TABLE`
    pub ordinal: u32,
}

impl ColumnDescriptor {
    /// Nullable, non-key column with no default
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            default: None,
            primary_key: false,
            auto_increment: false,
            ordinal: 0,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    #[must_use]
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Whether two columns differ in a way the diff acts on
    #[must_use]
    pub fn same_shape(&self, other: &ColumnDescriptor) -> bool {
        self.logical_type == other.logical_type && self.nullable == other.nullable
    }
}

/// A plain (non-constraint) index
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
        }
    }
}

/// A foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ReferentialAction,
}

impl ForeignKeyDescriptor {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        referenced_table: impl Into<String>,
        referenced_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            referenced_table: referenced_table.into(),
            referenced_columns,
            on_delete: ReferentialAction::NoAction,
        }
    }

    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }
}

/// A unique constraint over a column group
///
/// Identity is the column group; the name is carried only so the constraint
/// can be dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

impl PartialEq for UniqueConstraint {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for UniqueConstraint {}

impl PartialOrd for UniqueConstraint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UniqueConstraint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.columns.cmp(&other.columns)
    }
}

/// One table with its columns, indexes and constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: BTreeMap<String, ColumnDescriptor>,
    pub indexes: BTreeSet<IndexDescriptor>,
    pub foreign_keys: BTreeSet<ForeignKeyDescriptor>,
    pub unique_constraints: BTreeSet<UniqueConstraint>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
            indexes: BTreeSet::new(),
            foreign_keys: BTreeSet::new(),
            unique_constraints: BTreeSet::new(),
        }
    }

    /// Add a column; its ordinal is set to the next position
    #[must_use]
    pub fn column(mut self, mut column: ColumnDescriptor) -> Self {
        column.ordinal = self.next_ordinal();
        self.columns.insert(column.name.clone(), column);
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.insert(index);
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKeyDescriptor) -> Self {
        self.foreign_keys.insert(fk);
        self
    }

    #[must_use]
    pub fn unique(mut self, unique: UniqueConstraint) -> Self {
        self.unique_constraints.insert(unique);
        self
    }

    pub(crate) fn next_ordinal(&self) -> u32 {
        self.columns
            .values()
            .map(|c| c.ordinal + 1)
            .max()
            .unwrap_or(0)
    }

    /// Columns in declaration order
    pub fn columns_in_order(&self) -> Vec<&ColumnDescriptor> {
        let mut cols: Vec<&ColumnDescriptor> = self.columns.values().collect();
        cols.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));
        cols
    }

    /// Primary-key column names in declaration order
    pub fn primary_key(&self) -> Vec<String> {
        self.columns_in_order()
            .into_iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Tables this one references, excluding itself
    pub fn referenced_tables(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.referenced_table.as_str())
            .filter(|t| *t != self.name)
            .collect()
    }
}

/// Immutable, name-ordered set of tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableDescriptor>,
}

impl SchemaSnapshot {
    /// Empty snapshot
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot; a later table with the same name replaces an earlier one
    pub fn from_tables(tables: impl IntoIterator<Item = TableDescriptor>) -> Self {
        tables.into_iter().collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Tables ordered by name
    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// New snapshot with `table` replacing the table of the same name
    #[must_use]
    pub fn with_table(&self, table: TableDescriptor) -> Self {
        let mut tables = self.tables.clone();
        tables.insert(table.name.clone(), table);
        Self { tables }
    }
}

impl FromIterator<TableDescriptor> for SchemaSnapshot {
    fn from_iter<I: IntoIterator<Item = TableDescriptor>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }
}
