//! Declared model registry.
//!
//! The owning applications describe their models as [`EntityDef`]s and hand
//! the full list to a sync run as a [`ModelRegistry`]. A registry can be built
//! with the builders below, collected from types implementing
//! [`DeclaredEntity`], or loaded from JSON:
//!
//! ```json
//! {
//!   "entities": [{
//!     "name": "Character",
//!     "table": "characters",
//!     "fields": [
//!       { "name": "id", "type": { "kind": "big_int" }, "primary_key": true, "auto_increment": true },
//!       { "name": "guild_id", "type": { "kind": "big_int" }, "nullable": false, "index": true }
//!     ]
//!   }],
//!   "retired_tables": ["old_inventory"]
//! }
//! ```

use crate::schema::{LogicalType, ReferentialAction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Implemented by application model types to describe their table
pub trait DeclaredEntity {
    fn entity_def() -> EntityDef;
}

fn default_true() -> bool {
    true
}

/// Target of a single-column foreign key annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReference {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

/// One declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub logical_type: LogicalType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub references: Option<FieldReference>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            default: None,
            primary_key: false,
            auto_increment: false,
            index: false,
            unique: false,
            references: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
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
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(FieldReference {
            table: table.into(),
            column: column.into(),
            on_delete: ReferentialAction::NoAction,
        });
        self
    }

    /// Set the on-delete action of the field's reference (no-op without one)
    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let Some(r) = self.references.as_mut() {
            r.on_delete = action;
        }
        self
    }
}

/// Entity-level (possibly composite) index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Entity-level unique column group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueGroupDef {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
}

/// Entity-level (possibly composite) foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

/// One declared model and the table it maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Model name, used in error messages
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub unique_groups: Vec<UniqueGroupDef>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
            unique_groups: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
        });
        self
    }

    #[must_use]
    pub fn named_index(mut self, name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDef {
            name: Some(name.into()),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique,
        });
        self
    }

    #[must_use]
    pub fn unique_group(mut self, name: Option<&str>, columns: &[&str]) -> Self {
        self.unique_groups.push(UniqueGroupDef {
            name: name.map(str::to_string),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    #[must_use]
    pub fn foreign_key(
        mut self,
        columns: &[&str],
        referenced_table: impl Into<String>,
        referenced_columns: &[&str],
        on_delete: ReferentialAction,
    ) -> Self {
        self.foreign_keys.push(ForeignKeyDef {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            referenced_table: referenced_table.into(),
            referenced_columns: referenced_columns.iter().map(|c| (*c).to_string()).collect(),
            on_delete,
        });
        self
    }
}

/// Everything the applications declare, passed explicitly to a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistry {
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    /// Tables that were once declared and may be dropped outside strict mode
    #[serde(default)]
    pub retired_tables: BTreeSet<String>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    #[must_use]
    pub fn register<E: DeclaredEntity>(self) -> Self {
        self.entity(E::entity_def())
    }

    #[must_use]
    pub fn retire(mut self, table: impl Into<String>) -> Self {
        self.retired_tables.insert(table.into());
        self
    }

    /// Parse a registry from JSON text
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the text is not a valid registry.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read a registry from a JSON file
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Declared table names, in registration order
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.table.as_str())
    }
}
