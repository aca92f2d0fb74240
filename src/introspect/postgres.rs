//! `PostgreSQL` catalog reader.
//!
//! Every selected value is cast to `text`, `bigint` or `boolean` so rows
//! convert without depending on catalog-specific types (`name`, `oid`,
//! `"char"`, `int2vector`).

use super::{introspection_err, SchemaIntrospector};
use crate::executor::{SchemaExecutor, SqlRow, SqlValue};
use crate::migration::SyncError;
use crate::schema::{
    is_reserved_table, ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, LogicalType,
    ReferentialAction, SchemaSnapshot, TableDescriptor, UniqueConstraint,
};
use std::collections::BTreeMap;

pub const DEFAULT_SCHEMA: &str = "public";

/// Separator used when aggregating column lists; cannot appear in identifiers we create
const LIST_SEPARATOR: char = '\u{1f}';

const TABLES_SQL: &str = "\
SELECT table_name::text
FROM information_schema.tables
WHERE table_schema = $1 AND table_type = 'BASE TABLE'
ORDER BY table_name";

const COLUMNS_SQL: &str = "\
SELECT table_name::text,
       column_name::text,
       data_type::text,
       udt_name::text,
       character_maximum_length::bigint,
       numeric_precision::bigint,
       numeric_scale::bigint,
       is_nullable::text,
       column_default::text,
       is_identity::text,
       ordinal_position::bigint
FROM information_schema.columns
WHERE table_schema = $1
ORDER BY table_name, ordinal_position";

const CONSTRAINTS_SQL: &str = "\
SELECT c.conname::text,
       c.contype::text,
       t.relname::text,
       array_to_string(ARRAY(
           SELECT a.attname::text
           FROM unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
           ORDER BY k.ord), chr(31))::text,
       rt.relname::text,
       array_to_string(ARRAY(
           SELECT a.attname::text
           FROM unnest(c.confkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = c.confrelid AND a.attnum = k.attnum
           ORDER BY k.ord), chr(31))::text,
       c.confdeltype::text
FROM pg_constraint c
JOIN pg_class t ON t.oid = c.conrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
LEFT JOIN pg_class rt ON rt.oid = c.confrelid
WHERE n.nspname = $1 AND c.contype IN ('p', 'u', 'f')
ORDER BY t.relname, c.conname";

// Expression, partial and constraint-backed indexes are not represented.
const INDEXES_SQL: &str = "\
SELECT t.relname::text,
       i.relname::text,
       ix.indisunique,
       array_to_string(ARRAY(
           SELECT a.attname::text
           FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
           ORDER BY k.ord), chr(31))::text
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = $1
  AND t.relkind = 'r'
  AND NOT ix.indisprimary
  AND ix.indexprs IS NULL
  AND ix.indpred IS NULL
  AND NOT EXISTS (
      SELECT 1 FROM pg_constraint c
      WHERE c.conindid = ix.indexrelid AND c.contype IN ('p', 'u', 'x'))
ORDER BY t.relname, i.relname";

/// Reads one `PostgreSQL` schema (namespace)
#[derive(Debug, Clone)]
pub struct PostgresIntrospector {
    schema: String,
}

impl PostgresIntrospector {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }
}

impl Default for PostgresIntrospector {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(LIST_SEPARATOR).map(str::to_string).collect()
}

fn u32_opt(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

/// Map `information_schema.columns` type fields to a logical type
pub(crate) fn logical_type_from_catalog(
    data_type: &str,
    udt_name: &str,
    char_length: Option<i64>,
    precision: Option<i64>,
    scale: Option<i64>,
) -> LogicalType {
    match data_type {
        "character varying" => LogicalType::String {
            length: u32_opt(char_length),
        },
        "text" => LogicalType::Text,
        "smallint" => LogicalType::SmallInt,
        "integer" => LogicalType::Integer,
        "bigint" => LogicalType::BigInt,
        "boolean" => LogicalType::Bool,
        "real" => LogicalType::Float,
        "double precision" => LogicalType::Double,
        "numeric" => LogicalType::Decimal {
            precision: u32_opt(precision),
            scale: if precision.is_some() { u32_opt(scale) } else { None },
        },
        "timestamp without time zone" => LogicalType::Timestamp,
        "timestamp with time zone" => LogicalType::TimestampTz,
        "date" => LogicalType::Date,
        "json" => LogicalType::Json,
        "jsonb" => LogicalType::JsonBinary,
        "uuid" => LogicalType::Uuid,
        "bytea" => LogicalType::Binary,
        "USER-DEFINED" | "ARRAY" => LogicalType::custom(udt_name),
        other => LogicalType::custom(other),
    }
}

/// Strip trailing `::type` casts from a catalog default expression
pub(crate) fn strip_casts(default: &str) -> String {
    let mut expr = default.trim();
    loop {
        let Some(pos) = expr.rfind("::") else { break };
        let tail = &expr[pos + 2..];
        // A quote after the cast means the `::` sits inside a literal
        if tail.contains('\'') || tail.is_empty() {
            break;
        }
        let is_type_name = tail
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '[' | ']' | '"' | '.'));
        if !is_type_name {
            break;
        }
        expr = expr[..pos].trim_end();
    }
    expr.to_string()
}

impl PostgresIntrospector {
    fn query(
        &self,
        executor: &dyn SchemaExecutor,
        what: &str,
        sql: &str,
    ) -> Result<Vec<SqlRow>, SyncError> {
        executor
            .query_all(sql, &[SqlValue::Text(self.schema.clone())])
            .map_err(|e| introspection_err(&format!("reading {what} of schema '{}'", self.schema), e))
    }

    fn read_column(row: &SqlRow) -> Result<(String, ColumnDescriptor), crate::executor::DbError> {
        let table = row.get_string(0)?;
        let name = row.get_string(1)?;
        let data_type = row.get_string(2)?;
        let udt_name = row.get_opt_string(3)?.unwrap_or_default();
        let logical_type = logical_type_from_catalog(
            &data_type,
            &udt_name,
            row.get_opt_i64(4)?,
            row.get_opt_i64(5)?,
            row.get_opt_i64(6)?,
        );
        let nullable = row.get_string(7)? == "YES";
        let raw_default = row.get_opt_string(8)?;
        let identity = row.get_opt_string(9)?.as_deref() == Some("YES");
        let ordinal = row.get_i64(10)?;

        let serial = raw_default
            .as_deref()
            .is_some_and(|d| d.trim_start().starts_with("nextval("));
        let default = if serial {
            None
        } else {
            raw_default.as_deref().map(strip_casts)
        };

        Ok((
            table,
            ColumnDescriptor {
                name,
                logical_type,
                nullable,
                default,
                primary_key: false,
                auto_increment: serial || identity,
                ordinal: u32::try_from(ordinal.saturating_sub(1)).unwrap_or(0),
            },
        ))
    }
}

impl SchemaIntrospector for PostgresIntrospector {
    fn inspect(&self, executor: &dyn SchemaExecutor) -> Result<SchemaSnapshot, SyncError> {
        let mut tables: BTreeMap<String, TableDescriptor> = BTreeMap::new();
        for row in self.query(executor, "tables", TABLES_SQL)? {
            let name = row
                .get_string(0)
                .map_err(|e| introspection_err("reading table list", e))?;
            if !is_reserved_table(&name) {
                tables.insert(name.clone(), TableDescriptor::new(name));
            }
        }

        for row in self.query(executor, "columns", COLUMNS_SQL)? {
            let (table, column) =
                Self::read_column(&row).map_err(|e| introspection_err("reading column", e))?;
            if let Some(t) = tables.get_mut(&table) {
                t.columns.insert(column.name.clone(), column);
            }
        }

        for row in self.query(executor, "constraints", CONSTRAINTS_SQL)? {
            let read = || -> Result<_, crate::executor::DbError> {
                Ok((
                    row.get_string(0)?,
                    row.get_string(1)?,
                    row.get_string(2)?,
                    split_list(&row.get_opt_string(3)?.unwrap_or_default()),
                    row.get_opt_string(4)?,
                    split_list(&row.get_opt_string(5)?.unwrap_or_default()),
                    row.get_opt_string(6)?,
                ))
            };
            let (name, kind, table, columns, ref_table, ref_columns, del_code) =
                read().map_err(|e| introspection_err("reading constraint", e))?;
            let Some(t) = tables.get_mut(&table) else { continue };

            match kind.as_str() {
                "p" => {
                    for col in &columns {
                        let c = t.columns.get_mut(col).ok_or_else(|| {
                            introspection_err(
                                &format!("primary key {name} on '{table}'"),
                                format!("unknown column '{col}'"),
                            )
                        })?;
                        c.primary_key = true;
                    }
                }
                "u" => {
                    t.unique_constraints.insert(UniqueConstraint::new(name, columns));
                }
                "f" => {
                    let ref_table = ref_table.ok_or_else(|| {
                        introspection_err(&format!("foreign key {name} on '{table}'"), "missing referenced table")
                    })?;
                    let code = del_code.unwrap_or_else(|| "a".to_string());
                    let on_delete = ReferentialAction::from_pg_code(&code).ok_or_else(|| {
                        introspection_err(
                            &format!("foreign key {name} on '{table}'"),
                            format!("unknown on-delete code '{code}'"),
                        )
                    })?;
                    t.foreign_keys.insert(
                        ForeignKeyDescriptor::new(name, columns, ref_table, ref_columns).on_delete(on_delete),
                    );
                }
                _ => {}
            }
        }

        for row in self.query(executor, "indexes", INDEXES_SQL)? {
            let read = || -> Result<_, crate::executor::DbError> {
                Ok((
                    row.get_string(0)?,
                    row.get_string(1)?,
                    row.get_bool(2)?,
                    split_list(&row.get_opt_string(3)?.unwrap_or_default()),
                ))
            };
            let (table, name, unique, columns) =
                read().map_err(|e| introspection_err("reading index", e))?;
            if let Some(t) = tables.get_mut(&table) {
                t.indexes.insert(IndexDescriptor::new(name, columns, unique));
            }
        }

        log::debug!(
            "introspected {} tables in schema '{}'",
            tables.len(),
            self.schema
        );
        Ok(SchemaSnapshot::from_tables(tables.into_values()))
    }
}
