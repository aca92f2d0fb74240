//! SQLite catalog reader.
//!
//! Uses `sqlite_master` plus the table-valued pragma functions so table names
//! are bound as parameters instead of spliced into SQL. SQLite does not keep
//! constraint names or the `AUTOINCREMENT` flag in any pragma, so those are
//! recovered from the stored `CREATE TABLE` text.

use super::{introspection_err, SchemaIntrospector};
use crate::executor::{DbError, SchemaExecutor, SqlValue};
use crate::extract::{foreign_key_name, unique_name};
use crate::migration::SyncError;
use crate::schema::{
    is_reserved_table, ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, LogicalType,
    ReferentialAction, SchemaSnapshot, TableDescriptor, UniqueConstraint,
};
use regex::Regex;
use std::collections::BTreeMap;

const TABLES_SQL: &str =
    "SELECT name, sql FROM sqlite_master WHERE type = 'table' ORDER BY name";
const TABLE_SQL: &str = "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name = $1";
const COLUMNS_SQL: &str =
    "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info($1) ORDER BY cid";
const INDEX_LIST_SQL: &str =
    "SELECT name, \"unique\", origin, partial FROM pragma_index_list($1) ORDER BY name";
const INDEX_INFO_SQL: &str = "SELECT seqno, name FROM pragma_index_info($1) ORDER BY seqno";
const FOREIGN_KEYS_SQL: &str = "\
SELECT id, seq, \"table\", \"from\", \"to\", on_delete
FROM pragma_foreign_key_list($1)
ORDER BY id, seq";

/// Reads a SQLite database
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteIntrospector;

/// Constraint clauses parsed out of `CREATE TABLE` text
struct TableText {
    autoincrement: bool,
    /// (columns, name)
    uniques: Vec<(Vec<String>, String)>,
    /// (columns, referenced table, name)
    foreign_keys: Vec<(Vec<String>, String, String)>,
}

struct Patterns {
    unique: Regex,
    foreign_key: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, SyncError> {
        let unique = Regex::new(r#"(?i)CONSTRAINT\s+"?([^"\s]+)"?\s+UNIQUE\s*\(([^)]*)\)"#)
            .map_err(|e| introspection_err("compiling unique-constraint pattern", e))?;
        let foreign_key = Regex::new(
            r#"(?i)CONSTRAINT\s+"?([^"\s]+)"?\s+FOREIGN\s+KEY\s*\(([^)]*)\)\s*REFERENCES\s+"?([^"\s(]+)"?"#,
        )
        .map_err(|e| introspection_err("compiling foreign-key pattern", e))?;
        Ok(Self {
            unique,
            foreign_key,
        })
    }

    fn parse(&self, sql: &str) -> TableText {
        let autoincrement = sql.to_ascii_uppercase().contains("AUTOINCREMENT");
        let uniques = self
            .unique
            .captures_iter(sql)
            .map(|c| (split_columns(&c[2]), c[1].to_string()))
            .collect();
        let foreign_keys = self
            .foreign_key
            .captures_iter(sql)
            .map(|c| (split_columns(&c[2]), c[3].to_string(), c[1].to_string()))
            .collect();
        TableText {
            autoincrement,
            uniques,
            foreign_keys,
        }
    }
}

fn split_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.trim().trim_matches(|ch| ch == '"' || ch == '`' || ch == '[' || ch == ']').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Map a declared SQLite column type back to a logical type
///
/// Inverse of the SQLite DDL renderer's type names; anything else is kept
/// as a custom type.
pub(crate) fn logical_type_from_declared(declared: &str) -> LogicalType {
    let upper = declared.trim().to_ascii_uppercase();
    let (base, args) = match upper.find('(') {
        Some(open) => {
            let close = upper.rfind(')').unwrap_or(upper.len());
            let args: Vec<Option<u32>> = upper[open + 1..close.max(open + 1)]
                .split(',')
                .map(|a| a.trim().parse::<u32>().ok())
                .collect();
            (upper[..open].trim().to_string(), args)
        }
        None => (upper.clone(), Vec::new()),
    };
    let arg = |i: usize| args.get(i).copied().flatten();

    match base.as_str() {
        "VARCHAR" | "CHARACTER VARYING" => LogicalType::String { length: arg(0) },
        "TEXT" => LogicalType::Text,
        "SMALLINT" => LogicalType::SmallInt,
        "INTEGER" | "INT" => LogicalType::Integer,
        "BIGINT" => LogicalType::BigInt,
        "BOOLEAN" | "BOOL" => LogicalType::Bool,
        "REAL" | "FLOAT" => LogicalType::Float,
        "DOUBLE PRECISION" | "DOUBLE" => LogicalType::Double,
        "NUMERIC" | "DECIMAL" => LogicalType::Decimal {
            precision: arg(0),
            scale: arg(1),
        },
        "TIMESTAMP" => LogicalType::Timestamp,
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => LogicalType::TimestampTz,
        "DATE" => LogicalType::Date,
        "JSON" => LogicalType::Json,
        "JSONB" => LogicalType::JsonBinary,
        "UUID" => LogicalType::Uuid,
        "BLOB" | "BYTEA" => LogicalType::Binary,
        _ => LogicalType::custom(declared.trim()),
    }
}

impl SqliteIntrospector {
    /// Read one table as it exists right now, or `None` if it does not exist
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Introspection` if a catalog read fails.
    pub fn inspect_table(
        &self,
        executor: &dyn SchemaExecutor,
        table: &str,
    ) -> Result<Option<TableDescriptor>, SyncError> {
        let patterns = Patterns::compile()?;
        let rows = executor
            .query_all(TABLE_SQL, &[SqlValue::from(table)])
            .map_err(|e| introspection_err(&format!("reading table '{table}'"), e))?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let sql = row
            .get_opt_string(1)
            .map_err(|e| introspection_err(&format!("reading table '{table}'"), e))?
            .unwrap_or_default();
        read_table(executor, &patterns, table, &sql)
            .map(Some)
            .map_err(|e| introspection_err(&format!("reading table '{table}'"), e))
    }
}

fn read_table(
    executor: &dyn SchemaExecutor,
    patterns: &Patterns,
    name: &str,
    create_sql: &str,
) -> Result<TableDescriptor, DbError> {
    let text = patterns.parse(create_sql);
    let mut table = TableDescriptor::new(name);
    let param = [SqlValue::from(name)];

    let column_rows = executor.query_all(COLUMNS_SQL, &param)?;
    let pk_count = column_rows
        .iter()
        .map(|r| r.get_i64(5))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|pk| *pk > 0)
        .count();

    for row in &column_rows {
        let cid = row.get_i64(0)?;
        let col_name = row.get_string(1)?;
        let declared = row.get_opt_string(2)?.unwrap_or_default();
        let not_null = row.get_bool(3)?;
        let default = row.get_opt_string(4)?;
        let pk = row.get_i64(5)? > 0;

        let mut logical_type = logical_type_from_declared(&declared);
        let auto_increment = pk
            && pk_count == 1
            && text.autoincrement
            && declared.trim().eq_ignore_ascii_case("INTEGER");
        if auto_increment {
            logical_type = LogicalType::BigInt;
        }

        table.columns.insert(
            col_name.clone(),
            ColumnDescriptor {
                name: col_name,
                logical_type,
                nullable: !(not_null || pk),
                default,
                primary_key: pk,
                auto_increment,
                ordinal: u32::try_from(cid).unwrap_or(0),
            },
        );
    }

    for row in executor.query_all(INDEX_LIST_SQL, &param)? {
        let index_name = row.get_string(0)?;
        let unique = row.get_bool(1)?;
        let origin = row.get_string(2)?;
        let partial = row.get_bool(3)?;
        if partial || origin == "pk" {
            continue;
        }

        let mut columns = Vec::new();
        let mut has_expression = false;
        for info in executor.query_all(INDEX_INFO_SQL, &[SqlValue::from(index_name.as_str())])? {
            match info.get_opt_string(1)? {
                Some(c) => columns.push(c),
                None => has_expression = true,
            }
        }
        if has_expression || columns.is_empty() {
            continue;
        }

        if origin == "u" {
            let constraint_name = text
                .uniques
                .iter()
                .find(|(cols, _)| *cols == columns)
                .map_or_else(|| unique_name(name, &columns), |(_, n)| n.clone());
            table
                .unique_constraints
                .insert(UniqueConstraint::new(constraint_name, columns));
        } else {
            table
                .indexes
                .insert(IndexDescriptor::new(index_name, columns, unique));
        }
    }

    // Group multi-column keys by id
    let mut fks: BTreeMap<i64, (String, Vec<String>, Vec<Option<String>>, String)> = BTreeMap::new();
    for row in executor.query_all(FOREIGN_KEYS_SQL, &param)? {
        let id = row.get_i64(0)?;
        let entry = fks.entry(id).or_insert_with(|| {
            (String::new(), Vec::new(), Vec::new(), String::new())
        });
        entry.0 = row.get_string(2)?;
        entry.1.push(row.get_string(3)?);
        entry.2.push(row.get_opt_string(4)?);
        entry.3 = row.get_opt_string(5)?.unwrap_or_default();
    }

    for (_, (ref_table, columns, to, on_delete)) in fks {
        let referenced_columns = if to.iter().all(Option::is_some) {
            to.into_iter().flatten().collect()
        } else {
            primary_key_of(executor, &ref_table)?
        };
        let on_delete = ReferentialAction::from_sql(&on_delete).ok_or_else(|| {
            DbError::ParseError(format!("unknown on-delete action '{on_delete}'"))
        })?;
        let fk_name = text
            .foreign_keys
            .iter()
            .find(|(cols, target, _)| *cols == columns && target.eq_ignore_ascii_case(&ref_table))
            .map_or_else(|| foreign_key_name(name, &columns), |(_, _, n)| n.clone());
        table.foreign_keys.insert(
            ForeignKeyDescriptor::new(fk_name, columns, ref_table, referenced_columns).on_delete(on_delete),
        );
    }

    Ok(table)
}

fn primary_key_of(executor: &dyn SchemaExecutor, table: &str) -> Result<Vec<String>, DbError> {
    let mut pk: Vec<(i64, String)> = Vec::new();
    for row in executor.query_all(COLUMNS_SQL, &[SqlValue::from(table)])? {
        let pos = row.get_i64(5)?;
        if pos > 0 {
            pk.push((pos, row.get_string(1)?));
        }
    }
    pk.sort();
    Ok(pk.into_iter().map(|(_, c)| c).collect())
}

impl SchemaIntrospector for SqliteIntrospector {
    fn inspect(&self, executor: &dyn SchemaExecutor) -> Result<SchemaSnapshot, SyncError> {
        let patterns = Patterns::compile()?;
        let rows = executor
            .query_all(TABLES_SQL, &[])
            .map_err(|e| introspection_err("reading sqlite_master", e))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row
                .get_string(0)
                .map_err(|e| introspection_err("reading sqlite_master", e))?;
            if is_reserved_table(&name) {
                continue;
            }
            let sql = row
                .get_opt_string(1)
                .map_err(|e| introspection_err("reading sqlite_master", e))?
                .unwrap_or_default();
            let table = read_table(executor, &patterns, &name, &sql)
                .map_err(|e| introspection_err(&format!("reading table '{name}'"), e))?;
            tables.push(table);
        }

        log::debug!("introspected {} tables", tables.len());
        Ok(SchemaSnapshot::from_tables(tables))
    }
}
