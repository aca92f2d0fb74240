//! SQLite DDL.
//!
//! SQLite's `ALTER TABLE` can add, drop and rename columns but cannot change
//! a column's type or nullability or touch constraints. Those operations
//! rebuild the table: read its current shape, create a scratch table with
//! the new shape, copy the shared columns, drop the original and rename the
//! scratch table into place, then recreate the indexes.

use super::{quote, quote_list};
use crate::executor::{DbError, SchemaExecutor};
use crate::introspect::SqliteIntrospector;
use crate::operation::DiffOperation;
use crate::schema::{ColumnDescriptor, IndexDescriptor, LogicalType, TableDescriptor, REBUILD_PREFIX};

/// SQLite type name for a logical type
///
/// Must stay the inverse of the introspector's declared-type mapping.
#[must_use]
pub fn type_name(logical_type: &LogicalType) -> String {
    match logical_type {
        LogicalType::String { length: Some(n) } => format!("VARCHAR({n})"),
        LogicalType::String { length: None } => "VARCHAR".to_string(),
        LogicalType::Text => "TEXT".to_string(),
        LogicalType::SmallInt => "SMALLINT".to_string(),
        LogicalType::Integer => "INTEGER".to_string(),
        LogicalType::BigInt => "BIGINT".to_string(),
        LogicalType::Bool => "BOOLEAN".to_string(),
        LogicalType::Float => "REAL".to_string(),
        LogicalType::Double => "DOUBLE PRECISION".to_string(),
        LogicalType::Decimal {
            precision: Some(p),
            scale: Some(s),
        } => format!("NUMERIC({p}, {s})"),
        LogicalType::Decimal {
            precision: Some(p),
            scale: None,
        } => format!("NUMERIC({p})"),
        LogicalType::Decimal { .. } => "NUMERIC".to_string(),
        LogicalType::Timestamp => "TIMESTAMP".to_string(),
        LogicalType::TimestampTz => "TIMESTAMPTZ".to_string(),
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Json => "JSON".to_string(),
        LogicalType::JsonBinary => "JSONB".to_string(),
        LogicalType::Uuid => "UUID".to_string(),
        LogicalType::Binary => "BLOB".to_string(),
        LogicalType::Custom { name } => name.clone(),
    }
}

fn column_sql(column: &ColumnDescriptor, inline_pk: bool) -> String {
    if column.auto_increment && inline_pk {
        return format!("{} INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT", quote(&column.name));
    }
    let mut sql = format!("{} {}", quote(&column.name), type_name(&column.logical_type));
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if inline_pk && column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

/// `CREATE TABLE` for `table` under `name`, constraints inline
fn create_table_sql(name: &str, table: &TableDescriptor) -> String {
    let primary_key = table.primary_key();
    let inline_pk = primary_key.len() == 1;

    let mut parts: Vec<String> = table
        .columns_in_order()
        .into_iter()
        .map(|c| column_sql(c, inline_pk))
        .collect();
    if primary_key.len() > 1 {
        parts.push(format!("PRIMARY KEY ({})", quote_list(&primary_key)));
    }
    for constraint in &table.unique_constraints {
        parts.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote(&constraint.name),
            quote_list(&constraint.columns)
        ));
    }
    for fk in &table.foreign_keys {
        parts.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            quote(&fk.name),
            quote_list(&fk.columns),
            quote(&fk.referenced_table),
            quote_list(&fk.referenced_columns),
            fk.on_delete.as_sql()
        ));
    }

    format!("CREATE TABLE {} ({})", quote(name), parts.join(", "))
}

fn create_index_sql(table: &str, index: &IndexDescriptor) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(table),
        quote_list(&index.columns)
    )
}

/// `CREATE TABLE` followed by one `CREATE INDEX` per plain index
#[must_use]
pub fn create_table(table: &TableDescriptor) -> Vec<String> {
    let mut statements = vec![create_table_sql(&table.name, table)];
    statements.extend(table.indexes.iter().map(|i| create_index_sql(&table.name, i)));
    statements
}

/// Statements for operations `ALTER TABLE` can express; `None` when the
/// operation needs a table rebuild
#[must_use]
pub fn render(op: &DiffOperation) -> Option<Vec<String>> {
    let statements = match op {
        DiffOperation::CreateTable { table } => create_table(table),
        DiffOperation::DropTable { table } => vec![format!("DROP TABLE {}", quote(&table.name))],
        // ADD COLUMN rejects key columns and NOT NULL without a default
        DiffOperation::AddColumn { column, .. }
            if column.primary_key || (!column.nullable && column.default.is_none()) =>
        {
            return None
        }
        DiffOperation::AddColumn { table, column } => vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote(table),
            column_sql(column, false)
        )],
        DiffOperation::DropColumn { column, .. } if column.primary_key => return None,
        DiffOperation::DropColumn { table, column } => vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote(table),
            quote(&column.name)
        )],
        DiffOperation::RenameColumn { table, from, to } => vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote(table),
            quote(from),
            quote(to)
        )],
        DiffOperation::AddIndex { table, index } => vec![create_index_sql(table, index)],
        DiffOperation::DropIndex { index, .. } => vec![format!("DROP INDEX {}", quote(&index.name))],
        DiffOperation::AlterColumnType { .. }
        | DiffOperation::AlterColumnNullability { .. }
        | DiffOperation::AddForeignKey { .. }
        | DiffOperation::DropForeignKey { .. }
        | DiffOperation::AddUniqueConstraint { .. }
        | DiffOperation::DropUniqueConstraint { .. } => return None,
    };
    Some(statements)
}

/// Apply one operation, rebuilding the table when needed
///
/// # Errors
///
/// Returns `DbError` if a statement fails or the table to rebuild cannot be
/// read or no longer has the object the operation expects.
pub fn apply(executor: &dyn SchemaExecutor, op: &DiffOperation) -> Result<(), DbError> {
    if let Some(statements) = render(op) {
        for sql in statements {
            executor.execute(&sql, &[])?;
        }
        return Ok(());
    }

    let table_name = op.table_name();
    let current = SqliteIntrospector
        .inspect_table(executor, table_name)
        .map_err(|e| DbError::QueryError(e.to_string()))?
        .ok_or_else(|| DbError::QueryError(format!("table '{table_name}' does not exist")))?;
    let rebuilt = reshape(&current, op)?;
    rebuild(executor, &current, &rebuilt)
}

fn missing(what: &str, table: &str, name: &str) -> DbError {
    DbError::QueryError(format!("{what} '{name}' does not exist on '{table}'"))
}

/// The table as it looks once `op` is applied
fn reshape(current: &TableDescriptor, op: &DiffOperation) -> Result<TableDescriptor, DbError> {
    let mut table = current.clone();
    let name = current.name.as_str();

    match op {
        DiffOperation::AddColumn { column, .. } => {
            let column = column.clone().ordinal(table.next_ordinal());
            table.columns.insert(column.name.clone(), column);
        }
        DiffOperation::DropColumn { column, .. } => {
            table
                .columns
                .remove(&column.name)
                .ok_or_else(|| missing("column", name, &column.name))?;
        }
        DiffOperation::AlterColumnType { column, to, .. } => {
            let live = table
                .columns
                .get_mut(column)
                .ok_or_else(|| missing("column", name, column))?;
            live.logical_type = to.clone();
        }
        DiffOperation::AlterColumnNullability {
            column,
            to_nullable,
            ..
        } => {
            let live = table
                .columns
                .get_mut(column)
                .ok_or_else(|| missing("column", name, column))?;
            live.nullable = *to_nullable;
        }
        DiffOperation::AddForeignKey { foreign_key, .. } => {
            table.foreign_keys.insert(foreign_key.clone());
        }
        DiffOperation::DropForeignKey { foreign_key, .. } => {
            let before = table.foreign_keys.len();
            table.foreign_keys.retain(|fk| fk.name != foreign_key.name);
            if table.foreign_keys.len() == before {
                return Err(missing("foreign key", name, &foreign_key.name));
            }
        }
        DiffOperation::AddUniqueConstraint { constraint, .. } => {
            table.unique_constraints.insert(constraint.clone());
        }
        DiffOperation::DropUniqueConstraint { constraint, .. } => {
            if !table.unique_constraints.remove(constraint) {
                return Err(missing("unique constraint", name, &constraint.name));
            }
        }
        other => {
            return Err(DbError::Other(format!(
                "{} does not need a table rebuild",
                other.kind()
            )))
        }
    }
    Ok(table)
}

/// Create-copy-drop-rename `current` into the shape of `target`
fn rebuild(
    executor: &dyn SchemaExecutor,
    current: &TableDescriptor,
    target: &TableDescriptor,
) -> Result<(), DbError> {
    let scratch = format!("{REBUILD_PREFIX}{}", current.name);
    log::debug!("rebuilding table '{}' through '{scratch}'", current.name);

    executor.execute(&format!("DROP TABLE IF EXISTS {}", quote(&scratch)), &[])?;
    executor.execute(&create_table_sql(&scratch, target), &[])?;

    let shared: Vec<String> = target
        .columns_in_order()
        .into_iter()
        .filter(|c| current.has_column(&c.name))
        .map(|c| c.name.clone())
        .collect();
    if !shared.is_empty() {
        let columns = quote_list(&shared);
        executor.execute(
            &format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                quote(&scratch),
                quote(&current.name)
            ),
            &[],
        )?;
    }

    executor.execute(&format!("DROP TABLE {}", quote(&current.name)), &[])?;
    executor.execute(
        &format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&scratch),
            quote(&current.name)
        ),
        &[],
    )?;
    for index in &target.indexes {
        executor.execute(&create_index_sql(&current.name, index), &[])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ForeignKeyDescriptor, ReferentialAction, UniqueConstraint};

    fn characters() -> TableDescriptor {
        TableDescriptor::new("characters")
            .column(
                ColumnDescriptor::new("id", LogicalType::BigInt)
                    .primary_key()
                    .auto_increment(),
            )
            .column(ColumnDescriptor::new("discord_id", LogicalType::BigInt).not_null())
            .column(ColumnDescriptor::new("name", LogicalType::string(100)).not_null())
            .index(IndexDescriptor::new("ix_characters_name", vec!["name".into()], false))
            .unique(UniqueConstraint::new(
                "unique_user_name",
                vec!["discord_id".into(), "name".into()],
            ))
            .foreign_key(
                ForeignKeyDescriptor::new(
                    "characters_discord_id_fkey",
                    vec!["discord_id".into()],
                    "users",
                    vec!["discord_id".into()],
                )
                .on_delete(ReferentialAction::Cascade),
            )
    }

    #[test]
    fn test_create_table_sql() {
        let statements = create_table(&characters());
        assert_eq!(
            statements[0],
            "CREATE TABLE \"characters\" (\"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
             \"discord_id\" BIGINT NOT NULL, \"name\" VARCHAR(100) NOT NULL, \
             CONSTRAINT \"unique_user_name\" UNIQUE (\"discord_id\", \"name\"), \
             CONSTRAINT \"characters_discord_id_fkey\" FOREIGN KEY (\"discord_id\") REFERENCES \"users\" (\"discord_id\") ON DELETE CASCADE)"
        );
        assert_eq!(
            statements[1],
            "CREATE INDEX \"ix_characters_name\" ON \"characters\" (\"name\")"
        );
    }

    #[test]
    fn test_composite_primary_key() {
        let table = TableDescriptor::new("memberships")
            .column(ColumnDescriptor::new("user_id", LogicalType::BigInt).primary_key())
            .column(ColumnDescriptor::new("guild_id", LogicalType::BigInt).primary_key());
        assert_eq!(
            create_table_sql("memberships", &table),
            "CREATE TABLE \"memberships\" (\"user_id\" BIGINT NOT NULL, \"guild_id\" BIGINT NOT NULL, PRIMARY KEY (\"user_id\", \"guild_id\"))"
        );
    }

    #[test]
    fn test_rebuild_operations_are_not_rendered() {
        let add_not_null = DiffOperation::AddColumn {
            table: "characters".into(),
            column: ColumnDescriptor::new("level", LogicalType::Integer).not_null(),
        };
        assert!(render(&add_not_null).is_none());

        let add_nullable = DiffOperation::AddColumn {
            table: "characters".into(),
            column: ColumnDescriptor::new("level", LogicalType::Integer),
        };
        assert_eq!(
            render(&add_nullable).unwrap(),
            vec!["ALTER TABLE \"characters\" ADD COLUMN \"level\" INTEGER"]
        );

        let alter = DiffOperation::AlterColumnType {
            table: "characters".into(),
            column: "name".into(),
            from: LogicalType::string(100),
            to: LogicalType::Text,
        };
        assert!(render(&alter).is_none());
    }

    #[test]
    fn test_type_names_round_trip() {
        use crate::introspect::sqlite::logical_type_from_declared;

        for logical_type in [
            LogicalType::string(32),
            LogicalType::String { length: None },
            LogicalType::Text,
            LogicalType::SmallInt,
            LogicalType::Integer,
            LogicalType::BigInt,
            LogicalType::Bool,
            LogicalType::Float,
            LogicalType::Double,
            LogicalType::Decimal {
                precision: Some(12),
                scale: Some(2),
            },
            LogicalType::Timestamp,
            LogicalType::TimestampTz,
            LogicalType::Date,
            LogicalType::Json,
            LogicalType::JsonBinary,
            LogicalType::Uuid,
            LogicalType::Binary,
            LogicalType::custom("geometry"),
        ] {
            assert_eq!(logical_type_from_declared(&type_name(&logical_type)), logical_type);
        }
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_rebuild_keeps_rows_and_indexes() {
        use crate::introspect::SchemaIntrospector;
        use crate::sqlite::SqliteExecutor;

        let exec = SqliteExecutor::open_in_memory().unwrap();
        exec.execute(
            "CREATE TABLE users (discord_id BIGINT NOT NULL PRIMARY KEY)",
            &[],
        )
        .unwrap();
        for sql in create_table(&characters()) {
            exec.execute(&sql, &[]).unwrap();
        }
        exec.execute("INSERT INTO users (discord_id) VALUES (7)", &[]).unwrap();
        exec.execute(
            "INSERT INTO characters (discord_id, name) VALUES (7, 'Aria')",
            &[],
        )
        .unwrap();

        apply(
            &exec,
            &DiffOperation::AlterColumnType {
                table: "characters".into(),
                column: "name".into(),
                from: LogicalType::string(100),
                to: LogicalType::Text,
            },
        )
        .unwrap();

        let snapshot = SqliteIntrospector.inspect(&exec).unwrap();
        let table = snapshot.table("characters").unwrap();
        assert_eq!(table.columns["name"].logical_type, LogicalType::Text);
        assert!(table.columns["id"].auto_increment);
        assert_eq!(table.indexes.len(), 1);
        assert_eq!(table.unique_constraints.len(), 1);
        assert_eq!(table.foreign_keys.len(), 1);

        let row = exec
            .query_one("SELECT name FROM characters WHERE discord_id = 7", &[])
            .unwrap();
        assert_eq!(row.get_string(0).unwrap(), "Aria");
        assert!(!snapshot.contains("__driftguard_rebuild_characters"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_drop_missing_foreign_key_fails() {
        use crate::sqlite::SqliteExecutor;

        let exec = SqliteExecutor::open_in_memory().unwrap();
        exec.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();
        let op = DiffOperation::DropForeignKey {
            table: "t".into(),
            foreign_key: ForeignKeyDescriptor::new("t_x_fkey", vec!["id".into()], "u", vec!["id".into()]),
        };
        assert!(apply(&exec, &op).is_err());
    }
}
