//! Ledger and lock table management

use crate::ddl;
use crate::executor::{DbError, Dialect, SchemaExecutor, SqlValue};
use crate::migration::record::MAX_TEXT_LEN;
use crate::operation::DiffOperation;
use crate::schema::{ColumnDescriptor, LogicalType, TableDescriptor, LEDGER_TABLE, LOCK_TABLE};

/// Columns every ledger must carry, in `MigrationRecord::from_row` order
pub const LEDGER_COLUMNS: [&str; 6] = ["id", "checksum", "label", "applied_at", "host", "status"];

const APPLIED_CHECKSUM_INDEX: &str = "driftguard_ledger_applied_checksum";

/// Descriptor of the `driftguard_ledger` table
///
/// The ledger is created through the same DDL path as declared tables, so
/// it gets an identity id on `PostgreSQL` and `AUTOINCREMENT` on SQLite.
#[must_use]
pub fn ledger_table() -> TableDescriptor {
    TableDescriptor::new(LEDGER_TABLE)
        .column(
            ColumnDescriptor::new("id", LogicalType::BigInt)
                .primary_key()
                .auto_increment(),
        )
        .column(ColumnDescriptor::new("checksum", LogicalType::string(64)).not_null())
        .column(ColumnDescriptor::new("label", LogicalType::string(MAX_TEXT_LEN as u32)).not_null())
        .column(ColumnDescriptor::new("applied_at", LogicalType::TimestampTz).not_null())
        .column(ColumnDescriptor::new("host", LogicalType::string(MAX_TEXT_LEN as u32)).not_null())
        .column(ColumnDescriptor::new("status", LogicalType::string(16)).not_null())
}

/// Check whether a table exists in the executor's current schema
///
/// # Errors
///
/// Returns `DbError` if the catalog query fails.
pub fn table_exists(executor: &dyn SchemaExecutor, table: &str) -> Result<bool, DbError> {
    let sql = match executor.dialect() {
        Dialect::Postgres => {
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1"
        }
        Dialect::Sqlite => "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
    };
    let row = executor.query_one(sql, &[SqlValue::from(table)])?;
    Ok(row.get_i64(0)? > 0)
}

/// Create the ledger table if it does not exist
///
/// Returns `true` if the table was created by this call.
///
/// # Errors
///
/// Returns `DbError` if a statement fails.
pub fn create_ledger_table(executor: &dyn SchemaExecutor) -> Result<bool, DbError> {
    if table_exists(executor, LEDGER_TABLE)? {
        return Ok(false);
    }
    log::info!("creating version ledger table {LEDGER_TABLE}");
    ddl::apply(
        executor,
        &DiffOperation::CreateTable {
            table: ledger_table(),
        },
    )?;
    Ok(true)
}

/// Create the partial unique index that keeps a checksum from being
/// recorded as applied twice
///
/// # Errors
///
/// Returns `DbError` if the statement fails.
pub fn create_applied_checksum_index(executor: &dyn SchemaExecutor) -> Result<(), DbError> {
    executor.execute(
        &format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {APPLIED_CHECKSUM_INDEX} \
             ON {LEDGER_TABLE} (checksum) WHERE status = 'applied'"
        ),
        &[],
    )?;
    Ok(())
}

/// Initialize the single-row lock table used on SQLite
///
/// # Errors
///
/// Returns `DbError` if the statement fails.
pub fn initialize_lock_table(executor: &dyn SchemaExecutor) -> Result<(), DbError> {
    executor.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} \
             (id INTEGER PRIMARY KEY, holder TEXT NOT NULL, acquired_at TEXT NOT NULL)"
        ),
        &[],
    )?;
    Ok(())
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::sqlite::SqliteExecutor;

    #[test]
    fn test_initialize_is_idempotent() {
        let exec = SqliteExecutor::open_in_memory().unwrap();
        assert!(!table_exists(&exec, LEDGER_TABLE).unwrap());

        assert!(create_ledger_table(&exec).unwrap());
        assert!(!create_ledger_table(&exec).unwrap());
        create_applied_checksum_index(&exec).unwrap();
        create_applied_checksum_index(&exec).unwrap();
        assert!(table_exists(&exec, LEDGER_TABLE).unwrap());

        initialize_lock_table(&exec).unwrap();
        initialize_lock_table(&exec).unwrap();
        assert!(table_exists(&exec, LOCK_TABLE).unwrap());
    }

    #[test]
    fn test_applied_checksum_is_unique() {
        let exec = SqliteExecutor::open_in_memory().unwrap();
        create_ledger_table(&exec).unwrap();
        create_applied_checksum_index(&exec).unwrap();

        let insert = format!(
            "INSERT INTO {LEDGER_TABLE} (checksum, label, applied_at, host, status) \
             VALUES ($1, 'plan', '2026-01-01T00:00:00Z', 'h', $2)"
        );
        let checksum = SqlValue::from("ab".repeat(32));
        exec.execute(&insert, &[checksum.clone(), "rolled_back".into()]).unwrap();
        exec.execute(&insert, &[checksum.clone(), "applied".into()]).unwrap();
        assert!(exec.execute(&insert, &[checksum, "applied".into()]).is_err());
    }

    #[test]
    fn test_ledger_descriptor_column_order() {
        let table = ledger_table();
        let names: Vec<&str> = table
            .columns_in_order()
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, LEDGER_COLUMNS);
    }
}
