//! DDL rendering and application per dialect.
//!
//! `PostgreSQL` statements are built with `sea-query`. SQLite statements are
//! hand-built; operations `ALTER TABLE` cannot express there are applied by
//! rebuilding the table (see [`sqlite`]).

pub mod postgres;
pub mod sqlite;

use crate::executor::{DbError, Dialect, SchemaExecutor};
use crate::operation::DiffOperation;

/// Apply one operation through `executor`
///
/// # Errors
///
/// Returns the first `DbError` raised by any statement of the operation.
pub fn apply(executor: &dyn SchemaExecutor, op: &DiffOperation) -> Result<(), DbError> {
    match executor.dialect() {
        Dialect::Postgres => {
            for sql in postgres::render(op) {
                executor.execute(&sql, &[])?;
            }
            Ok(())
        }
        Dialect::Sqlite => sqlite::apply(executor, op),
    }
}

/// Double-quote an identifier
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn quote_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|i| quote(i))
        .collect::<Vec<_>>()
        .join(", ")
}
