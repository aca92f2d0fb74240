//! Live schema introspection.
//!
//! Reads catalog metadata (never table contents) and builds the
//! [`SchemaSnapshot`] of what the database actually holds. Reserved tables
//! are skipped; every other table is included, whether or not a model
//! declares it. A catalog read that fails anywhere fails the whole
//! introspection so a partial snapshot is never diffed.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresIntrospector;
pub use self::sqlite::SqliteIntrospector;

use crate::executor::{Dialect, SchemaExecutor};
use crate::migration::SyncError;
use crate::schema::SchemaSnapshot;

/// Reads the live schema through an executor
pub trait SchemaIntrospector {
    /// Snapshot every non-reserved table
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Introspection` if any catalog read fails or
    /// returns something that cannot be mapped.
    fn inspect(&self, executor: &dyn SchemaExecutor) -> Result<SchemaSnapshot, SyncError>;
}

/// Introspector for the executor's dialect
///
/// `schema` is the `PostgreSQL` namespace to read; SQLite ignores it.
#[must_use]
pub fn introspector_for(dialect: Dialect, schema: &str) -> Box<dyn SchemaIntrospector> {
    match dialect {
        Dialect::Postgres => Box::new(PostgresIntrospector::new(schema)),
        Dialect::Sqlite => Box::new(SqliteIntrospector),
    }
}

/// Snapshot the live schema using the default `PostgreSQL` schema (`public`)
///
/// # Errors
///
/// Returns `SyncError::Introspection` if any catalog read fails.
pub fn inspect(executor: &dyn SchemaExecutor) -> Result<SchemaSnapshot, SyncError> {
    introspector_for(executor.dialect(), postgres::DEFAULT_SCHEMA).inspect(executor)
}

pub(crate) fn introspection_err(context: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::Introspection(format!("{context}: {err}"))
}
