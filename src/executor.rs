//! `SchemaExecutor` - the database seam every other module talks through.
//!
//! Introspection, DDL execution, ledger reads/writes and locking all go
//! through this trait, so the sync pipeline works with any backend that can
//! read its catalog and run DDL. Rows come back as backend-neutral
//! [`SqlRow`]s so catalog queries can be written once per dialect without
//! tying callers to a driver's row type.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// SQL dialect spoken by an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL
    Postgres,
    /// SQLite
    Sqlite,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgresql"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Executor error type
#[derive(Debug)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    #[cfg(feature = "postgres")]
    PostgresError(may_postgres::Error),
    /// SQLite error from `rusqlite`
    #[cfg(feature = "sqlite")]
    SqliteError(rusqlite::Error),
    /// Query execution error
    QueryError(String),
    /// Row parsing/conversion error
    ParseError(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "postgres")]
            DbError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            #[cfg(feature = "sqlite")]
            DbError::SqliteError(e) => write!(f, "SQLite error: {e}"),
            DbError::QueryError(s) => write!(f, "Query error: {s}"),
            DbError::ParseError(s) => write!(f, "Parse error: {s}"),
            DbError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "postgres")]
            DbError::PostgresError(e) => Some(e),
            #[cfg(feature = "sqlite")]
            DbError::SqliteError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<may_postgres::Error> for DbError {
    fn from(err: may_postgres::Error) -> Self {
        DbError::PostgresError(err)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::SqliteError(err)
    }
}

/// A bound parameter or a fetched cell
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

/// One fetched row
///
/// Catalog queries select a fixed column list, so cells are addressed by
/// position. Accessors are lenient about representation (SQLite hands back
/// booleans as integers and timestamps as text).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    values: Vec<SqlValue>,
}

impl SqlRow {
    /// Create a row from its cells
    #[must_use]
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Number of cells
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw cell access
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the index is out of range.
    pub fn value(&self, idx: usize) -> Result<&SqlValue, DbError> {
        self.values.get(idx).ok_or_else(|| {
            DbError::ParseError(format!(
                "column index {idx} out of range (row has {} columns)",
                self.values.len()
            ))
        })
    }

    /// Read a non-null text cell
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the cell is null or not text-like.
    pub fn get_string(&self, idx: usize) -> Result<String, DbError> {
        self.get_opt_string(idx)?
            .ok_or_else(|| DbError::ParseError(format!("column {idx} is unexpectedly NULL")))
    }

    /// Read a nullable text cell
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the cell holds a non-text value.
    pub fn get_opt_string(&self, idx: usize) -> Result<Option<String>, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            SqlValue::Int(i) => Ok(Some(i.to_string())),
            SqlValue::Bool(b) => Ok(Some(b.to_string())),
            SqlValue::Timestamp(ts) => Ok(Some(ts.to_rfc3339())),
        }
    }

    /// Read a non-null integer cell
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the cell is null or not an integer.
    pub fn get_i64(&self, idx: usize) -> Result<i64, DbError> {
        self.get_opt_i64(idx)?
            .ok_or_else(|| DbError::ParseError(format!("column {idx} is unexpectedly NULL")))
    }

    /// Read a nullable integer cell
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the cell cannot be read as an integer.
    pub fn get_opt_i64(&self, idx: usize) -> Result<Option<i64>, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(i) => Ok(Some(*i)),
            SqlValue::Bool(b) => Ok(Some(i64::from(*b))),
            SqlValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|e| DbError::ParseError(format!("column {idx}: '{s}' is not an integer: {e}"))),
            SqlValue::Timestamp(_) => Err(DbError::ParseError(format!(
                "column {idx}: expected integer, found timestamp"
            ))),
        }
    }

    /// Read a boolean cell (`NULL` reads as `false`)
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the cell cannot be read as a boolean.
    pub fn get_bool(&self, idx: usize) -> Result<bool, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(false),
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(i) => Ok(*i != 0),
            SqlValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "t" | "true" | "yes" | "1" => Ok(true),
                "f" | "false" | "no" | "0" => Ok(false),
                other => Err(DbError::ParseError(format!(
                    "column {idx}: '{other}' is not a boolean"
                ))),
            },
            SqlValue::Timestamp(_) => Err(DbError::ParseError(format!(
                "column {idx}: expected boolean, found timestamp"
            ))),
        }
    }

    /// Read a timestamp cell
    ///
    /// Text cells are accepted in RFC 3339 and the common `PostgreSQL`
    /// text-output formats.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the cell is null or unparseable.
    pub fn get_timestamp(&self, idx: usize) -> Result<DateTime<Utc>, DbError> {
        match self.value(idx)? {
            SqlValue::Timestamp(ts) => Ok(*ts),
            SqlValue::Text(s) => parse_timestamp(s).ok_or_else(|| {
                DbError::ParseError(format!("Failed to parse timestamp '{s}': unrecognized format"))
            }),
            other => Err(DbError::ParseError(format!(
                "column {idx}: expected timestamp, found {other:?}"
            ))),
        }
    }
}

/// Parse a timestamp in any of the formats the supported backends emit
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Record duration and outcome of a statement started at `start`
#[allow(unused_variables)]
pub(crate) fn observe_statement<T>(start: Instant, result: Result<T, DbError>) -> Result<T, DbError> {
    #[cfg(feature = "metrics")]
    {
        if result.is_err() {
            METRICS.record_statement_error();
        }
        METRICS.record_statement(start.elapsed());
    }
    result
}

/// Trait for executing schema-level database operations
///
/// Implementations hold exactly one session: transactions are plain
/// `BEGIN`/`COMMIT` statements and session-scoped locks stay with the
/// executor, so a sync run must use one executor from lock acquisition to
/// release.
///
/// Placeholders are written `$1`, `$2`, ... for every dialect.
pub trait SchemaExecutor {
    /// Dialect used to render DDL and catalog queries
    fn dialect(&self) -> Dialect;

    /// Execute a single statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails or a cell cannot be converted.
    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError>;

    /// Execute a query expected to return exactly one row
    ///
    /// # Errors
    ///
    /// Returns `DbError::QueryError` if zero or several rows come back.
    fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<SqlRow, DbError> {
        let mut rows = self.query_all(sql, params)?;
        if rows.len() != 1 {
            return Err(DbError::QueryError(format!(
                "expected exactly one row, got {}",
                rows.len()
            )));
        }
        Ok(rows.remove(0))
    }

    /// Whether DDL can be rolled back inside a transaction
    ///
    /// When `false`, the plan executor applies operations one by one and
    /// compensates on failure instead of rolling back.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    /// Statement that opens a transaction on this backend
    fn begin_statement(&self) -> &'static str {
        "BEGIN"
    }
}

impl<T: SchemaExecutor + ?Sized> SchemaExecutor for Box<T> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        (**self).execute(sql, params)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError> {
        (**self).query_all(sql, params)
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<SqlRow, DbError> {
        (**self).query_one(sql, params)
    }

    fn supports_transactional_ddl(&self) -> bool {
        (**self).supports_transactional_ddl()
    }

    fn begin_statement(&self) -> &'static str {
        (**self).begin_statement()
    }
}
