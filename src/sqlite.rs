//! SQLite executor over `rusqlite`.
//!
//! One executor wraps one connection. Transactions are opened with
//! `BEGIN IMMEDIATE` so the write lock is taken up front rather than on the
//! first DDL statement, and every connection carries a busy timeout so
//! concurrent writers wait instead of failing with `SQLITE_BUSY`.

use crate::executor::{observe_statement, DbError, Dialect, SchemaExecutor, SqlRow, SqlValue};
use rusqlite::config::DbConfig;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::borrow::Cow;
use std::path::Path;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Default busy timeout applied to every connection
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Timestamp(ts) => ToSqlOutput::Owned(Value::Text(ts.to_rfc3339())),
        })
    }
}

/// Implementation of `SchemaExecutor` for a `rusqlite::Connection`
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Wrap an existing connection, applying the default busy timeout
    ///
    /// Foreign key enforcement is switched off for this connection: table
    /// rebuilds drop and recreate tables that other tables reference, and the
    /// pragma cannot be changed once a transaction is open.
    ///
    /// Double-quoted string literals are disabled, so a quoted identifier
    /// naming a missing column is an error instead of a string constant.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the busy timeout or pragma cannot be set.
    pub fn new(conn: Connection) -> Result<Self, DbError> {
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "OFF")?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        Ok(Self { conn })
    }

    /// Open (creating if needed) a database file
    ///
    /// File databases are switched to WAL so readers in the other
    /// application are not blocked while a sync holds the write lock.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the file cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::new(conn)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Override the busy timeout
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the pragma fails.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), DbError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consume the executor and return the underlying connection
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

/// Rewrite `$N` placeholders to SQLite's `?N`
///
/// rusqlite treats `$N` as a named parameter, which binds by first
/// appearance rather than by number. Quoted literals are left alone.
fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    out.push(c);
                } else if c == '$' && chars.peek().is_some_and(char::is_ascii_digit) {
                    out.push('?');
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

fn convert_value(value: ValueRef<'_>) -> Result<SqlValue, DbError> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Text(f.to_string()),
        ValueRef::Text(bytes) => SqlValue::Text(
            std::str::from_utf8(bytes)
                .map_err(|e| DbError::ParseError(format!("invalid UTF-8 in text column: {e}")))?
                .to_string(),
        ),
        ValueRef::Blob(_) => {
            return Err(DbError::ParseError(
                "blob values are not supported in catalog reads".to_string(),
            ))
        }
    })
}

impl SqliteExecutor {
    fn run_execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let sql = if params.is_empty() {
            Cow::Borrowed(sql)
        } else {
            Cow::Owned(rewrite_placeholders(sql))
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn run_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError> {
        let sql = if params.is_empty() {
            Cow::Borrowed(sql)
        } else {
            Cow::Owned(rewrite_placeholders(sql))
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(convert_value(row.get_ref(idx)?)?);
            }
            out.push(SqlRow::new(values));
        }
        Ok(out)
    }
}

impl SchemaExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(sql).entered();
        log::debug!("{sql}");

        let start = Instant::now();
        observe_statement(start, self.run_execute(sql, params))
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(sql).entered();
        log::debug!("{sql}");

        let start = Instant::now();
        observe_statement(start, self.run_query(sql, params))
    }

    fn begin_statement(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }
}
