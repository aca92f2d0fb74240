//! `PostgreSQL` executor over `may_postgres`.

use crate::executor::{observe_statement, DbError, Dialect, SchemaExecutor, SqlRow, SqlValue};
use may_postgres::types::{ToSql, Type};
use may_postgres::{Client, Row};
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

static NULL_TEXT: Option<String> = None;

/// Implementation of `SchemaExecutor` for `may_postgres::Client`
///
/// The client is one session: advisory locks taken through it belong to this
/// executor until released or until the connection closes.
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Consume the executor and return the underlying client
    pub fn into_client(self) -> Client {
        self.client
    }

    /// Check that the session still answers `SELECT 1`
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the health check query fails.
    pub fn check_health(&self) -> Result<bool, DbError> {
        let rows = self.query_all("SELECT 1::bigint", &[])?;
        Ok(rows.len() == 1 && rows[0].get_i64(0)? == 1)
    }
}

/// Borrow each value as a driver parameter
///
/// NULL is bound as text; callers binding NULL into non-text columns cast the
/// placeholder explicitly.
fn bind(params: &[SqlValue]) -> Vec<&dyn ToSql> {
    params
        .iter()
        .map(|p| match p {
            SqlValue::Null => &NULL_TEXT as &dyn ToSql,
            SqlValue::Bool(b) => b as &dyn ToSql,
            SqlValue::Int(i) => i as &dyn ToSql,
            SqlValue::Text(s) => s as &dyn ToSql,
            SqlValue::Timestamp(ts) => ts as &dyn ToSql,
        })
        .collect()
}

fn convert_row(row: &Row) -> Result<SqlRow, DbError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Int)
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Timestamp)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Timestamp(v.and_utc()))
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            row.try_get::<_, Option<String>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Text)
        } else {
            return Err(DbError::ParseError(format!(
                "column '{}' has unsupported type {}; cast it to text in the query",
                column.name(),
                ty.name()
            )));
        };
        values.push(value);
    }
    Ok(SqlRow::new(values))
}

impl SchemaExecutor for MayPostgresExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(sql).entered();
        log::debug!("{sql}");

        let start = Instant::now();
        let bound = bind(params);
        let result = self.client.execute(sql, &bound).map_err(DbError::from);
        observe_statement(start, result)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(sql).entered();
        log::debug!("{sql}");

        let start = Instant::now();
        let bound = bind(params);
        let rows = self.client.query(sql, &bound).map_err(DbError::from);
        observe_statement(start, rows)?.iter().map(convert_row).collect()
    }
}
