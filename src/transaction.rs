//! Transaction guard over any [`SchemaExecutor`].
//!
//! Transactions are plain `BEGIN`/`COMMIT`/`ROLLBACK` statements issued on the
//! executor's session. A guard dropped without commit or rollback rolls back,
//! so an early `?` return never leaves a half-applied plan open.

use crate::executor::{DbError, Dialect, SchemaExecutor, SqlRow, SqlValue};
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction error type
#[derive(Debug)]
pub enum TransactionError {
    /// Error from the underlying executor
    Database(DbError),
    /// Transaction already committed or rolled back
    TransactionClosed,
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Database(e) => write!(f, "{e}"),
            TransactionError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<DbError> for TransactionError {
    fn from(err: DbError) -> Self {
        TransactionError::Database(err)
    }
}

impl From<TransactionError> for DbError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Database(e) => e,
            TransactionError::TransactionClosed => DbError::Other("Transaction closed".to_string()),
        }
    }
}

/// An open transaction on a borrowed executor
///
/// Implements [`SchemaExecutor`] so DDL and ledger writes can be issued
/// through it.
pub struct Transaction<'a> {
    executor: &'a dyn SchemaExecutor,
    closed: bool,
}

impl<'a> Transaction<'a> {
    /// Begin a transaction using the executor's begin statement
    ///
    /// # Errors
    ///
    /// Returns `TransactionError` if the transaction cannot be started.
    pub fn begin(executor: &'a dyn SchemaExecutor) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        executor.execute(executor.begin_statement(), &[])?;
        Ok(Self {
            executor,
            closed: false,
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or `COMMIT` fails. A
    /// failed commit leaves the guard open so drop still rolls back.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.executor.execute("COMMIT", &[])?;
        self.closed = true;
        Ok(())
    }

    /// Roll the transaction back
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        self.rollback_in_place()
    }

    fn rollback_in_place(&mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.closed = true;
        self.executor.execute("ROLLBACK", &[])?;
        Ok(())
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.rollback_in_place() {
                log::warn!("rollback on drop failed: {e}");
            }
        }
    }
}

impl SchemaExecutor for Transaction<'_> {
    fn dialect(&self) -> Dialect {
        self.executor.dialect()
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }
        self.executor.execute(sql, params)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }
        self.executor.query_all(sql, params)
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.executor.supports_transactional_ddl()
    }
}
