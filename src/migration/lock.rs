//! Database-wide sync lock.
//!
//! At most one sync may plan and execute against a database at a time. On
//! `PostgreSQL` the lock is a session-level advisory lock, released by the
//! server if the holder's session dies. SQLite has no advisory locks, so the
//! holder inserts the single row of `driftguard_lock` and deletes it on
//! release. Both are polled every 100ms until acquired or timed out.

use crate::executor::{DbError, Dialect, SchemaExecutor, SqlValue};
use crate::migration::state_table::initialize_lock_table;
use crate::migration::SyncError;
use crate::schema::LOCK_TABLE;
use chrono::Utc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Default time to wait for another sync to finish
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Advisory lock key shared by every driftguard process ("driftgrd")
const ADVISORY_LOCK_KEY: i64 = 0x6472_6966_7467_7264;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock guard that releases the sync lock when dropped
pub struct SyncLockGuard<'a> {
    executor: &'a dyn SchemaExecutor,
    holder: String,
    released: bool,
}

impl<'a> SyncLockGuard<'a> {
    /// Acquire the sync lock, waiting up to `timeout`
    ///
    /// The lock belongs to the executor's session, so the same executor must
    /// be used for everything done under it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LockTimeout` if another process still holds the
    /// lock after `timeout`, or `SyncError::Database` if the lock query fails.
    pub fn acquire(executor: &'a dyn SchemaExecutor, timeout: Duration) -> Result<Self, SyncError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_lock_span().entered();

        let holder = uuid::Uuid::new_v4().to_string();
        if executor.dialect() == Dialect::Sqlite {
            initialize_lock_table(executor)?;
        }

        let start = Instant::now();
        let mut logged_wait = false;
        loop {
            if try_acquire(executor, &holder)? {
                let waited = start.elapsed();
                #[cfg(feature = "metrics")]
                METRICS.observe_lock_wait(waited);
                log::debug!("acquired sync lock after {waited:?}");
                return Ok(Self {
                    executor,
                    holder,
                    released: false,
                });
            }

            let waited = start.elapsed();
            if waited >= timeout {
                #[cfg(feature = "metrics")]
                METRICS.observe_lock_wait(waited);
                if executor.dialect() == Dialect::Sqlite {
                    log::warn!(
                        "sync lock still held after {waited:?}; if no other process is syncing, \
                         clear it with: DELETE FROM {LOCK_TABLE}"
                    );
                }
                return Err(SyncError::LockTimeout { waited });
            }
            if !logged_wait {
                log::info!("another process holds the sync lock, waiting up to {timeout:?}");
                logged_wait = true;
            }
            thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(waited)));
        }
    }

    /// Release the lock now instead of on drop
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the release statement fails.
    pub fn release(mut self) -> Result<(), SyncError> {
        self.released = true;
        release(self.executor, &self.holder).map_err(SyncError::Database)
    }
}

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release(self.executor, &self.holder) {
            log::warn!("failed to release sync lock: {e}");
        }
    }
}

fn try_acquire(executor: &dyn SchemaExecutor, holder: &str) -> Result<bool, DbError> {
    match executor.dialect() {
        Dialect::Postgres => executor
            .query_one("SELECT pg_try_advisory_lock($1)", &[SqlValue::Int(ADVISORY_LOCK_KEY)])?
            .get_bool(0),
        Dialect::Sqlite => {
            let inserted = executor.execute(
                &format!(
                    "INSERT OR IGNORE INTO {LOCK_TABLE} (id, holder, acquired_at) VALUES (1, $1, $2)"
                ),
                &[SqlValue::from(holder), SqlValue::from(Utc::now())],
            )?;
            Ok(inserted == 1)
        }
    }
}

fn release(executor: &dyn SchemaExecutor, holder: &str) -> Result<(), DbError> {
    match executor.dialect() {
        Dialect::Postgres => {
            executor.query_one("SELECT pg_advisory_unlock($1)", &[SqlValue::Int(ADVISORY_LOCK_KEY)])?;
        }
        Dialect::Sqlite => {
            executor.execute(
                &format!("DELETE FROM {LOCK_TABLE} WHERE holder = $1"),
                &[SqlValue::from(holder)],
            )?;
        }
    }
    log::debug!("released sync lock");
    Ok(())
}

/// Check whether any process holds the sync lock
///
/// # Errors
///
/// Returns `DbError` if the query fails.
pub fn is_sync_lock_held(executor: &dyn SchemaExecutor) -> Result<bool, DbError> {
    match executor.dialect() {
        Dialect::Postgres => executor
            .query_one(
                "SELECT COUNT(*) FROM pg_locks WHERE locktype = 'advisory' \
                 AND ((classid::bigint << 32) | objid::bigint) = $1",
                &[SqlValue::Int(ADVISORY_LOCK_KEY)],
            )?
            .get_i64(0)
            .map(|n| n > 0),
        Dialect::Sqlite => {
            initialize_lock_table(executor)?;
            executor
                .query_one(&format!("SELECT COUNT(*) FROM {LOCK_TABLE}"), &[])?
                .get_i64(0)
                .map(|n| n > 0)
        }
    }
}
