//! `VersionLedger` - history of sync runs against one database.
//!
//! Each run that executes a plan leaves exactly one row, whatever its
//! outcome. Only `applied` rows count towards [`VersionLedger::has`]; the
//! database enforces that a checksum is recorded as applied at most once.

use crate::executor::{SchemaExecutor, SqlValue};
use crate::migration::record::{MigrationRecord, MigrationStatus};
use crate::migration::state_table::{self, LEDGER_COLUMNS};
use crate::migration::SyncError;
use crate::schema::LEDGER_TABLE;
use std::collections::BTreeSet;

/// Reads and writes the `driftguard_ledger` table
pub struct VersionLedger<'a> {
    executor: &'a dyn SchemaExecutor,
}

impl<'a> VersionLedger<'a> {
    pub fn new(executor: &'a dyn SchemaExecutor) -> Self {
        Self { executor }
    }

    /// Create the ledger if it does not exist yet
    ///
    /// An existing ledger is checked for the expected columns before its
    /// index is touched.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LedgerCorruption` if an existing ledger lacks a
    /// required column, or `SyncError::Database` if a statement fails.
    pub fn bootstrap(&self) -> Result<(), SyncError> {
        state_table::create_ledger_table(self.executor)?;
        self.check_columns()?;
        state_table::create_applied_checksum_index(self.executor)?;
        Ok(())
    }

    fn check_columns(&self) -> Result<(), SyncError> {
        let check = format!("SELECT {} FROM {LEDGER_TABLE} WHERE 1 = 0", LEDGER_COLUMNS.join(", "));
        self.executor.query_all(&check, &[]).map_err(|e| {
            SyncError::LedgerCorruption(format!(
                "{LEDGER_TABLE} does not have the expected columns ({}): {e}",
                LEDGER_COLUMNS.join(", ")
            ))
        })?;
        Ok(())
    }

    /// Check the ledger's shape and content before anything is planned
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LedgerCorruption` if a required column is missing,
    /// a row cannot be read, or a checksum appears as applied more than once.
    pub fn validate(&self) -> Result<(), SyncError> {
        self.check_columns()?;

        let mut applied = BTreeSet::new();
        for record in self.records()? {
            if record.status == MigrationStatus::Applied && !applied.insert(record.checksum.clone()) {
                return Err(SyncError::LedgerCorruption(format!(
                    "checksum {} is recorded as applied more than once",
                    record.checksum
                )));
            }
        }
        Ok(())
    }

    /// Append an entry and return it with its ledger id
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the insert fails, including when an
    /// `applied` entry with the same checksum already exists.
    pub fn record(&self, entry: &MigrationRecord) -> Result<MigrationRecord, SyncError> {
        self.executor.execute(
            &format!(
                "INSERT INTO {LEDGER_TABLE} (checksum, label, applied_at, host, status) \
                 VALUES ($1, $2, $3, $4, $5)"
            ),
            &[
                SqlValue::from(entry.checksum.as_str()),
                SqlValue::from(entry.label.as_str()),
                SqlValue::from(entry.applied_at),
                SqlValue::from(entry.host.as_str()),
                SqlValue::from(entry.status.as_str()),
            ],
        )?;

        let row = self.executor.query_one(
            &format!(
                "SELECT MAX(id) FROM {LEDGER_TABLE} WHERE checksum = $1 AND status = $2"
            ),
            &[
                SqlValue::from(entry.checksum.as_str()),
                SqlValue::from(entry.status.as_str()),
            ],
        )?;
        let id = row.get_opt_i64(0).map_err(|e| SyncError::LedgerCorruption(e.to_string()))?;

        log::debug!(
            "recorded {} run {} in {LEDGER_TABLE}",
            entry.status,
            entry.checksum
        );
        Ok(MigrationRecord {
            id,
            ..entry.clone()
        })
    }

    /// Every entry, oldest first
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LedgerCorruption` if a row cannot be read.
    pub fn records(&self) -> Result<Vec<MigrationRecord>, SyncError> {
        let rows = self.executor.query_all(
            &format!("SELECT {} FROM {LEDGER_TABLE} ORDER BY id", LEDGER_COLUMNS.join(", ")),
            &[],
        )?;
        rows.iter().map(MigrationRecord::from_row).collect()
    }

    /// Most recent `applied` entry
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LedgerCorruption` if the row cannot be read.
    pub fn last_applied(&self) -> Result<Option<MigrationRecord>, SyncError> {
        let rows = self.executor.query_all(
            &format!(
                "SELECT {} FROM {LEDGER_TABLE} WHERE status = $1 ORDER BY id DESC LIMIT 1",
                LEDGER_COLUMNS.join(", ")
            ),
            &[SqlValue::from(MigrationStatus::Applied.as_str())],
        )?;
        rows.first().map(MigrationRecord::from_row).transpose()
    }

    /// Whether a plan with this checksum has been applied
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Database` if the query fails.
    pub fn has(&self, checksum: &str) -> Result<bool, SyncError> {
        let row = self.executor.query_one(
            &format!("SELECT COUNT(*) FROM {LEDGER_TABLE} WHERE checksum = $1 AND status = $2"),
            &[
                SqlValue::from(checksum),
                SqlValue::from(MigrationStatus::Applied.as_str()),
            ],
        )?;
        Ok(row.get_i64(0).map_err(SyncError::Database)? > 0)
    }
}
