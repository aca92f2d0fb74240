//! `MigrationRecord` - one entry of the `driftguard_ledger` table

use crate::executor::SqlRow;
use crate::migration::checksum::is_valid_checksum;
use crate::migration::SyncError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Outcome stored with each ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Every operation and the record itself committed
    Applied,
    /// The run failed or was cancelled and all of its work was undone
    RolledBack,
    /// The run failed and at least one compensation also failed; the schema
    /// may be partially migrated
    Failed,
}

impl MigrationStatus {
    /// Value stored in the `status` column
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::Applied => "applied",
            MigrationStatus::RolledBack => "rolled_back",
            MigrationStatus::Failed => "failed",
        }
    }

    /// Parse a stored `status` value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(MigrationStatus::Applied),
            "rolled_back" => Some(MigrationStatus::RolledBack),
            "failed" => Some(MigrationStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a row in the `driftguard_ledger` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    /// Ledger position; `None` until the record is written
    pub id: Option<i64>,

    /// Checksum of the plan this run executed
    pub checksum: String,

    /// Short human-readable summary of the plan
    pub label: String,

    /// When the run finished
    pub applied_at: DateTime<Utc>,

    /// Host identifier of the process that ran the plan
    pub host: String,

    pub status: MigrationStatus,
}

/// Width of the ledger's `label` and `host` columns
pub const MAX_TEXT_LEN: usize = 255;

/// Cut `text` to at most `max` bytes on a char boundary
fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

impl MigrationRecord {
    /// Create an unsaved `MigrationRecord` stamped with the current time
    ///
    /// `label` and `host` are cut to [`MAX_TEXT_LEN`] bytes to fit the ledger.
    #[must_use]
    pub fn new(
        checksum: impl Into<String>,
        label: impl Into<String>,
        host: impl Into<String>,
        status: MigrationStatus,
    ) -> Self {
        Self {
            id: None,
            checksum: checksum.into(),
            label: truncate(label.into(), MAX_TEXT_LEN),
            applied_at: Utc::now(),
            host: truncate(host.into(), MAX_TEXT_LEN),
            status,
        }
    }

    /// Create a `MigrationRecord` from a ledger row
    ///
    /// Expected column order: `id`, `checksum`, `label`, `applied_at`, `host`, `status`
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LedgerCorruption` if a column is missing or holds
    /// a value no ledger writer produces.
    pub fn from_row(row: &SqlRow) -> Result<Self, SyncError> {
        let corrupt = |what: &str, e: &dyn fmt::Display| {
            SyncError::LedgerCorruption(format!("unreadable {what}: {e}"))
        };

        let id = row.get_i64(0).map_err(|e| corrupt("id", &e))?;
        let checksum = row.get_string(1).map_err(|e| corrupt("checksum", &e))?;
        if !is_valid_checksum(&checksum) {
            return Err(SyncError::LedgerCorruption(format!(
                "entry {id} has malformed checksum '{checksum}'"
            )));
        }
        let label = row.get_string(2).map_err(|e| corrupt("label", &e))?;
        let applied_at = row.get_timestamp(3).map_err(|e| corrupt("applied_at", &e))?;
        let host = row.get_string(4).map_err(|e| corrupt("host", &e))?;
        let raw_status = row.get_string(5).map_err(|e| corrupt("status", &e))?;
        let status = MigrationStatus::parse(&raw_status).ok_or_else(|| {
            SyncError::LedgerCorruption(format!("entry {id} has unknown status '{raw_status}'"))
        })?;

        Ok(Self {
            id: Some(id),
            checksum,
            label,
            applied_at,
            host,
            status,
        })
    }
}
