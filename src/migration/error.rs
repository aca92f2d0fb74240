//! Sync error taxonomy

use crate::executor::DbError;
use crate::safety::RiskTier;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// An operation held back by the destructive-change gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedOperation {
    pub operation: String,
    pub tier: RiskTier,
    pub reason: String,
}

impl fmt::Display for BlockedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.operation, self.reason)
    }
}

/// Result of running one compensating operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationOutcome {
    /// Operation that was being undone
    pub operation: String,
    /// `None` when the compensation succeeded
    pub error: Option<String>,
}

impl CompensationOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for CompensationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "undo {}: ok", self.operation),
            Some(e) => write!(f, "undo {}: FAILED ({e})", self.operation),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sync errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// The live schema could not be read completely
    #[error("Schema introspection failed: {0}")]
    Introspection(String),

    /// Two declared entities map to the same table
    #[error("Table '{table}' is declared by both '{first}' and '{second}'")]
    DuplicateTable {
        table: String,
        first: String,
        second: String,
    },

    /// The declared models are internally inconsistent
    #[error("Invalid model configuration: {0}")]
    Config(String),

    /// The computed operations cannot be ordered into a valid plan
    #[error("Planning failed: {}", .conflicts.join("; "))]
    Planning { conflicts: Vec<String> },

    /// Another process holds the sync lock
    #[error(
        "Timed out after {waited:?} waiting for the schema sync lock; another process may be syncing this database"
    )]
    LockTimeout { waited: Duration },

    /// The plan contains destructive operations and was not confirmed
    #[error("Destructive operations require confirmation: {}", join(.blocked))]
    ConfirmationRequired { blocked: Vec<BlockedOperation> },

    /// An operation failed while applying the plan
    #[error(
        "Operation '{operation}' failed: {cause}. Committed before failure: [{}]. Compensation: [{}]",
        .committed.join("; "),
        join(.compensations)
    )]
    Execution {
        operation: String,
        cause: String,
        committed: Vec<String>,
        compensations: Vec<CompensationOutcome>,
    },

    /// The version ledger does not have the expected shape or content
    #[error("Version ledger is corrupt: {0}")]
    LedgerCorruption(String),

    /// The plan was applied before yet the schema has drifted back
    #[error(
        "Plan {checksum} was already applied; the live schema has drifted since and needs an operator"
    )]
    AlreadyApplied { checksum: String },

    /// The run was cancelled between operations and its work undone
    #[error("Sync cancelled. Committed before cancellation: [{}]. Compensation: [{}]", .committed.join("; "), join(.compensations))]
    Cancelled {
        committed: Vec<String>,
        compensations: Vec<CompensationOutcome>,
    },

    /// Database error outside plan execution
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl SyncError {
    /// Whether the caller may retry the same sync unchanged
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::LockTimeout { .. })
    }

    /// Short label used in logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Introspection(_) => "introspection",
            SyncError::DuplicateTable { .. } => "duplicate_table",
            SyncError::Config(_) => "config",
            SyncError::Planning { .. } => "planning",
            SyncError::LockTimeout { .. } => "lock_timeout",
            SyncError::ConfirmationRequired { .. } => "confirmation_required",
            SyncError::Execution { .. } => "execution",
            SyncError::LedgerCorruption(_) => "ledger_corruption",
            SyncError::AlreadyApplied { .. } => "already_applied",
            SyncError::Cancelled { .. } => "cancelled",
            SyncError::Database(_) => "database",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lock_timeout_is_retryable() {
        assert!(SyncError::LockTimeout {
            waited: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!SyncError::Config("x".into()).is_retryable());
        assert!(!SyncError::Database(DbError::Other("x".into())).is_retryable());
    }

    #[test]
    fn test_confirmation_required_lists_each_operation() {
        let err = SyncError::ConfirmationRequired {
            blocked: vec![
                BlockedOperation {
                    operation: "drop column characters.legacy_gold".into(),
                    tier: RiskTier::Destructive,
                    reason: "column data is lost".into(),
                },
                BlockedOperation {
                    operation: "drop table old_items".into(),
                    tier: RiskTier::Destructive,
                    reason: "table data is lost".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("legacy_gold"));
        assert!(text.contains("old_items"));
        assert_eq!(err.kind(), "confirmation_required");
    }

    #[test]
    fn test_execution_error_reports_compensation() {
        let err = SyncError::Execution {
            operation: "add column users.age".into(),
            cause: "boom".into(),
            committed: vec!["create table a".into()],
            compensations: vec![CompensationOutcome {
                operation: "create table a".into(),
                error: None,
            }],
        };
        let text = err.to_string();
        assert!(text.contains("create table a"));
        assert!(text.contains("undo create table a: ok"));
    }
}
