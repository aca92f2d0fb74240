//! `SyncReport` - what one sync run did

use crate::migration::error::BlockedOperation;
use crate::migration::record::MigrationRecord;
use crate::migration::SyncError;
use crate::planner::MigrationPlan;
use std::fmt;

/// Outcome of [`crate::migration::sync`]
///
/// A report is returned for every run, including failed ones; `error` says
/// why the run stopped. The plan is kept whenever one was computed, so a
/// blocked or dry run can be shown to an operator.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Checksum of the computed plan
    pub plan_checksum: Option<String>,
    /// Applied operations, in execution order
    pub operations_applied: Vec<String>,
    /// Operations computed but not applied (dry run, blocked or failed run)
    /// and undeclared tables left in place outside strict mode
    pub operations_skipped: Vec<String>,
    /// Destructive operations held back by the confirmation gate
    pub destructive_operations_blocked: Vec<BlockedOperation>,
    pub error: Option<SyncError>,
    pub plan: Option<MigrationPlan>,
    /// Ledger entry written by a successful run
    pub ledger_record: Option<MigrationRecord>,
    pub dry_run: bool,
}

impl SyncReport {
    /// `true` if the run finished without error
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// `true` if the database already matched the declared models
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.is_success() && self.plan.as_ref().is_some_and(MigrationPlan::is_empty)
    }

    /// `true` if the run stopped at the confirmation gate
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self.error, Some(SyncError::ConfirmationRequired { .. }))
    }

    /// Label used in logs and metrics
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match &self.error {
            Some(e) => e.kind(),
            None if self.dry_run => "dry_run",
            None if self.operations_applied.is_empty() => "no_changes",
            None => "applied",
        }
    }

    /// Turn the report into a `Result`, keeping the report on success
    ///
    /// # Errors
    ///
    /// Returns the run's `SyncError`, if any.
    pub fn into_result(mut self) -> Result<Self, SyncError> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync {}: {} applied, {} skipped, {} blocked",
            self.outcome(),
            self.operations_applied.len(),
            self.operations_skipped.len(),
            self.destructive_operations_blocked.len()
        )?;
        if let Some(checksum) = &self.plan_checksum {
            write!(f, " (plan {})", &checksum[..checksum.len().min(12)])?;
        }
        if let Some(e) = &self.error {
            write!(f, ": {e}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outcome_labels() {
        let mut report = SyncReport::default();
        assert_eq!(report.outcome(), "no_changes");

        report.operations_applied.push("create table users (2 columns)".into());
        assert_eq!(report.outcome(), "applied");
        assert!(report.is_success());

        report.error = Some(SyncError::LockTimeout {
            waited: Duration::from_secs(1),
        });
        assert_eq!(report.outcome(), "lock_timeout");
        assert!(!report.is_success());
        assert!(report.into_result().unwrap_err().is_retryable());
    }

    #[test]
    fn test_display_summarizes() {
        let report = SyncReport {
            plan_checksum: Some("f".repeat(64)),
            operations_skipped: vec!["drop column characters.legacy_gold".into()],
            dry_run: true,
            ..SyncReport::default()
        };
        assert_eq!(
            report.to_string(),
            "sync dry_run: 0 applied, 1 skipped, 0 blocked (plan ffffffffffff)"
        );
    }
}
