//! Plan execution.
//!
//! Backends with transactional DDL run the whole plan and its ledger entry
//! in one transaction. Other backends apply operations one at a time and, on
//! failure, run the precomputed compensations of the operations already
//! applied, newest first. Compensations restore structure, not data: a
//! dropped column comes back empty.

use crate::ddl;
use crate::executor::{DbError, SchemaExecutor};
use crate::migration::error::CompensationOutcome;
use crate::migration::ledger::VersionLedger;
use crate::migration::record::{MigrationRecord, MigrationStatus};
use crate::migration::SyncError;
use crate::planner::{MigrationPlan, PlannedOperation};
use crate::transaction::Transaction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation request
///
/// Clones share one flag. A sync checks it between operations only, so a
/// statement that has started always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Successful execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Descriptions of the applied operations, in order
    pub applied: Vec<String>,
    /// The `applied` ledger entry
    pub record: MigrationRecord,
}

/// Apply `plan` and record the run in the ledger
///
/// Every call that reaches the database leaves one ledger entry: `applied`
/// on success, `rolled_back` when all work was undone, `failed` when a
/// compensation also failed.
///
/// # Errors
///
/// - `SyncError::Execution` if an operation fails
/// - `SyncError::Cancelled` if `cancel` was set between operations
/// - `SyncError::Database` if the transaction cannot be opened or committed
pub fn execute(
    plan: &MigrationPlan,
    executor: &dyn SchemaExecutor,
    host: &str,
    cancel: &CancelFlag,
) -> Result<ExecutionResult, SyncError> {
    if executor.supports_transactional_ddl() {
        execute_in_transaction(plan, executor, host, cancel)
    } else {
        execute_with_compensation(plan, executor, host, cancel)
    }
}

fn execute_in_transaction(
    plan: &MigrationPlan,
    executor: &dyn SchemaExecutor,
    host: &str,
    cancel: &CancelFlag,
) -> Result<ExecutionResult, SyncError> {
    let tx = Transaction::begin(executor).map_err(DbError::from)?;
    let mut applied = Vec::with_capacity(plan.len());

    for step in &plan.operations {
        if cancel.is_cancelled() {
            log::warn!("sync cancelled after {} of {} operations, rolling back", applied.len(), plan.len());
            rollback(tx);
            record_outcome(executor, plan, host, MigrationStatus::RolledBack);
            return Err(SyncError::Cancelled {
                committed: Vec::new(),
                compensations: Vec::new(),
            });
        }

        let description = step.describe();
        log::info!("applying: {description}");
        let outcome = ddl::apply(&tx, &step.operation);
        if let Err(e) = outcome {
            log::warn!("'{description}' failed, rolling back: {e}");
            rollback(tx);
            record_outcome(executor, plan, host, MigrationStatus::RolledBack);
            return Err(SyncError::Execution {
                operation: description,
                cause: e.to_string(),
                committed: Vec::new(),
                compensations: Vec::new(),
            });
        }
        applied.push(description);
    }

    let entry = MigrationRecord::new(&plan.checksum, plan.label(), host, MigrationStatus::Applied);
    let recorded = VersionLedger::new(&tx).record(&entry);
    let record = match recorded {
        Ok(record) => record,
        Err(e) => {
            log::warn!("could not record plan {}, rolling back: {e}", plan.checksum);
            rollback(tx);
            record_outcome(executor, plan, host, MigrationStatus::RolledBack);
            return Err(SyncError::Execution {
                operation: "record ledger entry".to_string(),
                cause: e.to_string(),
                committed: Vec::new(),
                compensations: Vec::new(),
            });
        }
    };
    tx.commit().map_err(DbError::from)?;

    Ok(ExecutionResult { applied, record })
}

fn execute_with_compensation(
    plan: &MigrationPlan,
    executor: &dyn SchemaExecutor,
    host: &str,
    cancel: &CancelFlag,
) -> Result<ExecutionResult, SyncError> {
    let mut done: Vec<&PlannedOperation> = Vec::with_capacity(plan.len());

    for step in &plan.operations {
        if cancel.is_cancelled() {
            log::warn!("sync cancelled after {} of {} operations, compensating", done.len(), plan.len());
            let compensations = compensate(executor, &done);
            record_outcome(executor, plan, host, undo_status(&compensations));
            return Err(SyncError::Cancelled {
                committed: done.iter().map(|s| s.describe()).collect(),
                compensations,
            });
        }

        let description = step.describe();
        log::info!("applying: {description}");
        if let Err(e) = ddl::apply(executor, &step.operation) {
            log::warn!("'{description}' failed, compensating {} operations: {e}", done.len());
            let compensations = compensate(executor, &done);
            record_outcome(executor, plan, host, undo_status(&compensations));
            return Err(SyncError::Execution {
                operation: description,
                cause: e.to_string(),
                committed: done.iter().map(|s| s.describe()).collect(),
                compensations,
            });
        }
        done.push(step);
    }

    let entry = MigrationRecord::new(&plan.checksum, plan.label(), host, MigrationStatus::Applied);
    let record = VersionLedger::new(executor).record(&entry)?;
    Ok(ExecutionResult {
        applied: done.iter().map(|s| s.describe()).collect(),
        record,
    })
}

fn compensate(executor: &dyn SchemaExecutor, done: &[&PlannedOperation]) -> Vec<CompensationOutcome> {
    done.iter()
        .rev()
        .map(|step| {
            let error = ddl::apply(executor, &step.compensation).err().map(|e| {
                log::warn!("compensation '{}' failed: {e}", step.compensation);
                e.to_string()
            });
            CompensationOutcome {
                operation: step.describe(),
                error,
            }
        })
        .collect()
}

fn undo_status(compensations: &[CompensationOutcome]) -> MigrationStatus {
    if compensations.iter().all(CompensationOutcome::succeeded) {
        MigrationStatus::RolledBack
    } else {
        MigrationStatus::Failed
    }
}

fn rollback(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        log::warn!("rollback failed: {e}");
    }
}

// The run has already failed; a ledger write error is logged, not returned
fn record_outcome(executor: &dyn SchemaExecutor, plan: &MigrationPlan, host: &str, status: MigrationStatus) {
    let entry = MigrationRecord::new(&plan.checksum, plan.label(), host, status);
    if let Err(e) = VersionLedger::new(executor).record(&entry) {
        log::warn!("could not record {status} run of plan {}: {e}", plan.checksum);
    }
}
