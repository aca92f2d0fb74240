//! Sync coordinator: one entry point running the whole pipeline.
//!
//! ```text
//! lock -> ledger -> introspect -> extract -> renames -> diff -> classify
//!      -> plan (chained to the last applied checksum) -> repeat check
//!      -> dry run / confirmation gate
//!      -> execute -> unlock
//! ```
//!
//! Everything after lock acquisition runs on the caller's executor, so the
//! lock, the catalog reads and the DDL share one session.

use crate::diff::{apply_renames, diff, ColumnRename};
use crate::ddl::quote;
use crate::executor::{DbError, Dialect, SchemaExecutor};
use crate::extract::extract;
use crate::introspect::{introspector_for, postgres::DEFAULT_SCHEMA};
use crate::migration::checksum::chain_checksum;
use crate::migration::error::BlockedOperation;
use crate::migration::executor::{execute, CancelFlag};
use crate::migration::ledger::VersionLedger;
use crate::migration::lock::{SyncLockGuard, DEFAULT_LOCK_TIMEOUT};
use crate::migration::record::MigrationStatus;
use crate::migration::report::SyncReport;
use crate::migration::SyncError;
use crate::planner::{plan, MigrationPlan};
use crate::registry::ModelRegistry;
use crate::safety::{classify_all, RiskTier};
use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

type Confirmer = Box<dyn Fn(&MigrationPlan) -> bool + Send + Sync>;

/// Options for one sync run
///
/// `strict_mode` has no default and must be chosen by the caller.
pub struct SyncOptions {
    /// Drop live tables no declared model maps to
    pub strict_mode: bool,
    /// Compute and return the plan without touching the schema
    pub dry_run: bool,
    /// Apply destructive plans without asking
    pub auto_confirm_destructive: bool,
    pub lock_timeout: Duration,
    /// Explicit column renames; renames are never inferred
    pub renames: Vec<ColumnRename>,
    /// Written to the ledger; `$HOSTNAME:pid` when unset
    pub host_id: Option<String>,
    /// `PostgreSQL` schema to inspect
    pub schema: String,
    pub cancel: CancelFlag,
    confirmer: Option<Confirmer>,
}

impl SyncOptions {
    #[must_use]
    pub fn new(strict_mode: bool) -> Self {
        Self {
            strict_mode,
            dry_run: false,
            auto_confirm_destructive: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            renames: Vec::new(),
            host_id: None,
            schema: DEFAULT_SCHEMA.to_string(),
            cancel: CancelFlag::new(),
            confirmer: None,
        }
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn auto_confirm_destructive(mut self, confirm: bool) -> Self {
        self.auto_confirm_destructive = confirm;
        self
    }

    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn rename(mut self, rename: ColumnRename) -> Self {
        self.renames.push(rename);
        self
    }

    #[must_use]
    pub fn host_id(mut self, host: impl Into<String>) -> Self {
        self.host_id = Some(host.into());
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    #[must_use]
    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ask `confirm` before applying a destructive plan
    ///
    /// Not consulted when `auto_confirm_destructive` is set.
    #[must_use]
    pub fn confirm_with(mut self, confirm: impl Fn(&MigrationPlan) -> bool + Send + Sync + 'static) -> Self {
        self.confirmer = Some(Box::new(confirm));
        self
    }

    fn confirmed(&self, plan: &MigrationPlan) -> bool {
        self.auto_confirm_destructive || self.confirmer.as_ref().is_some_and(|confirm| confirm(plan))
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("strict_mode", &self.strict_mode)
            .field("dry_run", &self.dry_run)
            .field("auto_confirm_destructive", &self.auto_confirm_destructive)
            .field("lock_timeout", &self.lock_timeout)
            .field("renames", &self.renames)
            .field("host_id", &self.host_id)
            .field("schema", &self.schema)
            .field("confirmer", &self.confirmer.is_some())
            .finish()
    }
}

/// Bring the live schema in line with `registry`
///
/// Never panics and never returns early: the report carries the plan (when
/// one was computed) and the error that stopped the run.
pub fn sync(executor: &dyn SchemaExecutor, registry: &ModelRegistry, options: &SyncOptions) -> SyncReport {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::sync_span(&executor.dialect().to_string(), options.dry_run).entered();

    let start = Instant::now();
    let mut report = SyncReport {
        dry_run: options.dry_run,
        ..SyncReport::default()
    };

    if let Err(e) = run(executor, registry, options, &mut report) {
        match &e {
            SyncError::ConfirmationRequired { .. } => log::warn!("sync blocked: {e}"),
            _ => log::error!("sync failed: {e}"),
        }
        report.error = Some(e);
    }

    let elapsed = start.elapsed();
    #[cfg(feature = "metrics")]
    METRICS.record_sync(report.outcome(), report.operations_applied.len(), elapsed);
    log::info!("{report} in {elapsed:?}");

    report
}

fn run(
    executor: &dyn SchemaExecutor,
    registry: &ModelRegistry,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    if options.cancel.is_cancelled() {
        return Err(SyncError::Cancelled {
            committed: Vec::new(),
            compensations: Vec::new(),
        });
    }

    let _lock = SyncLockGuard::acquire(executor, options.lock_timeout)?;
    use_schema(executor, &options.schema)?;

    let ledger = VersionLedger::new(executor);
    ledger.bootstrap()?;
    ledger.validate()?;

    let current = introspector_for(executor.dialect(), &options.schema).inspect(executor)?;
    let target = extract(registry)?;

    let (renamed, mut operations) = apply_renames(&current, &target, &options.renames)?;
    operations.extend(diff(&renamed, &target, options.strict_mode, &registry.retired_tables));

    if !options.strict_mode {
        for table in renamed.table_names() {
            if !target.contains(table) && !registry.retired_tables.contains(table) {
                report
                    .operations_skipped
                    .push(format!("keep undeclared table {table}"));
            }
        }
    }

    let applied: Vec<String> = ledger
        .records()?
        .into_iter()
        .filter(|r| r.status == MigrationStatus::Applied)
        .map(|r| r.checksum)
        .collect();
    let (grandparent, parent) = match applied.as_slice() {
        [.., grandparent, parent] => (Some(grandparent.as_str()), Some(parent.as_str())),
        [parent] => (None, Some(parent.as_str())),
        [] => (None, None),
    };

    let mut plan = plan(classify_all(operations), &current)?;
    plan.chain_to(parent);
    report.plan_checksum = Some(plan.checksum.clone());
    report.plan = Some(plan.clone());

    if plan.is_empty() {
        log::info!("schema matches the declared models");
        return Ok(());
    }
    // the last applied plan computed again: the schema drifted back after it
    let repeated = parent.filter(|p| chain_checksum(grandparent, &plan.content_checksum) == *p);
    let duplicate = ledger.has(&plan.checksum)?;
    if let Some(checksum) = repeated
        .map(str::to_string)
        .or_else(|| duplicate.then(|| plan.checksum.clone()))
    {
        report.operations_skipped.extend(plan.descriptions());
        return Err(SyncError::AlreadyApplied { checksum });
    }

    if options.dry_run {
        log::info!("dry run, {} operations planned", plan.len());
        report.operations_skipped.extend(plan.descriptions());
        return Ok(());
    }

    if plan.risk == RiskTier::Destructive {
        if !options.confirmed(&plan) {
            let blocked: Vec<BlockedOperation> = plan
                .destructive_operations()
                .map(|step| BlockedOperation {
                    operation: step.describe(),
                    tier: step.tier,
                    reason: step.reason.clone().unwrap_or_default(),
                })
                .collect();
            report.destructive_operations_blocked = blocked.clone();
            report.operations_skipped.extend(plan.descriptions());
            return Err(SyncError::ConfirmationRequired { blocked });
        }
        for step in plan.destructive_operations() {
            log::warn!(
                "applying destructive operation '{}': {}",
                step.describe(),
                step.reason.as_deref().unwrap_or("destructive")
            );
        }
    }

    let host = options.host_id.clone().unwrap_or_else(default_host_id);
    match execute(&plan, executor, &host, &options.cancel) {
        Ok(result) => {
            log::info!("applied plan {} ({} operations)", plan.checksum, result.applied.len());
            report.operations_applied = result.applied;
            report.ledger_record = Some(result.record);
            Ok(())
        }
        Err(e) => {
            report.operations_skipped.extend(plan.descriptions());
            Err(e)
        }
    }
}

/// Point unqualified DDL and ledger lookups at the inspected schema
///
/// `PostgreSQL` only; `public` stays on the path for extension types. The
/// setting lasts for the rest of the session.
fn use_schema(executor: &dyn SchemaExecutor, schema: &str) -> Result<(), DbError> {
    if executor.dialect() != Dialect::Postgres {
        return Ok(());
    }
    let path = if schema == DEFAULT_SCHEMA {
        quote(schema)
    } else {
        format!("{}, {}", quote(schema), quote(DEFAULT_SCHEMA))
    };
    executor.execute(&format!("SET search_path TO {path}"), &[])?;
    Ok(())
}

/// `$HOSTNAME:pid`, or `unknown:pid` when `HOSTNAME` is unset
#[must_use]
pub fn default_host_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    format!("{host}:{}", std::process::id())
}
