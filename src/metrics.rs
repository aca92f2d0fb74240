//! Observability hooks for sync runs.
//!
//! With the `metrics` feature, counters and histograms are registered on the
//! global OpenTelemetry meter and exported through Prometheus. With the
//! `tracing` feature, [`tracing_helpers`] builds the spans wrapped around each
//! statement, transaction and sync run.

#[cfg(feature = "metrics")]
pub use self::otel::{SyncMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use opentelemetry_prometheus::PrometheusExporter;
    use std::time::Duration;

    pub static METRICS: Lazy<SyncMetrics> = Lazy::new(SyncMetrics::init);

    pub struct SyncMetrics {
        /// `None` if a Prometheus exporter could not be built; instruments still record.
        pub exporter: Option<PrometheusExporter>,
        pub sync_runs_total: Counter<u64>,
        pub operations_applied_total: Counter<u64>,
        pub statements_total: Counter<u64>,
        pub statement_errors_total: Counter<u64>,
        pub statement_duration: Histogram<f64>,
        pub sync_duration: Histogram<f64>,
        pub lock_wait_duration: Histogram<f64>,
    }

    impl SyncMetrics {
        pub fn init() -> Self {
            let exporter = match opentelemetry_prometheus::exporter().build() {
                Ok(exporter) => Some(exporter),
                Err(e) => {
                    log::warn!("failed to build prometheus exporter: {e}");
                    None
                }
            };
            let meter = global::meter("driftguard");

            let sync_runs_total = meter
                .u64_counter("driftguard_sync_runs_total")
                .with_description("Sync runs by outcome")
                .build();

            let operations_applied_total = meter
                .u64_counter("driftguard_operations_applied_total")
                .with_description("Schema operations applied")
                .build();

            let statements_total = meter
                .u64_counter("driftguard_statements_total")
                .with_description("Statements executed against the target database")
                .build();

            let statement_errors_total = meter
                .u64_counter("driftguard_statement_errors_total")
                .with_description("Statements that returned an error")
                .build();

            let statement_duration = meter
                .f64_histogram("driftguard_statement_duration_seconds")
                .with_description("Duration of executed statements")
                .build();

            let sync_duration = meter
                .f64_histogram("driftguard_sync_duration_seconds")
                .with_description("Duration of sync runs")
                .build();

            let lock_wait_duration = meter
                .f64_histogram("driftguard_lock_wait_seconds")
                .with_description("Time spent waiting for the sync lock")
                .build();

            Self {
                exporter,
                sync_runs_total,
                operations_applied_total,
                statements_total,
                statement_errors_total,
                statement_duration,
                sync_duration,
                lock_wait_duration,
            }
        }

        pub fn record_statement(&self, elapsed: Duration) {
            self.statements_total.add(1, &[]);
            self.statement_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_statement_error(&self) {
            self.statement_errors_total.add(1, &[]);
        }

        pub fn record_sync(&self, outcome: &'static str, applied: usize, elapsed: Duration) {
            self.sync_runs_total
                .add(1, &[KeyValue::new("outcome", outcome)]);
            self.operations_applied_total.add(applied as u64, &[]);
            self.sync_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn observe_lock_wait(&self, elapsed: Duration) {
            self.lock_wait_duration.record(elapsed.as_secs_f64(), &[]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Statements are truncated so DDL with long column lists stays readable
    const MAX_STATEMENT_IN_SPAN: usize = 200;

    fn truncate(sql: &str) -> &str {
        if sql.len() <= MAX_STATEMENT_IN_SPAN {
            return sql;
        }
        let mut end = MAX_STATEMENT_IN_SPAN;
        while !sql.is_char_boundary(end) {
            end -= 1;
        }
        &sql[..end]
    }

    pub fn execute_statement_span(sql: &str) -> Span {
        info_span!("driftguard.statement", db.statement = truncate(sql))
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("driftguard.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("driftguard.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("driftguard.transaction.rollback")
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("driftguard.connect")
    }

    pub fn acquire_lock_span() -> Span {
        info_span!("driftguard.lock.acquire")
    }

    pub fn sync_span(dialect: &str, dry_run: bool) -> Span {
        info_span!("driftguard.sync", db.system = dialect, dry_run = dry_run)
    }

}
