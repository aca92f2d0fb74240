//! Sync runtime for driftguard
//!
//! This module runs a planned schema change against a live database:
//! - the database-wide sync lock
//! - the version ledger and its records
//! - plan execution with rollback or compensation
//! - the [`sync`] entry point tying the pipeline together
//!
//! # Example
//!
//! ```rust,no_run
//! use driftguard::connection::connect;
//! use driftguard::migration::{sync, SyncOptions};
//! use driftguard::registry::{EntityDef, FieldDef, ModelRegistry};
//! use driftguard::schema::LogicalType;
//!
//! let registry = ModelRegistry::new().entity(
//!     EntityDef::new("User", "users")
//!         .field(FieldDef::new("id", LogicalType::BigInt).primary_key().auto_increment())
//!         .field(FieldDef::new("email", LogicalType::string(255)).not_null().unique()),
//! );
//!
//! let executor = connect("sqlite://app.db")?;
//! let report = sync(&executor, &registry, &SyncOptions::new(false)).into_result()?;
//! for op in &report.operations_applied {
//!     println!("{op}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checksum;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod lock;
pub mod record;
pub mod report;
pub mod state_table;

pub use coordinator::{default_host_id, sync, SyncOptions};
pub use error::{BlockedOperation, CompensationOutcome, SyncError};
pub use executor::{execute, CancelFlag, ExecutionResult};
pub use ledger::VersionLedger;
pub use lock::{SyncLockGuard, DEFAULT_LOCK_TIMEOUT};
pub use record::{MigrationRecord, MigrationStatus};
pub use report::SyncReport;
