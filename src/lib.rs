//! # driftguard
//!
//! Keeps a live relational schema in lockstep with the models two or more
//! independently deployed applications declare against it.
//!
//! A sync run reads the live catalog, builds the declared schema from a
//! [`ModelRegistry`], diffs the two, classifies each change as safe or
//! destructive, orders the changes into a checksummed plan and applies it
//! under a database-wide lock, recording every run in a version ledger.
//!
//! ```rust,no_run
//! use driftguard::{connect, sync, ModelRegistry, SyncOptions};
//!
//! let registry = ModelRegistry::from_json_file("models.json")?;
//! let executor = connect("postgresql://app:secret@db:5432/app")?;
//! let report = sync(&executor, &registry, &SyncOptions::new(false));
//! if let Some(err) = &report.error {
//!     eprintln!("{err}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod connection;
pub mod ddl;
pub mod diff;
pub mod executor;
pub mod extract;
pub mod introspect;
pub mod metrics;
pub mod migration;
pub mod operation;
pub mod planner;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod registry;
pub mod safety;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod transaction;

pub use config::DriftguardConfig;
pub use connection::{connect, ConnectionError};
pub use diff::{diff, ColumnRename};
pub use executor::{DbError, Dialect, SchemaExecutor, SqlRow, SqlValue};
pub use migration::{sync, CancelFlag, SyncError, SyncOptions, SyncReport, VersionLedger};
pub use operation::DiffOperation;
pub use planner::{plan, MigrationPlan};
pub use registry::{DeclaredEntity, EntityDef, FieldDef, ModelRegistry};
pub use safety::{classify, RiskTier};
pub use schema::{LogicalType, SchemaSnapshot, TableDescriptor};

#[cfg(feature = "postgres")]
pub use postgres::MayPostgresExecutor;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteExecutor;
