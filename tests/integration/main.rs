//! SQLite-backed integration tests for the sync pipeline
//!
//! Every test works on its own temporary database file, so the suite runs
//! in parallel without a database server.

mod common;

mod concurrency;
mod destructive_gate;
mod failures;
mod fk_cycles;
mod renames;
mod round_trip;
