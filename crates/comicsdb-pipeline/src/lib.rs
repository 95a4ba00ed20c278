//! ComicsDB ingestion pipeline
//!
//! Batch jobs that crawl an object-storage bucket and the Marvel API,
//! reconcile the results against the relational catalog, and record a
//! structured, resumable audit trail of every step.
//!
//! # Architecture
//!
//! - **runs**: run ledger state machine, per-item step records, job harness
//! - **storage**: S3-compatible bucket wrapper (listing + download)
//! - **cloud**: file-key matcher, archive cover extraction, cloud ingest job
//! - **catalog**: catalog hierarchy rows and get-or-create store
//! - **marvel**: paginated API client, local entity mirror, sync job
//! - **merge**: the five reconciliation jobs and their fan-out sequencing
//! - **config**: environment-based pipeline configuration

pub mod catalog;
pub mod cloud;
pub mod config;
pub mod marvel;
pub mod merge;
pub mod runs;
pub mod storage;

pub use cloud::CloudFilesJob;
pub use config::PipelineConfig;
pub use marvel::MarvelSyncJob;
pub use runs::{Job, JobError, JobKind, Ledger, RunLedger, RunStatus};
pub use storage::CloudStorage;

/// Embedded database migrations, applied at startup by the binary.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
