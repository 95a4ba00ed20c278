//! Run ledger and job harness
//!
//! Every pipeline execution is tracked by a `parser_runs` row; every unit of
//! work within a run by a `parser_run_steps` row. The harness in [`job`]
//! drives the state machine:
//!
//! `Queued -> Collecting -> Running -> {Success | EndedWithErrors |
//! ApiThrottled | CriticalError | InvalidImplementation}`
//!
//! Runs are an append-only audit log; the pipeline never deletes them.

pub mod job;
pub mod ledger;
pub mod models;
pub mod notify;
#[cfg(test)]
pub(crate) mod testing;

pub use job::{execute, execute_pending, Job, JobError};
pub use ledger::{Ledger, PendingRun, RunLedger};
pub use models::{JobKind, ParserRun, RunStatus, StepPayload, StepStatus};
pub use notify::{LogNotifier, Notifier, RunSummary};
