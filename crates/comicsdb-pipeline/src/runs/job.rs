//! Job harness
//!
//! Drives the run state machine around a [`Job`] implementation. The harness
//! never propagates an error to the caller: every failure mode lands in the
//! run's terminal status and the caller only sees a success boolean.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{error, info};

use super::ledger::{Ledger, PendingRun, RunLedger};
use super::models::{JobKind, RunStatus};
use super::notify::{Notifier, RunSummary};

/// Errors a job can raise out of its phases.
///
/// `ApiThrottled` and `Critical` map 1:1 to their terminal statuses; anything
/// else that escapes the harness is recorded as `InvalidImplementation`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("API rate limit reached")]
    ApiThrottled,

    #[error("{message}")]
    Critical { message: String, detail: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JobError {
    pub fn critical(message: impl Into<String>, detail: impl Into<String>) -> Self {
        JobError::Critical {
            message: message.into(),
            detail: detail.into(),
        }
    }

    pub fn terminal_status(&self) -> RunStatus {
        match self {
            JobError::ApiThrottled => RunStatus::ApiThrottled,
            JobError::Critical { .. } => RunStatus::CriticalError,
            JobError::Internal(_) => RunStatus::InvalidImplementation,
        }
    }

    fn message(&self) -> String {
        match self {
            JobError::ApiThrottled => "API rate limit reached".to_string(),
            JobError::Critical { message, .. } => message.clone(),
            JobError::Internal(err) => format!("Unhandled error in job harness: {}", err),
        }
    }

    fn detail(&self) -> String {
        match self {
            JobError::ApiThrottled => String::new(),
            JobError::Critical { detail, .. } => detail.clone(),
            JobError::Internal(err) => format!("{:?}", err),
        }
    }

    /// Escalate an unexpected error to `CriticalError`, used for the
    /// prepare and postprocess phases.
    fn escalate(self, phase: &str) -> Self {
        match self {
            JobError::Internal(err) => JobError::Critical {
                message: format!("Error during {}", phase),
                detail: format!("{:?}", err),
            },
            declared => declared,
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Internal(err.into())
    }
}

/// One pipeline job
///
/// Implementations collect their unit-of-work list in `prepare`, iterate it
/// in `process` (isolating per-item failures into step records), and clean up
/// in `postprocess`.
#[async_trait]
pub trait Job: Send {
    fn kind(&self) -> JobKind;

    /// Invocation arguments, persisted on the run for audit.
    fn params(&self) -> Vec<(String, String)>;

    /// Collect work items; returns the expected item count.
    async fn prepare(&mut self, ledger: &dyn Ledger) -> Result<usize, JobError>;

    /// Process all items; returns true when no per-item errors occurred.
    async fn process(&mut self, ledger: &dyn Ledger) -> Result<bool, JobError>;

    /// Cleanup and linking after the batch; runs regardless of per-item
    /// outcome, before the run is sealed.
    async fn postprocess(&mut self, _ledger: &dyn Ledger) -> Result<(), JobError> {
        Ok(())
    }
}

/// Create a run for the job and execute it to completion.
///
/// Returns true when the run ended in `Success`. Never returns an error:
/// failures are recorded on the run.
pub async fn execute(
    pool: PgPool,
    notifier: &dyn Notifier,
    job: &mut dyn Job,
    task_id: Option<&str>,
) -> bool {
    let ledger = match RunLedger::create(pool, job.kind(), task_id).await {
        Ok(ledger) => ledger,
        Err(err) => {
            error!(kind = %job.kind(), error = ?err, "Could not create parser run");
            return false;
        },
    };
    execute_on(&ledger, notifier, job).await
}

/// Execute a job against a run created earlier with
/// [`RunLedger::create_pending`].
pub async fn execute_pending(
    pool: PgPool,
    pending: PendingRun,
    notifier: &dyn Notifier,
    job: &mut dyn Job,
) -> bool {
    let ledger = match RunLedger::resume(pool, pending).await {
        Ok(ledger) => ledger,
        Err(err) => {
            error!(run_id = %pending.id, error = ?err, "Could not resume pending run");
            return false;
        },
    };
    execute_on(&ledger, notifier, job).await
}

async fn execute_on(ledger: &dyn Ledger, notifier: &dyn Notifier, job: &mut dyn Job) -> bool {
    let params = job.params();
    notifier.run_started(job.kind(), &params).await;

    let outcome = drive(job, ledger, &params).await;

    let status = match outcome {
        Ok(status) => {
            if let Err(err) = ledger.seal(status, "", "").await {
                error!(run_id = %ledger.run_id(), error = ?err, "Could not seal run");
            }
            status
        },
        Err(job_err) => {
            let status = job_err.terminal_status();
            if let Err(err) = ledger
                .seal(status, &job_err.message(), &job_err.detail())
                .await
            {
                error!(run_id = %ledger.run_id(), error = ?err, "Could not seal run");
            }
            status
        },
    };

    info!(run_id = %ledger.run_id(), kind = %ledger.kind(), status = %status, "Run finished");

    match ledger.load().await {
        Ok(run) => notifier.run_finished(&RunSummary::from_run(&run)).await,
        Err(err) => error!(run_id = %ledger.run_id(), error = ?err, "Could not load run summary"),
    }

    status == RunStatus::Success
}

async fn drive(
    job: &mut dyn Job,
    ledger: &dyn Ledger,
    params: &[(String, String)],
) -> Result<RunStatus, JobError> {
    // Collecting: gather work items. Unexpected errors here are critical,
    // declared ones keep their own terminal status.
    let items = job.prepare(ledger).await.map_err(|e| e.escalate("prepare"))?;
    ledger.set_items_count(items).await?;
    ledger.record_params(params).await?;

    ledger.set_status(RunStatus::Running).await?;
    let clean = job.process(ledger).await?;

    // Postprocess runs before the run is sealed, whatever the per-item
    // outcome was; its failures are critical.
    job.postprocess(ledger)
        .await
        .map_err(|e| e.escalate("postprocessing"))?;

    Ok(if clean {
        RunStatus::Success
    } else {
        RunStatus::EndedWithErrors
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::models::StepPayload;
    use super::super::notify::LogNotifier;
    use super::super::testing::MemoryLedger;
    use crate::marvel::MarvelEntityKind;

    struct ExplodingPrepare;

    #[async_trait]
    impl Job for ExplodingPrepare {
        fn kind(&self) -> JobKind {
            JobKind::CloudFiles
        }

        fn params(&self) -> Vec<(String, String)> {
            vec![]
        }

        async fn prepare(&mut self, _ledger: &dyn Ledger) -> Result<usize, JobError> {
            Err(JobError::Internal(anyhow::anyhow!("bucket listing blew up")))
        }

        async fn process(&mut self, _ledger: &dyn Ledger) -> Result<bool, JobError> {
            Ok(true)
        }
    }

    /// Two entity steps plus one page step, all successful.
    struct PagedSync;

    #[async_trait]
    impl Job for PagedSync {
        fn kind(&self) -> JobKind {
            JobKind::MarvelApiSync
        }

        fn params(&self) -> Vec<(String, String)> {
            vec![("page_limit".to_string(), "100".to_string())]
        }

        async fn prepare(&mut self, _ledger: &dyn Ledger) -> Result<usize, JobError> {
            Ok(2)
        }

        async fn process(&mut self, ledger: &dyn Ledger) -> Result<bool, JobError> {
            let page = StepPayload::ApiGet {
                entity: MarvelEntityKind::Comic,
                offset: 0,
                limit: 100,
                received: 2,
            };
            let step_id = ledger.begin_step(&page).await?;
            ledger.step_success(step_id, &page).await?;

            for marvel_id in [1, 2] {
                let entity = StepPayload::ApiEntity {
                    entity: MarvelEntityKind::Comic,
                    marvel_id,
                    action: "synced".to_string(),
                    raw: serde_json::json!({"id": marvel_id}),
                };
                let step_id = ledger.begin_step(&entity).await?;
                ledger.step_success(step_id, &entity).await?;
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_prepare_failure_seals_run_as_critical() {
        let ledger = MemoryLedger::new(JobKind::CloudFiles);
        let ok = execute_on(&ledger, &LogNotifier, &mut ExplodingPrepare).await;
        assert!(!ok);

        let state = ledger.state();
        assert_eq!(state.status, Some(RunStatus::CriticalError));
        assert!(state.ended_at.is_some());
        assert!(!state.error.is_empty());
        assert!(state.error_detail.contains("bucket listing blew up"));
    }

    #[tokio::test]
    async fn test_clean_run_seals_success_and_counts_items_only() {
        let ledger = MemoryLedger::new(JobKind::MarvelApiSync);
        let ok = execute_on(&ledger, &LogNotifier, &mut PagedSync).await;
        assert!(ok);

        let state = ledger.state();
        assert_eq!(state.status, Some(RunStatus::Success));
        assert!(state.ended_at.is_some());
        assert_eq!(state.items_count, Some(2));
        assert_eq!(state.processed, 2);
        assert_eq!(state.steps.len(), 3);
        assert_eq!(
            state.params,
            vec![("page_limit".to_string(), "100".to_string())]
        );
    }

    #[test]
    fn test_job_error_terminal_status() {
        assert_eq!(
            JobError::ApiThrottled.terminal_status(),
            RunStatus::ApiThrottled
        );
        assert_eq!(
            JobError::critical("boom", "").terminal_status(),
            RunStatus::CriticalError
        );
        assert_eq!(
            JobError::Internal(anyhow::anyhow!("surprise")).terminal_status(),
            RunStatus::InvalidImplementation
        );
    }

    #[test]
    fn test_escalate_wraps_internal_only() {
        let escalated = JobError::Internal(anyhow::anyhow!("listing failed")).escalate("prepare");
        assert_eq!(escalated.terminal_status(), RunStatus::CriticalError);
        assert!(escalated.message().contains("prepare"));
        assert!(escalated.detail().contains("listing failed"));

        let throttled = JobError::ApiThrottled.escalate("prepare");
        assert_eq!(throttled.terminal_status(), RunStatus::ApiThrottled);
    }

    #[test]
    fn test_critical_error_carries_detail() {
        let err = JobError::critical("Could not list bucket", "connection refused");
        assert_eq!(err.message(), "Could not list bucket");
        assert_eq!(err.detail(), "connection refused");
    }
}
