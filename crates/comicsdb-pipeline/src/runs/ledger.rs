//! Persistent run ledger
//!
//! Owns all writes to `parser_runs`, `parser_run_params` and
//! `parser_run_steps`. Only the job that created a run mutates it; steps are
//! append-only once their terminal status is set.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::models::{JobKind, ParserRun, RunStatus, StepPayload, StepStatus};

/// Write surface of a run ledger.
///
/// Jobs and the harness only see this trait; [`RunLedger`] is the Postgres
/// implementation, tests drive the harness against an in-memory one.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn run_id(&self) -> Uuid;

    fn kind(&self) -> JobKind;

    /// Persist the run's invocation arguments as ordered (name, value) rows.
    async fn record_params(&self, params: &[(String, String)]) -> Result<(), sqlx::Error>;

    async fn set_items_count(&self, count: usize) -> Result<(), sqlx::Error>;

    /// Move the run to a non-terminal status.
    async fn set_status(&self, status: RunStatus) -> Result<(), sqlx::Error>;

    /// Seal the run with a terminal status.
    ///
    /// The end timestamp is set exactly once; a second seal attempt leaves
    /// the first outcome untouched.
    async fn seal(
        &self,
        status: RunStatus,
        error: &str,
        error_detail: &str,
    ) -> Result<(), sqlx::Error>;

    /// Open a step record in `Running` state.
    async fn begin_step(&self, payload: &StepPayload) -> Result<Uuid, sqlx::Error>;

    /// Close a step with `Success`, storing the final payload.
    async fn step_success(&self, step_id: Uuid, payload: &StepPayload) -> Result<(), sqlx::Error>;

    /// Close a step with `Error`, storing the error and final payload.
    async fn step_error(
        &self,
        step_id: Uuid,
        error: &str,
        error_detail: &str,
        payload: &StepPayload,
    ) -> Result<(), sqlx::Error>;

    /// Reload the run row, for summaries and notifications.
    async fn load(&self) -> Result<ParserRun, sqlx::Error>;
}

/// Handle for a run created ahead of execution (status `Queued`).
///
/// The merge fan-out creates all its runs up front and executes them in
/// dependency order; the scheduler holds these handles in between.
#[derive(Debug, Clone, Copy)]
pub struct PendingRun {
    pub id: Uuid,
    pub kind: JobKind,
}

/// Ledger bound to one run row.
#[derive(Clone)]
pub struct RunLedger {
    pool: PgPool,
    run_id: Uuid,
    kind: JobKind,
}

impl RunLedger {
    /// Create a run in `Collecting` state and bind a ledger to it.
    pub async fn create(
        pool: PgPool,
        kind: JobKind,
        task_id: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let run_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO parser_runs (job_kind, status, task_id)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(kind.code())
        .bind(RunStatus::Collecting.code())
        .bind(task_id)
        .fetch_one(&pool)
        .await?;

        debug!(run_id = %run_id, kind = %kind, "Created parser run");

        Ok(Self { pool, run_id, kind })
    }

    /// Create a deferred run in `Queued` state without executing it.
    pub async fn create_pending(pool: &PgPool, kind: JobKind) -> Result<PendingRun, sqlx::Error> {
        let run_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO parser_runs (job_kind, status)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(kind.code())
        .bind(RunStatus::Queued.code())
        .fetch_one(pool)
        .await?;

        Ok(PendingRun { id: run_id, kind })
    }

    /// Bind a ledger to a pending run and move it into `Collecting`.
    pub async fn resume(pool: PgPool, pending: PendingRun) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE parser_runs
            SET status = $2, started_at = now()
            WHERE id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(pending.id)
        .bind(RunStatus::Collecting.code())
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            run_id: pending.id,
            kind: pending.kind,
        })
    }

    async fn inc_processed(&self) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE parser_runs SET processed = processed + 1 WHERE id = $1")
            .bind(self.run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        error: &str,
        error_detail: &str,
        payload: &StepPayload,
    ) -> Result<(), sqlx::Error> {
        let payload_json =
            serde_json::to_value(payload).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            UPDATE parser_run_steps
            SET status = $2, error = $3, error_detail = $4, payload = $5, ended_at = now()
            WHERE id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(step_id)
        .bind(status.code())
        .bind(error)
        .bind(error_detail)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;

        // Page requests and other bookkeeping steps do not advance the
        // run's item progress.
        if payload.counts_as_item() {
            self.inc_processed().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for RunLedger {
    fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn record_params(&self, params: &[(String, String)]) -> Result<(), sqlx::Error> {
        for (position, (name, value)) in params.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO parser_run_params (run_id, position, name, value)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(self.run_id)
            .bind(position as i32)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn set_items_count(&self, count: usize) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE parser_runs SET items_count = $2 WHERE id = $1")
            .bind(self.run_id)
            .bind(count as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(&self, status: RunStatus) -> Result<(), sqlx::Error> {
        debug_assert!(!status.is_terminal(), "terminal status must go through seal()");
        sqlx::query("UPDATE parser_runs SET status = $2 WHERE id = $1 AND ended_at IS NULL")
            .bind(self.run_id)
            .bind(status.code())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, error, error_detail))]
    async fn seal(
        &self,
        status: RunStatus,
        error: &str,
        error_detail: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE parser_runs
            SET status = $2, error = $3, error_detail = $4, ended_at = now()
            WHERE id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(self.run_id)
        .bind(status.code())
        .bind(error)
        .bind(error_detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin_step(&self, payload: &StepPayload) -> Result<Uuid, sqlx::Error> {
        let payload_json =
            serde_json::to_value(payload).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let step_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO parser_run_steps (run_id, status, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(self.run_id)
        .bind(StepStatus::Running.code())
        .bind(payload_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(step_id)
    }

    async fn step_success(
        &self,
        step_id: Uuid,
        payload: &StepPayload,
    ) -> Result<(), sqlx::Error> {
        self.finish_step(step_id, StepStatus::Success, "", "", payload)
            .await
    }

    async fn step_error(
        &self,
        step_id: Uuid,
        error: &str,
        error_detail: &str,
        payload: &StepPayload,
    ) -> Result<(), sqlx::Error> {
        self.finish_step(step_id, StepStatus::Error, error, error_detail, payload)
            .await
    }

    async fn load(&self) -> Result<ParserRun, sqlx::Error> {
        sqlx::query_as::<_, ParserRun>(
            r#"
            SELECT id, job_kind, status, started_at, ended_at, items_count,
                   processed, error, error_detail, task_id
            FROM parser_runs
            WHERE id = $1
            "#,
        )
        .bind(self.run_id)
        .fetch_one(&self.pool)
        .await
    }
}
