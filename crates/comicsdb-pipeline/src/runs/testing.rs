//! In-memory ledger used to drive the harness and the jobs in tests.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::ledger::Ledger;
use super::models::{JobKind, ParserRun, RunStatus, StepPayload, StepStatus};

pub(crate) struct StepRow {
    pub id: Uuid,
    pub status: StepStatus,
    pub error: String,
    pub error_detail: String,
    pub payload: StepPayload,
}

#[derive(Default)]
pub(crate) struct LedgerState {
    pub status: Option<RunStatus>,
    pub items_count: Option<i32>,
    pub processed: i32,
    pub params: Vec<(String, String)>,
    pub error: String,
    pub error_detail: String,
    pub ended_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRow>,
}

pub(crate) struct MemoryLedger {
    run_id: Uuid,
    kind: JobKind,
    started_at: DateTime<Utc>,
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new(kind: JobKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            started_at: Utc::now(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    fn finish(
        &self,
        step_id: Uuid,
        status: StepStatus,
        error: &str,
        error_detail: &str,
        payload: &StepPayload,
    ) {
        let mut state = self.state();
        if let Some(step) = state.steps.iter_mut().find(|s| s.id == step_id) {
            step.status = status;
            step.error = error.to_string();
            step.error_detail = error_detail.to_string();
            step.payload = payload.clone();
        }
        if payload.counts_as_item() {
            state.processed += 1;
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn record_params(&self, params: &[(String, String)]) -> Result<(), sqlx::Error> {
        self.state().params.extend(params.iter().cloned());
        Ok(())
    }

    async fn set_items_count(&self, count: usize) -> Result<(), sqlx::Error> {
        self.state().items_count = Some(count as i32);
        Ok(())
    }

    async fn set_status(&self, status: RunStatus) -> Result<(), sqlx::Error> {
        let mut state = self.state();
        if state.ended_at.is_none() {
            state.status = Some(status);
        }
        Ok(())
    }

    async fn seal(
        &self,
        status: RunStatus,
        error: &str,
        error_detail: &str,
    ) -> Result<(), sqlx::Error> {
        let mut state = self.state();
        if state.ended_at.is_none() {
            state.status = Some(status);
            state.error = error.to_string();
            state.error_detail = error_detail.to_string();
            state.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn begin_step(&self, payload: &StepPayload) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        self.state().steps.push(StepRow {
            id,
            status: StepStatus::Running,
            error: String::new(),
            error_detail: String::new(),
            payload: payload.clone(),
        });
        Ok(id)
    }

    async fn step_success(&self, step_id: Uuid, payload: &StepPayload) -> Result<(), sqlx::Error> {
        self.finish(step_id, StepStatus::Success, "", "", payload);
        Ok(())
    }

    async fn step_error(
        &self,
        step_id: Uuid,
        error: &str,
        error_detail: &str,
        payload: &StepPayload,
    ) -> Result<(), sqlx::Error> {
        self.finish(step_id, StepStatus::Error, error, error_detail, payload);
        Ok(())
    }

    async fn load(&self) -> Result<ParserRun, sqlx::Error> {
        let state = self.state();
        Ok(ParserRun {
            id: self.run_id,
            job_kind: self.kind.code().to_string(),
            status: state
                .status
                .map(|s| s.code().to_string())
                .unwrap_or_default(),
            started_at: self.started_at,
            ended_at: state.ended_at,
            items_count: state.items_count,
            processed: state.processed,
            error: state.error.clone(),
            error_detail: state.error_detail.clone(),
            task_id: None,
        })
    }
}
