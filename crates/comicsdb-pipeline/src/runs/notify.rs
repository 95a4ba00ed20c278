//! Run lifecycle notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::models::{JobKind, ParserRun};

/// Condensed view of a finished run, handed to notifiers.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub job_kind: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub items_count: Option<i32>,
    pub processed: i32,
    pub error: String,
}

impl RunSummary {
    pub fn from_run(run: &ParserRun) -> Self {
        Self {
            run_id: run.id,
            job_kind: run.job_kind.clone(),
            status: run.status.clone(),
            started_at: run.started_at,
            ended_at: run.ended_at,
            items_count: run.items_count,
            processed: run.processed,
            error: run.error.clone(),
        }
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.ended_at
            .map(|ended| (ended - self.started_at).num_seconds())
    }
}

/// Sink for run lifecycle events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn run_started(&self, kind: JobKind, params: &[(String, String)]);
    async fn run_finished(&self, summary: &RunSummary);
}

/// Notifier that reports through the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn run_started(&self, kind: JobKind, params: &[(String, String)]) {
        info!(kind = %kind, ?params, "{} started", kind.display_name());
    }

    async fn run_finished(&self, summary: &RunSummary) {
        info!(
            run_id = %summary.run_id,
            kind = %summary.job_kind,
            status = %summary.status,
            items = ?summary.items_count,
            processed = summary.processed,
            duration_secs = ?summary.duration_secs(),
            error = %summary.error,
            "Run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_requires_end_timestamp() {
        let started = Utc::now();
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            job_kind: "CLOUD_FILES".to_string(),
            status: "RUNNING".to_string(),
            started_at: started,
            ended_at: None,
            items_count: Some(10),
            processed: 3,
            error: String::new(),
        };
        assert_eq!(summary.duration_secs(), None);

        let finished = RunSummary {
            ended_at: Some(started + chrono::Duration::seconds(42)),
            ..summary
        };
        assert_eq!(finished.duration_secs(), Some(42));
    }
}
