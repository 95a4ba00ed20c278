//! Catalog / Marvel reconciliation
//!
//! Five merge jobs link catalog rows to their Marvel mirror counterparts by
//! exact name matching and copy derived fields across. The batch runs as a
//! fan-out of five runs created up front: creator and character merge run
//! concurrently, then event, then title, then issue. Title merge needs the
//! series links and issue merge needs title merge's output.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

use crate::marvel::MarvelEntityKind;
use crate::runs::{self, JobKind, Notifier, PendingRun, RunLedger};

pub mod job;
pub mod store;

pub use job::MergeJob;
pub use store::MergeStore;

/// Outcome of examining one catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Row was already linked; fields re-derived.
    Already,
    /// Ignore flag set, row fast-skipped.
    Ignore,
    /// Exactly one match, linked.
    Success,
    /// No match; ignore flag set until an operator resets it.
    NotFound,
    /// Several matches; candidates persisted for manual disambiguation.
    Duplicates,
    /// Operator-forced link.
    Manual,
}

impl MergeOutcome {
    /// NotFound and Duplicates end their step in Error; the run continues.
    pub fn is_error(&self) -> bool {
        matches!(self, MergeOutcome::NotFound | MergeOutcome::Duplicates)
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MergeOutcome::Already => "already",
            MergeOutcome::Ignore => "ignore",
            MergeOutcome::Success => "success",
            MergeOutcome::NotFound => "not_found",
            MergeOutcome::Duplicates => "duplicates",
            MergeOutcome::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// The catalog side of each merge job kind matches against this Marvel kind.
pub fn marvel_counterpart(kind: JobKind) -> Option<MarvelEntityKind> {
    match kind {
        JobKind::TitleMerge => Some(MarvelEntityKind::Series),
        JobKind::IssueMerge => Some(MarvelEntityKind::Comic),
        JobKind::CharacterMerge => Some(MarvelEntityKind::Character),
        JobKind::EventMerge => Some(MarvelEntityKind::Event),
        JobKind::CreatorMerge => Some(MarvelEntityKind::Creator),
        _ => None,
    }
}

/// Five merge runs created up front in `Queued` state. The holder sequences
/// their execution; nothing happens until [`MergeBatch::execute`].
#[derive(Debug, Clone, Copy)]
pub struct MergeBatch {
    pub creator: PendingRun,
    pub character: PendingRun,
    pub event: PendingRun,
    pub title: PendingRun,
    pub issue: PendingRun,
}

impl MergeBatch {
    pub async fn schedule(pool: &PgPool) -> Result<Self, sqlx::Error> {
        Ok(Self {
            creator: RunLedger::create_pending(pool, JobKind::CreatorMerge).await?,
            character: RunLedger::create_pending(pool, JobKind::CharacterMerge).await?,
            event: RunLedger::create_pending(pool, JobKind::EventMerge).await?,
            title: RunLedger::create_pending(pool, JobKind::TitleMerge).await?,
            issue: RunLedger::create_pending(pool, JobKind::IssueMerge).await?,
        })
    }

    /// Execute the batch in dependency order. Returns true when every run
    /// ended in `Success`.
    pub async fn execute(self, pool: PgPool, notifier: &dyn Notifier) -> bool {
        info!("Executing reconciliation batch");

        let (creator_ok, character_ok) = tokio::join!(
            run_variant(pool.clone(), self.creator, notifier),
            run_variant(pool.clone(), self.character, notifier),
        );
        let event_ok = run_variant(pool.clone(), self.event, notifier).await;
        let title_ok = run_variant(pool.clone(), self.title, notifier).await;
        let issue_ok = run_variant(pool, self.issue, notifier).await;

        creator_ok && character_ok && event_ok && title_ok && issue_ok
    }
}

async fn run_variant(pool: PgPool, pending: PendingRun, notifier: &dyn Notifier) -> bool {
    let store = MergeStore::new(pool.clone());
    let Some(mut job) = MergeJob::for_kind(pending.kind, store) else {
        tracing::error!(kind = %pending.kind, "Pending run is not a merge kind");
        return false;
    };
    runs::execute_pending(pool, pending, notifier, &mut job).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_error_levels() {
        assert!(MergeOutcome::NotFound.is_error());
        assert!(MergeOutcome::Duplicates.is_error());
        assert!(!MergeOutcome::Success.is_error());
        assert!(!MergeOutcome::Already.is_error());
        assert!(!MergeOutcome::Ignore.is_error());
        assert!(!MergeOutcome::Manual.is_error());
    }

    #[test]
    fn test_counterpart_mapping() {
        assert_eq!(
            marvel_counterpart(JobKind::TitleMerge),
            Some(MarvelEntityKind::Series)
        );
        assert_eq!(
            marvel_counterpart(JobKind::IssueMerge),
            Some(MarvelEntityKind::Comic)
        );
        assert_eq!(marvel_counterpart(JobKind::CloudFiles), None);
    }

    #[test]
    fn test_outcome_serde() {
        let json = serde_json::to_string(&MergeOutcome::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
