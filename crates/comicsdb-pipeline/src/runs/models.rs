//! Data models for run tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cloud::matcher::FileKeyInfo;
use crate::marvel::MarvelEntityKind;
use crate::merge::MergeOutcome;

/// Pipeline job kinds
///
/// A closed set; each kind maps to one job implementation and one step
/// payload variant. Text codes are stable and stored in `parser_runs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    CloudFiles,
    MarvelApiSync,
    CreatorMerge,
    CharacterMerge,
    EventMerge,
    TitleMerge,
    IssueMerge,
}

impl JobKind {
    pub fn code(&self) -> &'static str {
        match self {
            JobKind::CloudFiles => "CLOUD_FILES",
            JobKind::MarvelApiSync => "MARVEL_API_SYNC",
            JobKind::CreatorMerge => "CREATOR_MERGE",
            JobKind::CharacterMerge => "CHARACTER_MERGE",
            JobKind::EventMerge => "EVENT_MERGE",
            JobKind::TitleMerge => "TITLE_MERGE",
            JobKind::IssueMerge => "ISSUE_MERGE",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobKind::CloudFiles => "Cloud files parser",
            JobKind::MarvelApiSync => "Marvel API sync",
            JobKind::CreatorMerge => "Creator merge",
            JobKind::CharacterMerge => "Character merge",
            JobKind::EventMerge => "Event merge",
            JobKind::TitleMerge => "Title merge",
            JobKind::IssueMerge => "Issue merge",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOUD_FILES" => Ok(JobKind::CloudFiles),
            "MARVEL_API_SYNC" => Ok(JobKind::MarvelApiSync),
            "CREATOR_MERGE" => Ok(JobKind::CreatorMerge),
            "CHARACTER_MERGE" => Ok(JobKind::CharacterMerge),
            "EVENT_MERGE" => Ok(JobKind::EventMerge),
            "TITLE_MERGE" => Ok(JobKind::TitleMerge),
            "ISSUE_MERGE" => Ok(JobKind::IssueMerge),
            _ => Err(anyhow::anyhow!("Invalid job kind: {}", s)),
        }
    }
}

/// Run status
///
/// Transitions are monotonic; a terminal status is set exactly once, together
/// with the end timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Collecting,
    Running,
    Success,
    EndedWithErrors,
    ApiThrottled,
    CriticalError,
    InvalidImplementation,
}

impl RunStatus {
    pub fn code(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Collecting => "COLLECTING",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::EndedWithErrors => "ENDED_WITH_ERRORS",
            RunStatus::ApiThrottled => "API_THROTTLED",
            RunStatus::CriticalError => "CRITICAL_ERROR",
            RunStatus::InvalidImplementation => "INVALID_IMPLEMENTATION",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            RunStatus::Queued | RunStatus::Collecting | RunStatus::Running
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "COLLECTING" => Ok(RunStatus::Collecting),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCESS" => Ok(RunStatus::Success),
            "ENDED_WITH_ERRORS" => Ok(RunStatus::EndedWithErrors),
            "API_THROTTLED" => Ok(RunStatus::ApiThrottled),
            "CRITICAL_ERROR" => Ok(RunStatus::CriticalError),
            "INVALID_IMPLEMENTATION" => Ok(RunStatus::InvalidImplementation),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Running,
    Success,
    Error,
}

impl StepStatus {
    pub fn code(&self) -> &'static str {
        match self {
            StepStatus::Running => "RUNNING",
            StepStatus::Success => "SUCCESS",
            StepStatus::Error => "ERROR",
        }
    }
}

/// Parser run row (maps to `parser_runs`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ParserRun {
    pub id: Uuid,
    pub job_kind: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub items_count: Option<i32>,
    pub processed: i32,
    pub error: String,
    pub error_detail: String,
    pub task_id: Option<String>,
}

impl ParserRun {

    pub fn run_status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }

    pub fn succeeded(&self) -> bool {
        self.run_status() == Some(RunStatus::Success)
    }
}

/// Per-step payload, one variant per job kind
///
/// Stored as JSONB on `parser_run_steps`; the tag replaces the original's
/// per-kind detail-table subclassing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    /// One bucket key processed by the cloud files job
    CloudFile {
        file_key: String,
        pattern: String,
        #[serde(default)]
        groups: Option<FileKeyInfo>,
        #[serde(default)]
        issue_id: Option<Uuid>,
        #[serde(default)]
        created: bool,
    },
    /// One page request against the Marvel API
    ApiGet {
        entity: MarvelEntityKind,
        offset: u32,
        limit: u32,
        #[serde(default)]
        received: u32,
    },
    /// One Marvel entity persisted by the sync job
    ApiEntity {
        entity: MarvelEntityKind,
        marvel_id: i64,
        action: String,
        raw: serde_json::Value,
    },
    /// One catalog row examined by a merge job
    Merge {
        entity: MarvelEntityKind,
        catalog_id: Uuid,
        #[serde(default)]
        marvel_id: Option<i64>,
        /// Set when the row's step closes.
        #[serde(default)]
        outcome: Option<MergeOutcome>,
    },
}

impl StepPayload {
    /// Whether the step stands for one unit of work against `items_count`.
    /// Page requests are bookkeeping around items, not items themselves.
    pub fn counts_as_item(&self) -> bool {
        !matches!(self, StepPayload::ApiGet { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_round_trip() {
        for kind in [
            JobKind::CloudFiles,
            JobKind::MarvelApiSync,
            JobKind::CreatorMerge,
            JobKind::CharacterMerge,
            JobKind::EventMerge,
            JobKind::TitleMerge,
            JobKind::IssueMerge,
        ] {
            assert_eq!(kind.code().parse::<JobKind>().unwrap(), kind);
        }
        assert!("BASE".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Collecting.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::EndedWithErrors.is_terminal());
        assert!(RunStatus::ApiThrottled.is_terminal());
        assert!(RunStatus::CriticalError.is_terminal());
        assert!(RunStatus::InvalidImplementation.is_terminal());
    }

    #[test]
    fn test_run_status_round_trip() {
        assert_eq!(
            "ENDED_WITH_ERRORS".parse::<RunStatus>().unwrap(),
            RunStatus::EndedWithErrors
        );
        assert!("FINISHED".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_step_payload_serde() {
        let payload = StepPayload::ApiGet {
            entity: MarvelEntityKind::Comic,
            offset: 100,
            limit: 100,
            received: 42,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "api_get");
        let back: StepPayload = serde_json::from_value(json).unwrap();
        match back {
            StepPayload::ApiGet { offset, received, .. } => {
                assert_eq!(offset, 100);
                assert_eq!(received, 42);
            },
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_parser_run_status_accessors() {
        let run = ParserRun {
            id: Uuid::new_v4(),
            job_kind: "CLOUD_FILES".to_string(),
            status: "SUCCESS".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            items_count: Some(10),
            processed: 10,
            error: String::new(),
            error_detail: String::new(),
            task_id: None,
        };

        assert_eq!(run.run_status(), Some(RunStatus::Success));
        assert!(run.succeeded());
    }

    #[test]
    fn test_page_steps_do_not_count_as_items() {
        let page = StepPayload::ApiGet {
            entity: MarvelEntityKind::Comic,
            offset: 0,
            limit: 100,
            received: 0,
        };
        assert!(!page.counts_as_item());

        let entity = StepPayload::ApiEntity {
            entity: MarvelEntityKind::Comic,
            marvel_id: 1,
            action: "synced".to_string(),
            raw: serde_json::json!({"id": 1}),
        };
        assert!(entity.counts_as_item());

        let file = StepPayload::CloudFile {
            file_key: "content/Marvel/x.cbz".to_string(),
            pattern: String::new(),
            groups: None,
            issue_id: None,
            created: false,
        };
        assert!(file.counts_as_item());
    }
}
