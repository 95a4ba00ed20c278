//! Merge job skeleton shared by the five variants
//!
//! The variant only decides which catalog rows load and which Marvel table
//! the search runs against; the per-row branching is identical everywhere.

use async_trait::async_trait;
use tracing::info;

use crate::marvel::MarvelEntityKind;
use crate::runs::{Job, JobError, JobKind, Ledger, StepPayload};

use super::store::{MergeRow, MergeStore};
use super::{marvel_counterpart, MergeOutcome};

struct Examined {
    outcome: MergeOutcome,
    marvel_id: Option<i64>,
    detail: String,
}

pub struct MergeJob {
    kind: JobKind,
    entity: MarvelEntityKind,
    store: MergeStore,
    rows: Vec<MergeRow>,
}

impl MergeJob {
    /// `None` when the kind is not one of the five merge kinds.
    pub fn for_kind(kind: JobKind, store: MergeStore) -> Option<Self> {
        let entity = marvel_counterpart(kind)?;
        Some(Self {
            kind,
            entity,
            store,
            rows: Vec::new(),
        })
    }

    async fn process_row(&self, ledger: &dyn Ledger, row: &MergeRow) -> Result<bool, JobError> {
        let mut payload = StepPayload::Merge {
            entity: self.entity,
            catalog_id: row.id,
            marvel_id: row.marvel_id,
            outcome: None,
        };
        let step_id = ledger.begin_step(&payload).await?;

        let examined = match self.examine(row).await {
            Ok(examined) => examined,
            Err(err) => {
                ledger
                    .step_error(
                        step_id,
                        "Database error while merging row",
                        &err.to_string(),
                        &payload,
                    )
                    .await?;
                return Ok(false);
            },
        };

        if let StepPayload::Merge {
            marvel_id, outcome, ..
        } = &mut payload
        {
            *marvel_id = examined.marvel_id;
            *outcome = Some(examined.outcome);
        }

        if examined.outcome.is_error() {
            let message = match examined.outcome {
                MergeOutcome::NotFound => "No matching Marvel entity found",
                _ => "Multiple matching Marvel entities found",
            };
            ledger
                .step_error(step_id, message, &examined.detail, &payload)
                .await?;
            Ok(false)
        } else {
            ledger.step_success(step_id, &payload).await?;
            Ok(true)
        }
    }

    /// Branching for one row: ignore flag, existing link, then search.
    async fn examine(&self, row: &MergeRow) -> Result<Examined, sqlx::Error> {
        if row.marvel_ignore {
            return Ok(Examined {
                outcome: MergeOutcome::Ignore,
                marvel_id: row.marvel_id,
                detail: String::new(),
            });
        }

        if let Some(marvel_id) = row.marvel_id {
            self.store.apply_link(self.entity, row.id, marvel_id).await?;
            return Ok(Examined {
                outcome: MergeOutcome::Already,
                marvel_id: Some(marvel_id),
                detail: String::new(),
            });
        }

        let matches = self.store.search(self.entity, row).await?;
        match matches.as_slice() {
            [] => {
                self.store.clear_candidates(self.entity, row.id).await?;
                self.store.set_ignore(self.entity, row.id, true).await?;
                Ok(Examined {
                    outcome: MergeOutcome::NotFound,
                    marvel_id: None,
                    detail: String::new(),
                })
            },
            [marvel_id] => {
                self.store.apply_link(self.entity, row.id, *marvel_id).await?;
                self.store.clear_candidates(self.entity, row.id).await?;
                Ok(Examined {
                    outcome: MergeOutcome::Success,
                    marvel_id: Some(*marvel_id),
                    detail: String::new(),
                })
            },
            candidates => {
                self.store
                    .save_candidates(self.entity, row.id, candidates)
                    .await?;
                self.store.set_ignore(self.entity, row.id, true).await?;
                Ok(Examined {
                    outcome: MergeOutcome::Duplicates,
                    marvel_id: None,
                    detail: format!("Candidates: {candidates:?}"),
                })
            },
        }
    }
}

#[async_trait]
impl Job for MergeJob {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![("entity".to_string(), self.entity.code().to_string())]
    }

    async fn prepare(&mut self, _ledger: &dyn Ledger) -> Result<usize, JobError> {
        self.rows = self.store.load_rows(self.entity).await?;
        info!(entity = %self.entity, rows = self.rows.len(), "Collected catalog rows");
        Ok(self.rows.len())
    }

    async fn process(&mut self, ledger: &dyn Ledger) -> Result<bool, JobError> {
        let rows = std::mem::take(&mut self.rows);
        let mut has_errors = false;
        for row in &rows {
            if !self.process_row(ledger, row).await? {
                has_errors = true;
            }
        }
        Ok(!has_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_store() -> MergeStore {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        MergeStore::new(pool)
    }

    #[tokio::test]
    async fn test_for_kind_accepts_merge_kinds_only() {
        assert!(MergeJob::for_kind(JobKind::TitleMerge, lazy_store()).is_some());
        assert!(MergeJob::for_kind(JobKind::CreatorMerge, lazy_store()).is_some());
        assert!(MergeJob::for_kind(JobKind::CloudFiles, lazy_store()).is_none());
        assert!(MergeJob::for_kind(JobKind::MarvelApiSync, lazy_store()).is_none());
    }

    #[tokio::test]
    async fn test_params_name_the_entity() {
        let job = MergeJob::for_kind(JobKind::IssueMerge, lazy_store()).unwrap();
        assert_eq!(job.kind(), JobKind::IssueMerge);
        assert_eq!(
            job.params(),
            vec![("entity".to_string(), "comic".to_string())]
        );
    }
}
