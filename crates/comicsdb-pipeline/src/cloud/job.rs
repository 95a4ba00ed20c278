//! Cloud files ingest job
//!
//! Lists comic archives under a bucket prefix and materializes the catalog
//! hierarchy for each key. One bad key ends its own step record in error and
//! never aborts the batch.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogStore, TouchedRows};
use crate::merge::MergeBatch;
use crate::runs::{Job, JobError, JobKind, Ledger, StepPayload};
use crate::storage::CloudStorage;

use super::archive::{page_content_type, ComicArchive};
use super::matcher::{FileKeyInfo, FileKeyMatcher};

#[derive(Debug, thiserror::Error)]
enum IngestError {
    #[error("Invalid data")]
    InvalidData(String),

    #[error("Database error while processing file")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    fn detail(&self) -> String {
        match self {
            IngestError::InvalidData(detail) => detail.clone(),
            IngestError::Database(err) => err.to_string(),
        }
    }
}

/// Get-or-create results memoized within one run, keyed by parsed names.
#[derive(Default)]
struct RunMemo {
    publishers: HashMap<String, Uuid>,
    universes: HashMap<(String, Uuid), Uuid>,
    title_types: HashMap<String, Uuid>,
    titles: HashMap<(String, Uuid, Uuid, Uuid), Uuid>,
}

pub struct CloudFilesJob {
    storage: CloudStorage,
    catalog: CatalogStore,
    matcher: FileKeyMatcher,
    prefix: String,
    full: bool,
    load_covers: bool,
    merge_after: bool,
    files: Vec<(String, i64)>,
    memo: RunMemo,
    touched: TouchedRows,
    scheduled: Option<MergeBatch>,
}

impl CloudFilesJob {
    pub fn new(
        storage: CloudStorage,
        catalog: CatalogStore,
        prefix: String,
        full: bool,
        load_covers: bool,
        merge_after: bool,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            storage,
            catalog,
            matcher: FileKeyMatcher::new()?,
            prefix,
            full,
            load_covers,
            merge_after,
            files: Vec::new(),
            memo: RunMemo::default(),
            touched: TouchedRows::default(),
            scheduled: None,
        })
    }

    /// The merge batch queued by postprocessing, for the caller to execute
    /// once this run is sealed.
    pub fn take_scheduled_merge(&mut self) -> Option<MergeBatch> {
        self.scheduled.take()
    }

    async fn process_key(
        &mut self,
        ledger: &dyn Ledger,
        key: &str,
        size: i64,
    ) -> Result<bool, JobError> {
        let mut payload = StepPayload::CloudFile {
            file_key: key.to_string(),
            pattern: self.matcher.pattern().to_string(),
            groups: None,
            issue_id: None,
            created: false,
        };
        let step_id = ledger.begin_step(&payload).await?;

        let Some(info) = self.matcher.match_key(key) else {
            ledger
                .step_error(
                    step_id,
                    "File key does not match regular expression",
                    "",
                    &payload,
                )
                .await?;
            return Ok(false);
        };

        if let StepPayload::CloudFile { groups, .. } = &mut payload {
            *groups = Some(info.clone());
        }

        let (issue_id, created) = match self.ingest_file(key, size, &info).await {
            Ok(result) => result,
            Err(err) => {
                ledger
                    .step_error(step_id, &err.to_string(), &err.detail(), &payload)
                    .await?;
                return Ok(false);
            },
        };

        if let StepPayload::CloudFile {
            issue_id: id_slot,
            created: created_slot,
            ..
        } = &mut payload
        {
            *id_slot = Some(issue_id);
            *created_slot = created;
        }

        if self.load_covers {
            if let Err(err) = self.load_cover(issue_id, key).await {
                warn!(key, error = ?err, "Could not get issue cover");
                ledger
                    .step_error(
                        step_id,
                        "Could not get issue cover",
                        &format!("{err:#}"),
                        &payload,
                    )
                    .await?;
                return Ok(false);
            }
        }

        ledger.step_success(step_id, &payload).await?;
        Ok(true)
    }

    /// Walk the Publisher -> Universe -> TitleType -> Title chain and land
    /// on the Issue row for the key.
    async fn ingest_file(
        &mut self,
        key: &str,
        size: i64,
        info: &FileKeyInfo,
    ) -> Result<(Uuid, bool), IngestError> {
        let publisher_id = match self.memo.publishers.get(&info.publisher) {
            Some(id) => *id,
            None => {
                let row = self.catalog.get_or_create_publisher(&info.publisher).await?;
                self.memo.publishers.insert(info.publisher.clone(), row.id);
                row.id
            },
        };
        if self.full {
            self.touched.publishers.insert(publisher_id);
        }

        let universe_key = (info.universe.clone(), publisher_id);
        let universe_id = match self.memo.universes.get(&universe_key) {
            Some(id) => *id,
            None => {
                let row = self
                    .catalog
                    .get_or_create_universe(&info.universe, publisher_id, &info.publisher)
                    .await?;
                self.memo.universes.insert(universe_key, row.id);
                row.id
            },
        };
        if self.full {
            self.touched.universes.insert(universe_id);
        }

        let title_type_id = match self.memo.title_types.get(&info.title_type) {
            Some(id) => *id,
            None => {
                let row = self
                    .catalog
                    .get_or_create_title_type(&info.title_type)
                    .await?;
                self.memo.title_types.insert(info.title_type.clone(), row.id);
                row.id
            },
        };

        let path_key = info.title_path_key().to_string();
        let title_key = (path_key.clone(), publisher_id, universe_id, title_type_id);
        let title_id = match self.memo.titles.get(&title_key) {
            Some(id) => *id,
            None => {
                let row = self
                    .catalog
                    .get_or_create_title(
                        &path_key,
                        publisher_id,
                        universe_id,
                        title_type_id,
                        &[&info.publisher, &info.universe, &info.title_type, &path_key],
                    )
                    .await?;
                self.memo.titles.insert(title_key, row.id);
                row.id
            },
        };
        if self.full {
            self.touched.titles.insert(title_id);
        }

        let publish_date = publish_date_for_year(info.year)?;

        let issue = self
            .catalog
            .get_or_create_issue(
                key,
                &info.issue_name,
                info.number,
                title_id,
                publish_date,
                Some(size),
            )
            .await?;
        if self.full {
            self.touched.issues.insert(issue.id);
        }

        Ok((issue.id, issue.created))
    }

    async fn load_cover(&self, issue_id: Uuid, key: &str) -> anyhow::Result<()> {
        if self.catalog.issue_cover_key(issue_id).await?.is_some() {
            return Ok(());
        }

        let tmp = tempfile::NamedTempFile::new().context("Could not create temporary file")?;
        self.storage.download_to_file(key, tmp.path()).await?;

        let archive = ComicArchive::open(tmp.path(), key)?;
        let page_name = archive
            .page_names()
            .first()
            .context("Archive has no pages")?
            .clone();
        let data = archive.read_page(0)?;

        let extension = page_name
            .rsplit('.')
            .next()
            .unwrap_or("jpg")
            .to_ascii_lowercase();
        let cover_key = format!("issue_cover/{issue_id}.{extension}");
        self.storage
            .upload(
                &cover_key,
                data,
                Some(page_content_type(&page_name).to_string()),
            )
            .await?;
        self.catalog.set_issue_cover(issue_id, &cover_key).await?;
        Ok(())
    }
}

/// Issues carry year precision only; the catalog stores year-01-01.
fn publish_date_for_year(year: i32) -> Result<NaiveDate, IngestError> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| IngestError::InvalidData(format!("Year {} is out of range", year)))
}

#[async_trait]
impl Job for CloudFilesJob {
    fn kind(&self) -> JobKind {
        JobKind::CloudFiles
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![
            ("path_prefix".to_string(), self.prefix.clone()),
            ("full".to_string(), self.full.to_string()),
            ("load_covers".to_string(), self.load_covers.to_string()),
            ("merge_after".to_string(), self.merge_after.to_string()),
        ]
    }

    async fn prepare(&mut self, _ledger: &dyn Ledger) -> Result<usize, JobError> {
        let keys = self
            .storage
            .list_keys(&self.prefix)
            .await
            .context("Could not list bucket keys")?;

        self.files = keys
            .into_iter()
            .filter(|(key, _)| self.matcher.is_comic_file(key))
            .collect();

        info!(prefix = %self.prefix, files = self.files.len(), "Collected comic files");
        Ok(self.files.len())
    }

    async fn process(&mut self, ledger: &dyn Ledger) -> Result<bool, JobError> {
        let files = std::mem::take(&mut self.files);
        let mut has_errors = false;

        for (key, size) in &files {
            if !self.process_key(ledger, key, *size).await? {
                has_errors = true;
            }
        }

        Ok(!has_errors)
    }

    async fn postprocess(&mut self, _ledger: &dyn Ledger) -> Result<(), JobError> {
        if self.full {
            let deleted = self.catalog.delete_untouched(&self.touched).await?;
            info!(deleted, "Removed catalog rows absent from the full listing");
        }

        let orphans = self.catalog.delete_orphans().await?;
        if orphans > 0 {
            info!(orphans, "Removed empty catalog rows");
        }

        if self.load_covers {
            self.catalog.backfill_title_covers().await?;
        }

        if self.merge_after {
            let batch = MergeBatch::schedule(self.catalog.pool()).await?;
            info!("Queued reconciliation batch");
            self.scheduled = Some(batch);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_error_messages() {
        let err = IngestError::InvalidData("Year 99999 is out of range".to_string());
        assert_eq!(err.to_string(), "Invalid data");
        assert!(err.detail().contains("out of range"));
    }

    #[test]
    fn test_publish_date_rejects_out_of_range_years() {
        let date = publish_date_for_year(1963).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1963, 1, 1).unwrap());

        let err = publish_date_for_year(i32::MAX).unwrap_err();
        assert!(matches!(err, IngestError::InvalidData(_)));
        assert!(err.detail().contains("out of range"));
    }
}
