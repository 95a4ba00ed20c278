//! Marvel catalog sync job
//!
//! Mirrors the remote catalog into the local `marvel_*` tables. Entities are
//! processed in [`SYNC_ORDER`] so relations resolved while syncing comics can
//! land on rows synced earlier in the same run; anything older falls back to
//! a database lookup. Rate limiting is fatal for the whole run, any other
//! page or entity failure is recorded and skipped.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::merge::MergeBatch;
use crate::runs::{Job, JobError, JobKind, Ledger, StepPayload};

use super::client::MarvelClient;
use super::models::{CharacterDto, ComicDto, CreatorDto, EventDto, SeriesDto, SummaryDto};
use super::store::MarvelStore;
use super::{MarvelEntityKind, MarvelError, SYNC_ORDER};

/// How many consecutive page failures to tolerate while the
/// server-reported total is still unknown.
const BLIND_PAGE_LIMIT: u32 = 3;

#[derive(Debug, thiserror::Error)]
enum PersistError {
    #[error("Invalid entity payload")]
    Decode(#[from] serde_json::Error),

    #[error("Database error while persisting entity")]
    Database(#[from] sqlx::Error),
}

pub struct MarvelSyncJob {
    client: MarvelClient,
    store: MarvelStore,
    page_limit: u32,
    watermarks: HashMap<MarvelEntityKind, Option<DateTime<Utc>>>,
    totals: HashMap<MarvelEntityKind, u32>,
    seen: HashMap<MarvelEntityKind, HashSet<i64>>,
    scheduled: Option<MergeBatch>,
}

impl MarvelSyncJob {
    pub fn new(client: MarvelClient, store: MarvelStore, page_limit: u32) -> Self {
        Self {
            client,
            store,
            page_limit,
            watermarks: HashMap::new(),
            totals: HashMap::new(),
            seen: HashMap::new(),
            scheduled: None,
        }
    }

    /// The merge batch queued by postprocessing, for the caller to execute
    /// once this run is sealed.
    pub fn take_scheduled_merge(&mut self) -> Option<MergeBatch> {
        self.scheduled.take()
    }

    async fn sync_entity(
        &mut self,
        ledger: &dyn Ledger,
        kind: MarvelEntityKind,
    ) -> Result<bool, JobError> {
        let since = self.watermarks.get(&kind).copied().flatten();
        let limit = self.page_limit;
        let mut offset = 0u32;
        let mut total: Option<u32> = None;
        let mut blind_failures = 0u32;
        let mut clean = true;

        loop {
            let mut payload = StepPayload::ApiGet {
                entity: kind,
                offset,
                limit,
                received: 0,
            };
            let step_id = ledger.begin_step(&payload).await?;

            match self.client.get_page(kind, offset, limit, since).await {
                Ok(page) => {
                    if let StepPayload::ApiGet { received, .. } = &mut payload {
                        *received = page.count;
                    }
                    ledger.step_success(step_id, &payload).await?;

                    if total != Some(page.total) {
                        total = Some(page.total);
                        self.totals.insert(kind, page.total);
                        self.raise_items_count(ledger).await?;
                    }

                    let empty = page.results.is_empty();
                    for result in &page.results {
                        if !self.sync_result(ledger, kind, result).await? {
                            clean = false;
                        }
                    }

                    offset += limit;
                    if empty || offset >= page.total {
                        break;
                    }
                },
                Err(MarvelError::RateLimit) => {
                    ledger
                        .step_error(step_id, "API rate limit reached", "", &payload)
                        .await?;
                    return Err(JobError::ApiThrottled);
                },
                Err(err) => {
                    warn!(entity = %kind, offset, error = %err, "Page request failed");
                    ledger
                        .step_error(step_id, "API page request failed", &err.to_string(), &payload)
                        .await?;
                    clean = false;

                    // A failed page is skipped, not retried. While the total
                    // is still unknown the loop tries a bounded number of
                    // further offsets before giving up on the entity.
                    offset += limit;
                    match total {
                        Some(t) if offset < t => {},
                        Some(_) => break,
                        None => {
                            blind_failures += 1;
                            if blind_failures >= BLIND_PAGE_LIMIT {
                                break;
                            }
                        },
                    }
                },
            }
        }

        Ok(clean)
    }

    /// The expected item count accrues as each entity's first page reports
    /// its total.
    async fn raise_items_count(&self, ledger: &dyn Ledger) -> Result<(), JobError> {
        let expected: usize = self.totals.values().map(|t| *t as usize).sum();
        ledger.set_items_count(expected).await?;
        Ok(())
    }

    async fn sync_result(
        &mut self,
        ledger: &dyn Ledger,
        kind: MarvelEntityKind,
        raw: &Value,
    ) -> Result<bool, JobError> {
        let marvel_id = raw.get("id").and_then(Value::as_i64);
        let payload = StepPayload::ApiEntity {
            entity: kind,
            marvel_id: marvel_id.unwrap_or(0),
            action: "synced".to_string(),
            raw: raw.clone(),
        };
        let step_id = ledger.begin_step(&payload).await?;

        let Some(id) = marvel_id else {
            ledger
                .step_error(step_id, "Entity payload has no id", "", &payload)
                .await?;
            return Ok(false);
        };

        match self.persist(kind, raw).await {
            Ok(unresolved) => {
                self.seen.entry(kind).or_default().insert(id);
                if unresolved.is_empty() {
                    ledger.step_success(step_id, &payload).await?;
                    Ok(true)
                } else {
                    ledger
                        .step_error(
                            step_id,
                            "Could not resolve related entities",
                            &unresolved.join("; "),
                            &payload,
                        )
                        .await?;
                    Ok(false)
                }
            },
            Err(err) => {
                ledger
                    .step_error(step_id, &err.to_string(), &format!("{err:?}"), &payload)
                    .await?;
                Ok(false)
            },
        }
    }

    /// Upsert one entity row plus its thumbnail and url side rows. Returns
    /// descriptions of relations that could not be resolved locally.
    async fn persist(
        &mut self,
        kind: MarvelEntityKind,
        raw: &Value,
    ) -> Result<Vec<String>, PersistError> {
        let mut unresolved = Vec::new();

        match kind {
            MarvelEntityKind::Creator => {
                let dto: CreatorDto = serde_json::from_value(raw.clone())?;
                self.store.upsert_creator(&dto).await?;
                self.persist_common(kind, dto.id, dto.thumbnail.as_ref(), dto.urls.as_deref())
                    .await?;
            },
            MarvelEntityKind::Character => {
                let dto: CharacterDto = serde_json::from_value(raw.clone())?;
                self.store.upsert_character(&dto).await?;
                self.persist_common(kind, dto.id, dto.thumbnail.as_ref(), dto.urls.as_deref())
                    .await?;
            },
            MarvelEntityKind::Event => {
                let dto: EventDto = serde_json::from_value(raw.clone())?;
                self.store.upsert_event(&dto).await?;
                self.persist_common(kind, dto.id, dto.thumbnail.as_ref(), dto.urls.as_deref())
                    .await?;
            },
            MarvelEntityKind::Series => {
                let dto: SeriesDto = serde_json::from_value(raw.clone())?;
                self.store.upsert_series(&dto).await?;
                self.persist_common(kind, dto.id, dto.thumbnail.as_ref(), dto.urls.as_deref())
                    .await?;
            },
            MarvelEntityKind::Comic => {
                let dto: ComicDto = serde_json::from_value(raw.clone())?;

                let series_id = match dto.series.as_ref() {
                    Some(summary) => {
                        self.resolve(MarvelEntityKind::Series, summary, &mut unresolved)
                            .await?
                    },
                    None => None,
                };
                self.store.upsert_comic(&dto, series_id).await?;

                if let Some(characters) = &dto.characters {
                    let mut ids = Vec::new();
                    for item in &characters.items {
                        if let Some(id) = self
                            .resolve(MarvelEntityKind::Character, item, &mut unresolved)
                            .await?
                        {
                            ids.push(id);
                        }
                    }
                    self.store.replace_comic_characters(dto.id, &ids).await?;
                }

                if let Some(creators) = &dto.creators {
                    let mut links = Vec::new();
                    for item in &creators.items {
                        if let Some(id) = self
                            .resolve(MarvelEntityKind::Creator, item, &mut unresolved)
                            .await?
                        {
                            links.push((id, item.role.clone().unwrap_or_default()));
                        }
                    }
                    self.store.replace_comic_creators(dto.id, &links).await?;
                }

                if let Some(events) = &dto.events {
                    let mut ids = Vec::new();
                    for item in &events.items {
                        if let Some(id) = self
                            .resolve(MarvelEntityKind::Event, item, &mut unresolved)
                            .await?
                        {
                            ids.push(id);
                        }
                    }
                    self.store.replace_comic_events(dto.id, &ids).await?;
                }

                self.persist_common(kind, dto.id, dto.thumbnail.as_ref(), dto.urls.as_deref())
                    .await?;
            },
        }

        Ok(unresolved)
    }

    async fn persist_common(
        &self,
        kind: MarvelEntityKind,
        marvel_id: i64,
        thumbnail: Option<&super::models::ImageDto>,
        urls: Option<&[super::models::UrlDto]>,
    ) -> Result<(), sqlx::Error> {
        if let Some(image) = thumbnail {
            self.store.upsert_thumbnail(kind, marvel_id, image).await?;
        }
        if let Some(urls) = urls {
            self.store.upsert_urls(kind, marvel_id, urls).await?;
        }
        Ok(())
    }

    /// Resolve a relation summary to a locally-present marvel id: this run's
    /// batch first, then the database for entities from earlier runs.
    async fn resolve(
        &self,
        kind: MarvelEntityKind,
        summary: &SummaryDto,
        unresolved: &mut Vec<String>,
    ) -> Result<Option<i64>, sqlx::Error> {
        let Some(id) = summary.marvel_id() else {
            unresolved.push(format!(
                "{} reference without id: {}",
                kind, summary.resource_uri
            ));
            return Ok(None);
        };

        if self.seen.get(&kind).map_or(false, |s| s.contains(&id)) {
            return Ok(Some(id));
        }
        if self.store.entity_exists(kind, id).await? {
            return Ok(Some(id));
        }

        unresolved.push(format!("{} {} not found locally", kind, id));
        Ok(None)
    }
}

#[async_trait]
impl Job for MarvelSyncJob {
    fn kind(&self) -> JobKind {
        JobKind::MarvelApiSync
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![("page_limit".to_string(), self.page_limit.to_string())]
    }

    /// Read per-entity watermarks. Totals stay unknown until each entity's
    /// first page arrives, so the expected item count starts at zero and is
    /// raised as the fetch progresses.
    async fn prepare(&mut self, _ledger: &dyn Ledger) -> Result<usize, JobError> {
        for kind in SYNC_ORDER {
            let watermark = self.store.watermark(kind).await?;
            self.watermarks.insert(kind, watermark);
        }
        info!("Collected Marvel entity watermarks");
        Ok(0)
    }

    async fn process(&mut self, ledger: &dyn Ledger) -> Result<bool, JobError> {
        let mut has_errors = false;
        for kind in SYNC_ORDER {
            if !self.sync_entity(ledger, kind).await? {
                has_errors = true;
            }
        }
        Ok(!has_errors)
    }

    async fn postprocess(&mut self, _ledger: &dyn Ledger) -> Result<(), JobError> {
        self.store.rebuild_aggregates().await?;

        let batch = MergeBatch::schedule(self.store.pool()).await?;
        info!("Queued reconciliation batch");
        self.scheduled = Some(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::MarvelConfig;
    use crate::runs::testing::MemoryLedger;
    use crate::runs::StepStatus;

    fn job(base_url: String) -> MarvelSyncJob {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let config = MarvelConfig {
            base_url,
            public_key: "pub".to_string(),
            private_key: "priv".to_string(),
            page_limit: 100,
            timeout_secs: 5,
        };
        let client = MarvelClient::new(config).unwrap();
        MarvelSyncJob::new(client, MarvelStore::new(pool), 100)
    }

    /// One result per page, deliberately without an id so the entity step
    /// errors before touching the database.
    fn page_body(total: u32) -> serde_json::Value {
        serde_json::json!({
            "code": 200,
            "status": "Ok",
            "data": {
                "offset": 0,
                "limit": 100,
                "total": total,
                "count": 1,
                "results": [{"title": "Nameless"}]
            }
        })
    }

    fn page_steps(state: &crate::runs::testing::LedgerState) -> Vec<(u32, StepStatus)> {
        state
            .steps
            .iter()
            .filter_map(|s| match s.payload {
                StepPayload::ApiGet { offset, .. } => Some((offset, s.status)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_makes_one_step_per_page() {
        let server = MockServer::start().await;
        for offset in ["0", "100", "200"] {
            Mock::given(method("GET"))
                .and(path("/comics"))
                .and(query_param("offset", offset))
                .respond_with(ResponseTemplate::new(200).set_body_json(page_body(250)))
                .expect(1)
                .mount(&server)
                .await;
        }

        let mut job = job(server.uri());
        let ledger = MemoryLedger::new(JobKind::MarvelApiSync);
        job.sync_entity(&ledger, MarvelEntityKind::Comic)
            .await
            .unwrap();

        let state = ledger.state();
        let pages = page_steps(&state);
        assert_eq!(
            pages,
            vec![
                (0, StepStatus::Success),
                (100, StepStatus::Success),
                (200, StepStatus::Success),
            ]
        );
        assert_eq!(state.items_count, Some(250));
        // Page steps do not count toward progress; the three id-less
        // entity payloads do.
        assert_eq!(state.processed, 3);
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_with_no_further_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comics"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(250)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/comics"))
            .and(query_param("offset", "100"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/comics"))
            .and(query_param("offset", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(250)))
            .expect(0)
            .mount(&server)
            .await;

        let mut job = job(server.uri());
        let ledger = MemoryLedger::new(JobKind::MarvelApiSync);
        let err = job
            .sync_entity(&ledger, MarvelEntityKind::Comic)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ApiThrottled));

        let state = ledger.state();
        let last = state.steps.last().unwrap();
        assert!(matches!(last.payload, StepPayload::ApiGet { offset: 100, .. }));
        assert_eq!(last.error, "API rate limit reached");
        assert!(last.error_detail.is_empty());
    }

    #[tokio::test]
    async fn test_bad_first_page_does_not_abort_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comics"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        for offset in ["100", "200"] {
            Mock::given(method("GET"))
                .and(path("/comics"))
                .and(query_param("offset", offset))
                .respond_with(ResponseTemplate::new(200).set_body_json(page_body(250)))
                .expect(1)
                .mount(&server)
                .await;
        }

        let mut job = job(server.uri());
        let ledger = MemoryLedger::new(JobKind::MarvelApiSync);
        let clean = job
            .sync_entity(&ledger, MarvelEntityKind::Comic)
            .await
            .unwrap();
        assert!(!clean);

        let state = ledger.state();
        let pages = page_steps(&state);
        assert_eq!(
            pages,
            vec![
                (0, StepStatus::Error),
                (100, StepStatus::Success),
                (200, StepStatus::Success),
            ]
        );
        assert_eq!(state.items_count, Some(250));
    }

    #[tokio::test]
    async fn test_unknown_total_page_errors_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comics"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let mut job = job(server.uri());
        let ledger = MemoryLedger::new(JobKind::MarvelApiSync);
        let clean = job
            .sync_entity(&ledger, MarvelEntityKind::Comic)
            .await
            .unwrap();
        assert!(!clean);

        let state = ledger.state();
        assert_eq!(page_steps(&state).len(), 3);
        assert!(state.steps.iter().all(|s| s.status == StepStatus::Error));
    }
}
