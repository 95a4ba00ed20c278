//! Marvel mirror persistence
//!
//! Upserts are keyed on the stable Marvel id and overwrite scalar fields, so
//! re-syncing an entity is idempotent. Relation rows for a comic are
//! replaced wholesale; the aggregate tables are rebuilt by distinct-union
//! passes after the batch.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::models::{CharacterDto, ComicDto, CreatorDto, EventDto, ImageDto, SeriesDto, UrlDto};
use super::{models, MarvelEntityKind};

#[derive(Clone)]
pub struct MarvelStore {
    pool: PgPool,
}

impl MarvelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Incremental watermark: the newest `modified` stored for the kind.
    pub async fn watermark(
        &self,
        entity: MarvelEntityKind,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        sqlx::query_scalar(&format!("SELECT max(modified) FROM {}", entity.table()))
            .fetch_one(&self.pool)
            .await
    }

    pub async fn upsert_series(&self, dto: &SeriesDto) -> Result<(), sqlx::Error> {
        let modified = dto.modified.as_deref().and_then(models::parse_modified);
        sqlx::query(
            r#"
            INSERT INTO marvel_series (marvel_id, title, description, start_year, end_year,
                                       series_type, rating, modified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (marvel_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                start_year = EXCLUDED.start_year,
                end_year = EXCLUDED.end_year,
                series_type = EXCLUDED.series_type,
                rating = EXCLUDED.rating,
                modified = EXCLUDED.modified
            "#,
        )
        .bind(dto.id)
        .bind(dto.title.as_deref().unwrap_or(""))
        .bind(dto.description.as_deref().unwrap_or(""))
        .bind(dto.start_year)
        .bind(dto.end_year)
        .bind(dto.series_type.as_deref().unwrap_or(""))
        .bind(dto.rating.as_deref().unwrap_or(""))
        .bind(modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_comic(
        &self,
        dto: &ComicDto,
        series_id: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        let modified = dto.modified.as_deref().and_then(models::parse_modified);
        sqlx::query(
            r#"
            INSERT INTO marvel_comics (marvel_id, title, description, issue_number, page_count,
                                       format, series_id, modified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (marvel_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                issue_number = EXCLUDED.issue_number,
                page_count = EXCLUDED.page_count,
                format = EXCLUDED.format,
                series_id = EXCLUDED.series_id,
                modified = EXCLUDED.modified
            "#,
        )
        .bind(dto.id)
        .bind(dto.title.as_deref().unwrap_or(""))
        .bind(dto.description.as_deref().unwrap_or(""))
        .bind(dto.issue_number)
        .bind(dto.page_count)
        .bind(dto.format.as_deref().unwrap_or(""))
        .bind(series_id)
        .bind(modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_character(&self, dto: &CharacterDto) -> Result<(), sqlx::Error> {
        let modified = dto.modified.as_deref().and_then(models::parse_modified);
        sqlx::query(
            r#"
            INSERT INTO marvel_characters (marvel_id, name, description, modified)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (marvel_id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                modified = EXCLUDED.modified
            "#,
        )
        .bind(dto.id)
        .bind(dto.name.as_deref().unwrap_or(""))
        .bind(dto.description.as_deref().unwrap_or(""))
        .bind(modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_creator(&self, dto: &CreatorDto) -> Result<(), sqlx::Error> {
        let modified = dto.modified.as_deref().and_then(models::parse_modified);
        sqlx::query(
            r#"
            INSERT INTO marvel_creators (marvel_id, full_name, modified)
            VALUES ($1, $2, $3)
            ON CONFLICT (marvel_id) DO UPDATE SET
                full_name = EXCLUDED.full_name,
                modified = EXCLUDED.modified
            "#,
        )
        .bind(dto.id)
        .bind(dto.full_name.as_deref().unwrap_or(""))
        .bind(modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_event(&self, dto: &EventDto) -> Result<(), sqlx::Error> {
        let modified = dto.modified.as_deref().and_then(models::parse_modified);
        let start = dto.start.as_deref().and_then(models::parse_event_date);
        let end = dto.end.as_deref().and_then(models::parse_event_date);
        sqlx::query(
            r#"
            INSERT INTO marvel_events (marvel_id, title, description, start_date, end_date, modified)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (marvel_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                modified = EXCLUDED.modified
            "#,
        )
        .bind(dto.id)
        .bind(dto.title.as_deref().unwrap_or(""))
        .bind(dto.description.as_deref().unwrap_or(""))
        .bind(start)
        .bind(end)
        .bind(modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_thumbnail(
        &self,
        entity: MarvelEntityKind,
        marvel_id: i64,
        image: &ImageDto,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO marvel_images (entity, marvel_id, image_type, path, extension)
            VALUES ($1, $2, 'thumbnail', $3, $4)
            ON CONFLICT (entity, marvel_id, image_type) DO UPDATE SET
                path = EXCLUDED.path,
                extension = EXCLUDED.extension
            "#,
        )
        .bind(entity.code())
        .bind(marvel_id)
        .bind(&image.path)
        .bind(&image.extension)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_urls(
        &self,
        entity: MarvelEntityKind,
        marvel_id: i64,
        urls: &[UrlDto],
    ) -> Result<(), sqlx::Error> {
        for url in urls {
            sqlx::query(
                r#"
                INSERT INTO marvel_urls (entity, marvel_id, url_type, url)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (entity, marvel_id, url_type) DO UPDATE SET url = EXCLUDED.url
                "#,
            )
            .bind(entity.code())
            .bind(marvel_id)
            .bind(&url.url_type)
            .bind(&url.url)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Fallback for relations pointing at entities synced in earlier runs.
    pub async fn entity_exists(
        &self,
        entity: MarvelEntityKind,
        marvel_id: i64,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE marvel_id = $1)",
            entity.table()
        ))
        .bind(marvel_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn replace_comic_characters(
        &self,
        comic_id: i64,
        character_ids: &[i64],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM marvel_comic_characters WHERE comic_id = $1")
            .bind(comic_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO marvel_comic_characters (comic_id, character_id)
            SELECT $1, unnest($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(comic_id)
        .bind(character_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn replace_comic_creators(
        &self,
        comic_id: i64,
        creators: &[(i64, String)],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM marvel_comic_creators WHERE comic_id = $1")
            .bind(comic_id)
            .execute(&self.pool)
            .await?;
        let (ids, roles): (Vec<i64>, Vec<String>) = creators.iter().cloned().unzip();
        sqlx::query(
            r#"
            INSERT INTO marvel_comic_creators (comic_id, creator_id, role)
            SELECT $1, id, role
            FROM unnest($2::BIGINT[], $3::TEXT[]) AS t(id, role)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(comic_id)
        .bind(&ids)
        .bind(&roles)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn replace_comic_events(
        &self,
        comic_id: i64,
        event_ids: &[i64],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM marvel_comic_events WHERE comic_id = $1")
            .bind(comic_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO marvel_comic_events (comic_id, event_id)
            SELECT $1, unnest($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(comic_id)
        .bind(event_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rebuild the aggregate relations derived transitively through comics.
    /// Distinct-union inserts, safe to re-run.
    #[instrument(skip(self))]
    pub async fn rebuild_aggregates(&self) -> Result<(), sqlx::Error> {
        let passes = [
            r#"
            INSERT INTO marvel_series_creators (series_id, creator_id)
            SELECT DISTINCT c.series_id, cc.creator_id
            FROM marvel_comics c
            JOIN marvel_comic_creators cc ON cc.comic_id = c.marvel_id
            WHERE c.series_id IS NOT NULL
            ON CONFLICT DO NOTHING
            "#,
            r#"
            INSERT INTO marvel_series_characters (series_id, character_id)
            SELECT DISTINCT c.series_id, ch.character_id
            FROM marvel_comics c
            JOIN marvel_comic_characters ch ON ch.comic_id = c.marvel_id
            WHERE c.series_id IS NOT NULL
            ON CONFLICT DO NOTHING
            "#,
            r#"
            INSERT INTO marvel_series_events (series_id, event_id)
            SELECT DISTINCT c.series_id, ce.event_id
            FROM marvel_comics c
            JOIN marvel_comic_events ce ON ce.comic_id = c.marvel_id
            WHERE c.series_id IS NOT NULL
            ON CONFLICT DO NOTHING
            "#,
            r#"
            INSERT INTO marvel_event_characters (event_id, character_id)
            SELECT DISTINCT ce.event_id, ch.character_id
            FROM marvel_comic_events ce
            JOIN marvel_comic_characters ch ON ch.comic_id = ce.comic_id
            ON CONFLICT DO NOTHING
            "#,
            r#"
            INSERT INTO marvel_event_creators (event_id, creator_id)
            SELECT DISTINCT ce.event_id, cc.creator_id
            FROM marvel_comic_events ce
            JOIN marvel_comic_creators cc ON cc.comic_id = ce.comic_id
            ON CONFLICT DO NOTHING
            "#,
        ];

        for pass in passes {
            let result = sqlx::query(pass).execute(&self.pool).await?;
            debug!(rows = result.rows_affected(), "Aggregate linking pass");
        }
        Ok(())
    }
}
