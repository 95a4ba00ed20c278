//! Catalog persistence
//!
//! Get-or-create follows the natural keys of the hierarchy: publisher name,
//! universe name within a publisher, title path-key within its publisher,
//! universe and type, issue storage link. Inserts race through
//! `ON CONFLICT DO NOTHING` followed by a lookup, so a re-run over an
//! unchanged bucket creates no duplicates.

use std::collections::HashSet;

use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use comicsdb_common::slug::{slugify, slugify_parts};

/// Result of a get-or-create lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOrCreate {
    pub id: Uuid,
    pub created: bool,
}

/// Row ids touched during one ingest run, kept for full-reload cleanup.
/// Built per run and discarded with it.
#[derive(Debug, Default)]
pub struct TouchedRows {
    pub publishers: HashSet<Uuid>,
    pub universes: HashSet<Uuid>,
    pub titles: HashSet<Uuid>,
    pub issues: HashSet<Uuid>,
}

#[derive(Clone)]
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get_or_create_publisher(&self, name: &str) -> Result<GetOrCreate, sqlx::Error> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO publishers (name, slug)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(slugify(name))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            debug!(%id, name, "Created publisher");
            return Ok(GetOrCreate { id, created: true });
        }

        let id: Uuid = sqlx::query_scalar("SELECT id FROM publishers WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(GetOrCreate { id, created: false })
    }

    pub async fn get_or_create_universe(
        &self,
        name: &str,
        publisher_id: Uuid,
        publisher_name: &str,
    ) -> Result<GetOrCreate, sqlx::Error> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO universes (name, publisher_id, slug)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(publisher_id)
        .bind(slugify_parts(&[publisher_name, name]))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            debug!(%id, name, "Created universe");
            return Ok(GetOrCreate { id, created: true });
        }

        let id: Uuid =
            sqlx::query_scalar("SELECT id FROM universes WHERE name = $1 AND publisher_id = $2")
                .bind(name)
                .bind(publisher_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(GetOrCreate { id, created: false })
    }

    pub async fn get_or_create_title_type(&self, name: &str) -> Result<GetOrCreate, sqlx::Error> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO title_types (name)
            VALUES ($1)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(GetOrCreate { id, created: true });
        }

        let id: Uuid = sqlx::query_scalar("SELECT id FROM title_types WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(GetOrCreate { id, created: false })
    }

    pub async fn get_or_create_title(
        &self,
        path_key: &str,
        publisher_id: Uuid,
        universe_id: Uuid,
        title_type_id: Uuid,
        slug_parts: &[&str],
    ) -> Result<GetOrCreate, sqlx::Error> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO titles (path_key, name, publisher_id, universe_id, title_type_id, slug)
            VALUES ($1, $1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(path_key)
        .bind(publisher_id)
        .bind(universe_id)
        .bind(title_type_id)
        .bind(slugify_parts(slug_parts))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            debug!(%id, path_key, "Created title");
            return Ok(GetOrCreate { id, created: true });
        }

        let id: Uuid = sqlx::query_scalar(
            r#"
            SELECT id FROM titles
            WHERE path_key = $1 AND publisher_id = $2 AND universe_id = $3 AND title_type_id = $4
            "#,
        )
        .bind(path_key)
        .bind(publisher_id)
        .bind(universe_id)
        .bind(title_type_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(GetOrCreate { id, created: false })
    }

    /// Get or create an issue by its storage link; scalar fields that come
    /// from the listing (number, file size) are refreshed either way.
    #[instrument(skip(self, name, number, publish_date))]
    pub async fn get_or_create_issue(
        &self,
        link: &str,
        name: &str,
        number: Option<f64>,
        title_id: Uuid,
        publish_date: NaiveDate,
        file_size: Option<i64>,
    ) -> Result<GetOrCreate, sqlx::Error> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO issues (link, name, number, title_id, publish_date, file_size, slug)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(link)
        .bind(name)
        .bind(number)
        .bind(title_id)
        .bind(publish_date)
        .bind(file_size)
        .bind(slugify(link))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            debug!(%id, link, "Created issue");
            return Ok(GetOrCreate { id, created: true });
        }

        let id: Uuid = sqlx::query_scalar(
            r#"
            UPDATE issues
            SET number = $2, file_size = $3, modified_at = now()
            WHERE link = $1
            RETURNING id
            "#,
        )
        .bind(link)
        .bind(number)
        .bind(file_size)
        .fetch_one(&self.pool)
        .await?;
        Ok(GetOrCreate { id, created: false })
    }

    pub async fn issue_cover_key(&self, issue_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT main_cover_key FROM issues WHERE id = $1")
            .bind(issue_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn set_issue_cover(&self, issue_id: Uuid, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE issues SET main_cover_key = $2, modified_at = now() WHERE id = $1")
            .bind(issue_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete titles with no issues, then universes with no titles, then
    /// publishers with neither titles nor universes. Runs after the whole
    /// batch, bottom-up so cascades settle in one pass.
    #[instrument(skip(self))]
    pub async fn delete_orphans(&self) -> Result<u64, sqlx::Error> {
        let mut deleted = 0;

        deleted += sqlx::query(
            r#"
            DELETE FROM titles t
            WHERE NOT EXISTS (SELECT 1 FROM issues i WHERE i.title_id = t.id)
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        deleted += sqlx::query(
            r#"
            DELETE FROM universes u
            WHERE NOT EXISTS (SELECT 1 FROM titles t WHERE t.universe_id = u.id)
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        deleted += sqlx::query(
            r#"
            DELETE FROM publishers p
            WHERE NOT EXISTS (SELECT 1 FROM titles t WHERE t.publisher_id = p.id)
              AND NOT EXISTS (SELECT 1 FROM universes u WHERE u.publisher_id = p.id)
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }

    /// Full-reload cleanup: the touched sets are authoritative, everything
    /// else goes.
    #[instrument(skip(self, touched))]
    pub async fn delete_untouched(&self, touched: &TouchedRows) -> Result<u64, sqlx::Error> {
        let mut deleted = 0;
        deleted += self
            .delete_not_in("issues", &touched.issues)
            .await?;
        deleted += self.delete_not_in("titles", &touched.titles).await?;
        deleted += self
            .delete_not_in("universes", &touched.universes)
            .await?;
        deleted += self
            .delete_not_in("publishers", &touched.publishers)
            .await?;
        Ok(deleted)
    }

    async fn delete_not_in(
        &self,
        table: &str,
        keep: &HashSet<Uuid>,
    ) -> Result<u64, sqlx::Error> {
        let ids: Vec<Uuid> = keep.iter().copied().collect();
        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE NOT (id = ANY($1))"
        ))
        .bind(&ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Give cover-less titles the cover of their lowest-numbered issue.
    pub async fn backfill_title_covers(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE titles t
            SET image_key = c.main_cover_key
            FROM (
                SELECT DISTINCT ON (title_id) title_id, main_cover_key
                FROM issues
                WHERE main_cover_key IS NOT NULL
                ORDER BY title_id, number ASC NULLS LAST
            ) c
            WHERE c.title_id = t.id AND t.image_key IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
