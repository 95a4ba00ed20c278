//! Merge persistence
//!
//! Search, linking and field derivation for the five merge variants. A link
//! overwrites the catalog row's derived fields from its Marvel counterpart
//! and rewrites relation tables wholesale (delete then bulk insert, never
//! diffed).

use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::marvel::MarvelEntityKind;

/// One catalog row up for reconciliation. `number` and `series_id` are only
/// populated for issues.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MergeRow {
    pub id: Uuid,
    pub name: String,
    pub number: Option<f64>,
    pub series_id: Option<i64>,
    pub marvel_id: Option<i64>,
    pub marvel_ignore: bool,
}

fn catalog_table(entity: MarvelEntityKind) -> &'static str {
    match entity {
        MarvelEntityKind::Series => "titles",
        MarvelEntityKind::Comic => "issues",
        MarvelEntityKind::Character => "characters",
        MarvelEntityKind::Creator => "creators",
        MarvelEntityKind::Event => "events",
    }
}

/// Map a Marvel series type string onto a title type name.
pub fn map_series_type(series_type: &str) -> Option<&'static str> {
    match series_type.trim().to_ascii_lowercase().as_str() {
        "ongoing" => Some("Ongoing"),
        "limited" => Some("Limited"),
        "one shot" | "one-shot" => Some("One-shot"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct MergeStore {
    pool: PgPool,
}

impl MergeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All catalog rows of the entity's kind, in stable order.
    pub async fn load_rows(
        &self,
        entity: MarvelEntityKind,
    ) -> Result<Vec<MergeRow>, sqlx::Error> {
        let query = match entity {
            MarvelEntityKind::Comic => {
                r#"
                SELECT i.id, i.name, i.number, t.marvel_id AS series_id,
                       i.marvel_id, i.marvel_ignore
                FROM issues i
                JOIN titles t ON t.id = i.title_id
                ORDER BY i.name
                "#
            },
            MarvelEntityKind::Series => {
                r#"
                SELECT id, name, NULL::DOUBLE PRECISION AS number, NULL::BIGINT AS series_id,
                       marvel_id, marvel_ignore
                FROM titles
                ORDER BY name
                "#
            },
            MarvelEntityKind::Character => {
                r#"
                SELECT id, name, NULL::DOUBLE PRECISION AS number, NULL::BIGINT AS series_id,
                       marvel_id, marvel_ignore
                FROM characters
                ORDER BY name
                "#
            },
            MarvelEntityKind::Creator => {
                r#"
                SELECT id, name, NULL::DOUBLE PRECISION AS number, NULL::BIGINT AS series_id,
                       marvel_id, marvel_ignore
                FROM creators
                ORDER BY name
                "#
            },
            MarvelEntityKind::Event => {
                r#"
                SELECT id, name, NULL::DOUBLE PRECISION AS number, NULL::BIGINT AS series_id,
                       marvel_id, marvel_ignore
                FROM events
                ORDER BY name
                "#
            },
        };

        sqlx::query_as::<_, MergeRow>(query)
            .fetch_all(&self.pool)
            .await
    }

    /// Exact-match search for a row's Marvel counterpart. Issues match by
    /// issue number within their title's linked series; a title without a
    /// series link yields no matches.
    pub async fn search(
        &self,
        entity: MarvelEntityKind,
        row: &MergeRow,
    ) -> Result<Vec<i64>, sqlx::Error> {
        match entity {
            MarvelEntityKind::Comic => {
                let (Some(series_id), Some(number)) = (row.series_id, row.number) else {
                    return Ok(Vec::new());
                };
                sqlx::query_scalar(
                    r#"
                    SELECT marvel_id FROM marvel_comics
                    WHERE series_id = $1 AND issue_number = $2
                    ORDER BY marvel_id
                    "#,
                )
                .bind(series_id)
                .bind(number)
                .fetch_all(&self.pool)
                .await
            },
            MarvelEntityKind::Series => {
                sqlx::query_scalar(
                    "SELECT marvel_id FROM marvel_series WHERE title = $1 ORDER BY marvel_id",
                )
                .bind(&row.name)
                .fetch_all(&self.pool)
                .await
            },
            MarvelEntityKind::Character => {
                sqlx::query_scalar(
                    "SELECT marvel_id FROM marvel_characters WHERE name = $1 ORDER BY marvel_id",
                )
                .bind(&row.name)
                .fetch_all(&self.pool)
                .await
            },
            MarvelEntityKind::Creator => {
                sqlx::query_scalar(
                    "SELECT marvel_id FROM marvel_creators WHERE full_name = $1 ORDER BY marvel_id",
                )
                .bind(&row.name)
                .fetch_all(&self.pool)
                .await
            },
            MarvelEntityKind::Event => {
                sqlx::query_scalar(
                    "SELECT marvel_id FROM marvel_events WHERE title = $1 ORDER BY marvel_id",
                )
                .bind(&row.name)
                .fetch_all(&self.pool)
                .await
            },
        }
    }

    pub async fn set_ignore(
        &self,
        entity: MarvelEntityKind,
        catalog_id: Uuid,
        value: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "UPDATE {} SET marvel_ignore = $2 WHERE id = $1",
            catalog_table(entity)
        ))
        .bind(catalog_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_candidates(
        &self,
        entity: MarvelEntityKind,
        catalog_id: Uuid,
        marvel_ids: &[i64],
    ) -> Result<(), sqlx::Error> {
        self.clear_candidates(entity, catalog_id).await?;
        sqlx::query(
            r#"
            INSERT INTO marvel_match_candidates (entity, catalog_id, marvel_id)
            SELECT $1, $2, unnest($3::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(entity.code())
        .bind(catalog_id)
        .bind(marvel_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_candidates(
        &self,
        entity: MarvelEntityKind,
        catalog_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM marvel_match_candidates WHERE entity = $1 AND catalog_id = $2")
            .bind(entity.code())
            .bind(catalog_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Link a catalog row to a Marvel row, overwrite derived fields and
    /// rewrite relations.
    #[instrument(skip(self))]
    pub async fn apply_link(
        &self,
        entity: MarvelEntityKind,
        catalog_id: Uuid,
        marvel_id: i64,
    ) -> Result<(), sqlx::Error> {
        match entity {
            MarvelEntityKind::Series => self.apply_title_link(catalog_id, marvel_id).await,
            MarvelEntityKind::Comic => self.apply_issue_link(catalog_id, marvel_id).await,
            MarvelEntityKind::Character => self.apply_character_link(catalog_id, marvel_id).await,
            MarvelEntityKind::Creator => self.apply_creator_link(catalog_id, marvel_id).await,
            MarvelEntityKind::Event => self.apply_event_link(catalog_id, marvel_id).await,
        }
    }

    /// Operator override: link without searching, reset the ignore flag and
    /// drop any stale candidates.
    pub async fn force_link(
        &self,
        entity: MarvelEntityKind,
        catalog_id: Uuid,
        marvel_id: i64,
    ) -> Result<(), sqlx::Error> {
        self.apply_link(entity, catalog_id, marvel_id).await?;
        self.clear_candidates(entity, catalog_id).await?;
        self.set_ignore(entity, catalog_id, false).await?;
        debug!(entity = %entity, %catalog_id, marvel_id, "Forced manual link");
        Ok(())
    }

    async fn apply_title_link(&self, title_id: Uuid, series_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE titles t
            SET marvel_id = $2,
                description = COALESCE(NULLIF(s.description, ''), t.description)
            FROM marvel_series s
            WHERE t.id = $1 AND s.marvel_id = $2
            "#,
        )
        .bind(title_id)
        .bind(series_id)
        .execute(&self.pool)
        .await?;

        let series_type: Option<String> =
            sqlx::query_scalar("SELECT series_type FROM marvel_series WHERE marvel_id = $1")
                .bind(series_id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(type_name) = series_type.as_deref().and_then(map_series_type) {
            sqlx::query("INSERT INTO title_types (name) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(type_name)
                .execute(&self.pool)
                .await?;
            sqlx::query(
                r#"
                UPDATE titles
                SET title_type_id = (SELECT id FROM title_types WHERE name = $2)
                WHERE id = $1
                "#,
            )
            .bind(title_id)
            .bind(type_name)
            .execute(&self.pool)
            .await?;
        }

        sqlx::query("DELETE FROM title_creators WHERE title_id = $1")
            .bind(title_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO title_creators (title_id, creator_id, role)
            SELECT $1, c.id, ''
            FROM marvel_series_creators sc
            JOIN creators c ON c.marvel_id = sc.creator_id
            WHERE sc.series_id = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(title_id)
        .bind(series_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM title_characters WHERE title_id = $1")
            .bind(title_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO title_characters (title_id, character_id)
            SELECT $1, ch.id
            FROM marvel_series_characters sc
            JOIN characters ch ON ch.marvel_id = sc.character_id
            WHERE sc.series_id = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(title_id)
        .bind(series_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_issue_link(&self, issue_id: Uuid, comic_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE issues i
            SET marvel_id = $2,
                description = COALESCE(NULLIF(c.description, ''), i.description),
                page_count = COALESCE(c.page_count, i.page_count),
                marvel_detail_link = COALESCE(
                    (SELECT url FROM marvel_urls
                     WHERE entity = 'comic' AND marvel_id = $2 AND url_type = 'detail'),
                    i.marvel_detail_link),
                marvel_purchase_link = COALESCE(
                    (SELECT url FROM marvel_urls
                     WHERE entity = 'comic' AND marvel_id = $2 AND url_type = 'purchase'),
                    i.marvel_purchase_link),
                modified_at = now()
            FROM marvel_comics c
            WHERE i.id = $1 AND c.marvel_id = $2
            "#,
        )
        .bind(issue_id)
        .bind(comic_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM issue_creators WHERE issue_id = $1")
            .bind(issue_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO issue_creators (issue_id, creator_id, role)
            SELECT $1, cr.id, cc.role
            FROM marvel_comic_creators cc
            JOIN creators cr ON cr.marvel_id = cc.creator_id
            WHERE cc.comic_id = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(issue_id)
        .bind(comic_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM issue_characters WHERE issue_id = $1")
            .bind(issue_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO issue_characters (issue_id, character_id)
            SELECT $1, ch.id
            FROM marvel_comic_characters cc
            JOIN characters ch ON ch.marvel_id = cc.character_id
            WHERE cc.comic_id = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(issue_id)
        .bind(comic_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM event_issues WHERE issue_id = $1")
            .bind(issue_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO event_issues (event_id, issue_id)
            SELECT e.id, $1
            FROM marvel_comic_events ce
            JOIN events e ON e.marvel_id = ce.event_id
            WHERE ce.comic_id = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(issue_id)
        .bind(comic_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_character_link(
        &self,
        character_id: Uuid,
        marvel_id: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE characters ch
            SET marvel_id = $2,
                description = COALESCE(NULLIF(m.description, ''), ch.description),
                marvel_detail_link = COALESCE(
                    (SELECT url FROM marvel_urls
                     WHERE entity = 'character' AND marvel_id = $2 AND url_type = 'detail'),
                    ch.marvel_detail_link)
            FROM marvel_characters m
            WHERE ch.id = $1 AND m.marvel_id = $2
            "#,
        )
        .bind(character_id)
        .bind(marvel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_creator_link(
        &self,
        creator_id: Uuid,
        marvel_id: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE creators c
            SET marvel_id = $2,
                name = COALESCE(NULLIF(m.full_name, ''), c.name)
            FROM marvel_creators m
            WHERE c.id = $1 AND m.marvel_id = $2
            "#,
        )
        .bind(creator_id)
        .bind(marvel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_event_link(&self, event_id: Uuid, marvel_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE events e
            SET marvel_id = $2,
                description = COALESCE(NULLIF(m.description, ''), e.description),
                start_date = COALESCE(m.start_date, e.start_date),
                end_date = COALESCE(m.end_date, e.end_date),
                detail_link = COALESCE(
                    (SELECT url FROM marvel_urls
                     WHERE entity = 'event' AND marvel_id = $2 AND url_type = 'detail'),
                    e.detail_link)
            FROM marvel_events m
            WHERE e.id = $1 AND m.marvel_id = $2
            "#,
        )
        .bind(event_id)
        .bind(marvel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_series_type() {
        assert_eq!(map_series_type("ongoing"), Some("Ongoing"));
        assert_eq!(map_series_type("Limited"), Some("Limited"));
        assert_eq!(map_series_type("one shot"), Some("One-shot"));
        assert_eq!(map_series_type("one-shot"), Some("One-shot"));
        assert_eq!(map_series_type("collection"), None);
        assert_eq!(map_series_type(""), None);
    }

    #[test]
    fn test_catalog_tables() {
        assert_eq!(catalog_table(MarvelEntityKind::Series), "titles");
        assert_eq!(catalog_table(MarvelEntityKind::Comic), "issues");
        assert_eq!(catalog_table(MarvelEntityKind::Creator), "creators");
    }
}
