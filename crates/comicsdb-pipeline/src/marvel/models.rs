//! Marvel API wire types
//!
//! The response envelope wraps a page of results; result objects are kept as
//! raw JSON on the step record for audit and deserialized into per-kind DTOs
//! before persisting.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub status: String,
    pub data: Page,
}

/// One page of API results.
#[derive(Debug, Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
    pub total: u32,
    pub count: u32,
    #[serde(default)]
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageDto {
    pub path: String,
    pub extension: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UrlDto {
    #[serde(rename = "type")]
    pub url_type: String,
    pub url: String,
}

/// Reference to a related entity; the id is only present as the trailing
/// digits of its resource URI.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryDto {
    #[serde(rename = "resourceURI")]
    pub resource_uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl SummaryDto {
    pub fn marvel_id(&self) -> Option<i64> {
        let digits: String = self
            .resource_uri
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.chars().rev().collect::<String>().parse().ok()
    }
}

/// Inline relation list: the API embeds up to a page of summaries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceListDto {
    #[serde(default)]
    pub available: i64,
    #[serde(default)]
    pub items: Vec<SummaryDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesDto {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default, rename = "type")]
    pub series_type: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<ImageDto>,
    #[serde(default)]
    pub urls: Option<Vec<UrlDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicDto {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub issue_number: Option<f64>,
    #[serde(default)]
    pub page_count: Option<i32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<ImageDto>,
    #[serde(default)]
    pub urls: Option<Vec<UrlDto>>,
    #[serde(default)]
    pub series: Option<SummaryDto>,
    #[serde(default)]
    pub characters: Option<ResourceListDto>,
    #[serde(default)]
    pub creators: Option<ResourceListDto>,
    #[serde(default)]
    pub events: Option<ResourceListDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterDto {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<ImageDto>,
    #[serde(default)]
    pub urls: Option<Vec<UrlDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorDto {
    pub id: i64,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<ImageDto>,
    #[serde(default)]
    pub urls: Option<Vec<UrlDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<ImageDto>,
    #[serde(default)]
    pub urls: Option<Vec<UrlDto>>,
}

/// Parse an API "modified" timestamp (`2014-04-29T14:18:17-0400`, RFC 3339
/// as a fallback). The API uses year -0001 as a null sentinel; that and any
/// other pre-CE value maps to `None`.
pub fn parse_modified(value: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()?;
    if parsed.year() < 1 {
        return None;
    }
    Some(parsed.with_timezone(&Utc))
}

/// Parse an event start/end date (`2008-06-02 00:00:00`).
pub fn parse_event_date(value: &str) -> Option<NaiveDate> {
    let parsed = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()?;
    if parsed.year() < 1 {
        return None;
    }
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_page_decodes() {
        let raw = serde_json::json!({
            "code": 200,
            "status": "Ok",
            "data": {
                "offset": 0,
                "limit": 100,
                "total": 250,
                "count": 100,
                "results": [{"id": 1}]
            }
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.data.total, 250);
        assert_eq!(envelope.data.results.len(), 1);
    }

    #[test]
    fn test_summary_id_from_resource_uri() {
        let summary = SummaryDto {
            resource_uri: "http://gateway.marvel.com/v1/public/series/1945".to_string(),
            name: Some("Avengers (1998 - 2004)".to_string()),
            role: None,
        };
        assert_eq!(summary.marvel_id(), Some(1945));

        let bad = SummaryDto {
            resource_uri: "http://gateway.marvel.com/v1/public/series/".to_string(),
            name: None,
            role: None,
        };
        assert_eq!(bad.marvel_id(), None);
    }

    #[test]
    fn test_parse_modified_formats() {
        let parsed = parse_modified("2014-04-29T14:18:17-0400").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2014-04-29T18:18:17+00:00");

        assert!(parse_modified("2014-04-29T14:18:17-04:00").is_some());
        assert_eq!(parse_modified("-0001-11-30T00:00:00-0500"), None);
        assert_eq!(parse_modified("not a date"), None);
    }

    #[test]
    fn test_parse_event_date() {
        assert_eq!(
            parse_event_date("2008-06-02 00:00:00"),
            NaiveDate::from_ymd_opt(2008, 6, 2)
        );
        assert_eq!(parse_event_date(""), None);
    }

    #[test]
    fn test_comic_dto_decodes_relations() {
        let raw = serde_json::json!({
            "id": 42882,
            "title": "Deadpool (2012) #1",
            "issueNumber": 1,
            "pageCount": 32,
            "format": "Comic",
            "series": {
                "resourceURI": "http://gateway.marvel.com/v1/public/series/17547",
                "name": "Deadpool (2012 - 2015)"
            },
            "creators": {
                "available": 1,
                "items": [{
                    "resourceURI": "http://gateway.marvel.com/v1/public/creators/436",
                    "name": "Brian Posehn",
                    "role": "writer"
                }]
            }
        });
        let comic: ComicDto = serde_json::from_value(raw).unwrap();
        assert_eq!(comic.issue_number, Some(1.0));
        assert_eq!(comic.series.as_ref().unwrap().marvel_id(), Some(17547));
        let creators = comic.creators.unwrap();
        assert_eq!(creators.items[0].role.as_deref(), Some("writer"));
        assert_eq!(creators.items[0].marvel_id(), Some(436));
    }
}
