//! Marvel API client
//!
//! Signs each request with the timestamp+hash scheme the API requires and
//! maps the fixed status-code table onto [`MarvelError`]. One call fetches
//! one page; the paging loop lives in the sync job.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::{debug, instrument};

use crate::config::MarvelConfig;

use super::models::{Envelope, Page};
use super::{MarvelEntityKind, MarvelError};

pub struct MarvelClient {
    http: reqwest::Client,
    config: MarvelConfig,
}

impl MarvelClient {
    pub fn new(config: MarvelConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Request signature: `hash = md5(ts + private_key + public_key)`.
    fn auth_params(&self, ts: &str) -> [(String, String); 3] {
        let digest = md5::compute(
            format!("{}{}{}", ts, self.config.private_key, self.config.public_key).as_bytes(),
        );
        [
            ("apikey".to_string(), self.config.public_key.clone()),
            ("ts".to_string(), ts.to_string()),
            ("hash".to_string(), format!("{digest:x}")),
        ]
    }

    fn entity_url(&self, entity: MarvelEntityKind) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{}/{}", base, entity.api_path())
    }

    /// Fetch one page of entities modified since the watermark.
    #[instrument(skip(self))]
    pub async fn get_page(
        &self,
        entity: MarvelEntityKind,
        offset: u32,
        limit: u32,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Page, MarvelError> {
        let ts = Utc::now().timestamp().to_string();
        let mut params: Vec<(String, String)> = vec![
            ("offset".to_string(), offset.to_string()),
            ("limit".to_string(), limit.to_string()),
            ("orderBy".to_string(), "modified".to_string()),
        ];
        if let Some(since) = modified_since {
            params.push(("modifiedSince".to_string(), since.to_rfc3339()));
        }
        params.extend(self.auth_params(&ts));

        let response = self
            .http
            .get(self.entity_url(entity))
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let envelope: Envelope = serde_json::from_slice(&response.bytes().await?)?;
                debug!(
                    entity = %entity,
                    offset = envelope.data.offset,
                    count = envelope.data.count,
                    total = envelope.data.total,
                    "Fetched page"
                );
                Ok(envelope.data)
            },
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(MarvelError::Auth(error_message(&body)))
            },
            StatusCode::CONFLICT => {
                let body = response.text().await.unwrap_or_default();
                Err(MarvelError::Param(error_message(&body)))
            },
            StatusCode::TOO_MANY_REQUESTS => Err(MarvelError::RateLimit),
            other => Err(MarvelError::Unexpected(other.as_u16())),
        }
    }
}

/// Error responses carry `{code, message}` or `{code, status}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("status"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> MarvelConfig {
        MarvelConfig {
            base_url,
            public_key: "pub".to_string(),
            private_key: "priv".to_string(),
            page_limit: 100,
            timeout_secs: 5,
        }
    }

    fn page_body(offset: u32, count: u32, total: u32) -> serde_json::Value {
        serde_json::json!({
            "code": 200,
            "status": "Ok",
            "data": {
                "offset": offset,
                "limit": 100,
                "total": total,
                "count": count,
                "results": (0..count).map(|i| serde_json::json!({"id": offset + i})).collect::<Vec<_>>()
            }
        })
    }

    #[tokio::test]
    async fn test_get_page_sends_auth_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/characters"))
            .and(query_param("apikey", "pub"))
            .and(query_param("offset", "0"))
            .and(query_param("limit", "100"))
            .and(query_param("orderBy", "modified"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(0, 1, 1)))
            .expect(1)
            .mount(&server)
            .await;

        let client = MarvelClient::new(config(server.uri())).unwrap();
        let page = client
            .get_page(MarvelEntityKind::Character, 0, 100, None)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.results.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_dedicated_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comics"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = MarvelClient::new(config(server.uri())).unwrap();
        let err = client
            .get_page(MarvelEntityKind::Comic, 0, 100, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarvelError::RateLimit));
    }

    #[tokio::test]
    async fn test_auth_error_carries_api_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/series"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "code": "InvalidCredentials",
                "message": "The passed API key is invalid."
            })))
            .mount(&server)
            .await;

        let client = MarvelClient::new(config(server.uri())).unwrap();
        let err = client
            .get_page(MarvelEntityKind::Series, 0, 100, None)
            .await
            .unwrap_err();
        match err {
            MarvelError::Auth(message) => assert_eq!(message, "The passed API key is invalid."),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_auth_hash_is_stable() {
        let client = MarvelClient::new(config("http://localhost".to_string())).unwrap();
        let params = client.auth_params("1");
        // md5("1" + "priv" + "pub")
        assert_eq!(params[2].0, "hash");
        assert_eq!(
            params[2].1,
            format!("{:x}", md5::compute(b"1privpub"))
        );
    }
}
