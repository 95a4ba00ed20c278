//! Marvel API mirror
//!
//! Fetches entities from the public Marvel API into local mirror tables and
//! keeps per-entity `modified` watermarks so subsequent runs are
//! incremental.

use serde::{Deserialize, Serialize};

pub mod client;
pub mod models;
pub mod store;
pub mod sync;

pub use client::MarvelClient;
pub use store::MarvelStore;
pub use sync::MarvelSyncJob;

/// Entity kinds served by the API, in the fixed order the sync job
/// processes them: relations resolved while syncing comics can then
/// reference rows synced earlier in the same run.
pub const SYNC_ORDER: [MarvelEntityKind; 5] = [
    MarvelEntityKind::Creator,
    MarvelEntityKind::Character,
    MarvelEntityKind::Event,
    MarvelEntityKind::Series,
    MarvelEntityKind::Comic,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarvelEntityKind {
    Comic,
    Character,
    Creator,
    Event,
    Series,
}

impl MarvelEntityKind {
    /// Path segment under the API base URL.
    pub fn api_path(&self) -> &'static str {
        match self {
            MarvelEntityKind::Comic => "comics",
            MarvelEntityKind::Character => "characters",
            MarvelEntityKind::Creator => "creators",
            MarvelEntityKind::Event => "events",
            MarvelEntityKind::Series => "series",
        }
    }

    /// Stable code used in the shared image/url/candidate tables.
    pub fn code(&self) -> &'static str {
        match self {
            MarvelEntityKind::Comic => "comic",
            MarvelEntityKind::Character => "character",
            MarvelEntityKind::Creator => "creator",
            MarvelEntityKind::Event => "event",
            MarvelEntityKind::Series => "series",
        }
    }

    /// Mirror table holding this kind.
    pub fn table(&self) -> &'static str {
        match self {
            MarvelEntityKind::Comic => "marvel_comics",
            MarvelEntityKind::Character => "marvel_characters",
            MarvelEntityKind::Creator => "marvel_creators",
            MarvelEntityKind::Event => "marvel_events",
            MarvelEntityKind::Series => "marvel_series",
        }
    }
}

impl std::fmt::Display for MarvelEntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// API client failure modes, mapped from the fixed status-code table.
#[derive(Debug, thiserror::Error)]
pub enum MarvelError {
    #[error("Invalid credentials: {0}")]
    Auth(String),

    #[error("Parameter error: {0}")]
    Param(String),

    #[error("API rate limit reached")]
    RateLimit,

    #[error("Unexpected API status: {0}")]
    Unexpected(u16),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Could not parse API response: {0}")]
    Decode(#[from] serde_json::Error),
}
