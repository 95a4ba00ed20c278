//! File key classification
//!
//! Comic archives live in the bucket under
//! `content/{publisher}/{universe}/{year}/{title_type}/[{title}/]{issue_name}[#{number}].{ext}`.
//! One fixed regular expression splits a key into those parts; keys that do
//! not match are skipped per item, never fatal to a run.

use regex::Regex;
use serde::{Deserialize, Serialize};

const KEY_PATTERN: &str = r"(?i)^content/(?P<publisher>.+?)/(?P<universe>.+?)/(?P<year>\d+?)/(?P<title_type>.+?)/(?:(?P<title>.+?)/)?(?P<issue_name>[^#]+?(?:#(?P<number>-?[.0-9]+))?[^#]*)\.(?:cbr|cbt|cbz)$";

const EXTENSION_PATTERN: &str = r"(?i)\.cb(r|z|t)";

/// Parsed parts of a matched file key.
///
/// `title` and `number` are optional in the key layout; their absence is a
/// valid state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileKeyInfo {
    pub publisher: String,
    pub universe: String,
    pub year: i32,
    pub title_type: String,
    pub title: Option<String>,
    pub issue_name: String,
    pub number: Option<f64>,
}

impl FileKeyInfo {
    /// Natural key of the title the issue belongs to. Single-issue layouts
    /// omit the title directory, so the issue name stands in for it.
    pub fn title_path_key(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.issue_name)
    }
}

pub struct FileKeyMatcher {
    key_regex: Regex,
    extension_regex: Regex,
}

impl FileKeyMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            key_regex: Regex::new(KEY_PATTERN)?,
            extension_regex: Regex::new(EXTENSION_PATTERN)?,
        })
    }

    /// The key pattern, persisted on step records for audit.
    pub fn pattern(&self) -> &str {
        KEY_PATTERN
    }

    /// Whether a key carries a comic archive extension at all. Used to
    /// filter the bucket listing before per-key classification.
    pub fn is_comic_file(&self, key: &str) -> bool {
        self.extension_regex.is_match(key)
    }

    /// Split a key into its catalog parts; `None` when the key does not
    /// match the expected layout.
    pub fn match_key(&self, key: &str) -> Option<FileKeyInfo> {
        let caps = self.key_regex.captures(key)?;

        // The year group only admits digits, so a parse failure here is
        // overflow. Saturate so the publish date guard rejects it per item
        // instead of quietly landing on year zero.
        let year = caps["year"].parse::<i32>().unwrap_or(i32::MAX);

        // A malformatted number degrades to 0, an absent one stays None.
        let number = caps
            .name("number")
            .map(|m| m.as_str().parse::<f64>().unwrap_or(0.0));

        Some(FileKeyInfo {
            publisher: caps["publisher"].to_string(),
            universe: caps["universe"].to_string(),
            year,
            title_type: caps["title_type"].to_string(),
            title: caps.name("title").map(|m| m.as_str().to_string()),
            issue_name: caps["issue_name"].to_string(),
            number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> FileKeyMatcher {
        FileKeyMatcher::new().unwrap()
    }

    #[test]
    fn test_full_key_with_title_and_number() {
        let info = matcher()
            .match_key("content/Marvel/Earth-616/1963/Ongoing/Amazing Spider-Man/Amazing Spider-Man #1.cbz")
            .unwrap();
        assert_eq!(info.publisher, "Marvel");
        assert_eq!(info.universe, "Earth-616");
        assert_eq!(info.year, 1963);
        assert_eq!(info.title_type, "Ongoing");
        assert_eq!(info.title.as_deref(), Some("Amazing Spider-Man"));
        assert_eq!(info.issue_name, "Amazing Spider-Man #1");
        assert_eq!(info.number, Some(1.0));
        assert_eq!(info.title_path_key(), "Amazing Spider-Man");
    }

    #[test]
    fn test_key_without_title_directory() {
        let info = matcher()
            .match_key("content/Marvel/Earth-616/2005/One-shot/Secret War One-Shot.cbr")
            .unwrap();
        assert_eq!(info.title, None);
        assert_eq!(info.issue_name, "Secret War One-Shot");
        assert_eq!(info.number, None);
        assert_eq!(info.title_path_key(), "Secret War One-Shot");
    }

    #[test]
    fn test_fractional_and_negative_numbers() {
        let m = matcher();
        let info = m
            .match_key("content/Marvel/Earth-616/1998/Limited/Alpha/Alpha #1.5.cbt")
            .unwrap();
        assert_eq!(info.number, Some(1.5));

        let info = m
            .match_key("content/Marvel/Earth-616/1998/Limited/Alpha/Alpha #-1.cbz")
            .unwrap();
        assert_eq!(info.number, Some(-1.0));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let m = matcher();
        assert!(m
            .match_key("content/DC/Prime Earth/2016/Ongoing/Batman/Batman #1.CBZ")
            .is_some());
        assert!(m.is_comic_file("content/DC/x/2016/Ongoing/Batman #1.CbR"));
    }

    #[test]
    fn test_non_matching_keys() {
        let m = matcher();
        assert!(m.match_key("content/Marvel/readme.txt").is_none());
        assert!(m.match_key("archive/Marvel/Earth-616/1963/Ongoing/ASM #1.cbz").is_none());
        assert!(m.match_key("content/Marvel/Earth-616/year/Ongoing/ASM #1.cbz").is_none());
        assert!(!m.is_comic_file("content/Marvel/cover.jpg"));
    }

    #[test]
    fn test_overflowing_year_saturates() {
        let info = matcher()
            .match_key("content/Marvel/Earth-616/99999999999/Ongoing/ASM/ASM #1.cbz")
            .unwrap();
        assert_eq!(info.year, i32::MAX);
    }

    #[test]
    fn test_malformed_number_defaults_to_zero() {
        let info = matcher()
            .match_key("content/Marvel/Earth-616/1963/Ongoing/ASM/ASM #1..5.cbz")
            .unwrap();
        assert_eq!(info.number, Some(0.0));
    }
}
