//! ComicsDB Common Library
//!
//! Shared utilities for the ComicsDB workspace members:
//!
//! - **Logging**: tracing subscriber setup (console/file, text/JSON)
//! - **Slugs**: URL slug derivation used by the catalog

pub mod logging;
pub mod slug;
