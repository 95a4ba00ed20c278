//! Cloud bucket ingestion
//!
//! Walks the comic archives stored in the bucket, classifies each key and
//! materializes the catalog hierarchy from it.

pub mod archive;
pub mod job;
pub mod matcher;

pub use job::CloudFilesJob;
pub use matcher::{FileKeyInfo, FileKeyMatcher};
