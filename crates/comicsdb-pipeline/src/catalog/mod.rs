//! Local comics catalog
//!
//! The catalog hierarchy is Publisher -> Universe -> Title -> Issue, with
//! creators, characters and events attached through link tables. All writes
//! go through [`CatalogStore`].

mod store;

pub use store::{CatalogStore, GetOrCreate, TouchedRows};
