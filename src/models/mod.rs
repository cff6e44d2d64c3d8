// src/models/mod.rs

//! Domain models for the mirror crawler.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod beatmap;
mod config;
mod document;
mod search;
mod status;

// Re-export all public types
pub use beatmap::{Beatmap, BeatmapSet, CatalogEntity};
pub use config::{
    CacheConfig, Config, CrawlerConfig, CursorConfig, IndexConfig, LoggingConfig, StrategyKind,
    UpstreamConfig,
};
pub use document::{Collection, DocumentStamps, IndexedDocument};
pub use search::{CrawlCursor, SearchPage, SearchQuery};
pub use status::LifecycleState;
