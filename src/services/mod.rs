//! Service layer for the mirror.
//!
//! - Upstream catalog client (`OsuClient`) and its rate limiter
//! - Read-through lookups over cache, index and upstream (`Repository`)

mod cache;
mod osu;
mod rate_limit;
mod repository;
#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Beatmap, BeatmapSet, SearchPage, SearchQuery};

pub use cache::EntityCache;
pub use osu::{AccessToken, ApiResponse, OsuClient};
pub use rate_limit::{RateLimiter, WINDOW};
pub use repository::Repository;

/// Read access to the upstream catalog.
///
/// A missing entity is reported as a 404 request error, see
/// [`AppError::is_not_found`](crate::error::AppError::is_not_found).
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn beatmapset(&self, id: u64) -> Result<BeatmapSet>;

    async fn beatmap(&self, id: u64) -> Result<Beatmap>;

    /// Maps for every listed ID that exists; unknown IDs are left out.
    async fn beatmaps(&self, ids: &[u64]) -> Result<Vec<Beatmap>>;

    /// One page of the search listing.
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage>;
}
