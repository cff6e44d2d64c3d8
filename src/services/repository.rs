//! Read-through lookups: cache, then index, then upstream.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};
use crate::models::{Beatmap, BeatmapSet, CatalogEntity, Collection, IndexedDocument};
use crate::pipeline::BulkIndexer;
use crate::services::{CatalogSource, EntityCache};
use crate::storage::DocumentIndex;

/// Field holding a map's checksum in stored documents.
const CHECKSUM_FIELD: &str = "data.checksum";

/// Single-entity lookups that fill the index as a side effect.
///
/// Sets come back in their stored shape, without embedded maps.
pub struct Repository {
    source: Arc<dyn CatalogSource>,
    index: Arc<dyn DocumentIndex>,
    cache: EntityCache,
}

/// Upstream snapshot held by a stored document.
fn snapshot<T: DeserializeOwned>(document: serde_json::Value) -> Result<T> {
    let document: IndexedDocument<T> = serde_json::from_value(document)
        .map_err(|e| AppError::malformed(format!("stored document: {e}")))?;
    Ok(document.data)
}

impl Repository {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        index: Arc<dyn DocumentIndex>,
        cache: EntityCache,
    ) -> Self {
        Self {
            source,
            index,
            cache,
        }
    }

    /// Set by ID, or `None` if upstream does not know it.
    pub async fn beatmapset(&self, id: u64) -> Result<Option<BeatmapSet>> {
        if let Some(set) = self.cache.set(id) {
            return Ok(Some(set));
        }

        if let Some(document) = self.index.get(Collection::Sets, id).await? {
            let set: BeatmapSet = snapshot(document)?;
            self.cache.put_set(set.clone());
            return Ok(Some(set));
        }

        let set = match self.source.beatmapset(id).await {
            Ok(set) => set,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        set.lifecycle()?;

        let mut bulk = BulkIndexer::new(self.index.as_ref(), Utc::now());
        let mut stored = set.clone();
        let maps = stored.take_beatmaps();
        bulk.stage_set(set, true)?;
        bulk.flush().await?;

        for map in maps {
            self.cache.put_map(map);
        }
        self.cache.put_set(stored.clone());
        Ok(Some(stored))
    }

    /// Map by ID, or `None` if upstream does not know it.
    pub async fn beatmap(&self, id: u64) -> Result<Option<Beatmap>> {
        if let Some(map) = self.cache.map(id) {
            return Ok(Some(map));
        }

        if let Some(document) = self.index.get(Collection::Maps, id).await? {
            let map: Beatmap = snapshot(document)?;
            self.cache.put_map(map.clone());
            return Ok(Some(map));
        }

        let map = match self.source.beatmap(id).await {
            Ok(map) => map,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        map.lifecycle()?;

        let document = serde_json::to_value(IndexedDocument::new(&map, Utc::now()))?;
        if !self.index.create(Collection::Maps, id, &document).await? {
            log::debug!("Map {} was indexed concurrently, keeping the stored copy", id);
        }

        self.cache.put_map(map.clone());
        Ok(Some(map))
    }

    /// Map by content checksum. Only indexed maps can be found this way.
    pub async fn beatmap_by_checksum(&self, checksum: &str) -> Result<Option<Beatmap>> {
        if let Some(map) = self.cache.map_by_checksum(checksum) {
            return Ok(Some(map));
        }

        let Some(document) = self
            .index
            .find_by_field(Collection::Maps, CHECKSUM_FIELD, checksum)
            .await?
        else {
            return Ok(None);
        };

        let map: Beatmap = snapshot(document)?;
        self.cache.put_map(map.clone());
        Ok(Some(map))
    }
}
