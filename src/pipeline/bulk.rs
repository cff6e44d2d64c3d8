//! Batched writes into the two collections.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Beatmap, BeatmapSet, CatalogEntity};
use crate::storage::{BulkAction, BulkOperation, BulkSummary, DocumentIndex};

/// Stages writes for one crawl batch and flushes them as one bulk request.
///
/// Every operation of the batch carries the same timestamp, taken when the
/// indexer is created.
pub struct BulkIndexer<'a> {
    index: &'a dyn DocumentIndex,
    batch_time: DateTime<Utc>,
    operations: Vec<BulkOperation>,
}

impl<'a> BulkIndexer<'a> {
    pub fn new(index: &'a dyn DocumentIndex, batch_time: DateTime<Utc>) -> Self {
        Self {
            index,
            batch_time,
            operations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Stage one entity. New entities are created, known ones updated.
    pub fn stage<E: CatalogEntity>(&mut self, entity: &E, is_new: bool) -> Result<()> {
        let action = if is_new {
            BulkAction::Create
        } else {
            BulkAction::Upsert
        };
        self.operations.push(BulkOperation {
            collection: E::COLLECTION,
            id: entity.id(),
            action,
            data: serde_json::to_value(entity)?,
            timestamp: self.batch_time,
        });
        Ok(())
    }

    /// Stage a set and fan its maps out into the maps collection.
    ///
    /// Maps are always staged as upserts: whether each one already exists is
    /// not looked up.
    pub fn stage_set(&mut self, mut set: BeatmapSet, is_new: bool) -> Result<Vec<Beatmap>> {
        let maps = set.take_beatmaps();
        self.stage(&set, is_new)?;
        for map in &maps {
            self.stage(map, false)?;
        }
        Ok(maps)
    }

    /// Send every staged operation in one request.
    ///
    /// Staged operations are kept on failure, so the same batch can be
    /// flushed again.
    pub async fn flush(&mut self) -> Result<BulkSummary> {
        if self.operations.is_empty() {
            return Ok(BulkSummary::default());
        }

        let summary = self.index.bulk(&self.operations).await?;
        log::debug!(
            "Flushed {} operations: {} created, {} updated, {} conflicts",
            self.operations.len(),
            summary.created,
            summary.updated,
            summary.conflicts
        );
        self.operations.clear();
        Ok(summary)
    }
}
