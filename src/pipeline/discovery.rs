// src/pipeline/discovery.rs

//! Sequential discovery of IDs past the highest indexed one.
//!
//! Upstream IDs grow monotonically, so new entities show up just above the
//! current maximum. A 404 is the normal signal that an ID is unused (deleted,
//! or not created yet): the loop backs off and moves on. Any other failure
//! retries the same ID.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Beatmap, BeatmapSet, Collection};
use crate::pipeline::backoff::Backoff;
use crate::pipeline::bulk::BulkIndexer;
use crate::pipeline::policy::should_reindex;
use crate::pipeline::runner::{CrawlStrategy, StepOutcome};
use crate::services::CatalogSource;
use crate::storage::{BulkSummary, DocumentIndex};

/// First ID to fetch: one past the highest indexed, or 1 on an empty index.
async fn first_unindexed(index: &dyn DocumentIndex, collection: Collection) -> Result<u64> {
    let max = index.max_id(collection).await?;
    let next = max.map_or(1, |id| id + 1);
    log::info!("Discovering {} from ID {}", collection, next);
    Ok(next)
}

/// Walks the set ID space one set at a time.
pub struct SetDiscovery {
    source: Arc<dyn CatalogSource>,
    index: Arc<dyn DocumentIndex>,
    backoff: Backoff,
    next_id: Option<u64>,
}

impl SetDiscovery {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        index: Arc<dyn DocumentIndex>,
        backoff: Backoff,
    ) -> Self {
        Self {
            source,
            index,
            backoff,
            next_id: None,
        }
    }

    /// Start at `id` instead of past the indexed maximum.
    pub fn starting_at(mut self, id: u64) -> Self {
        self.next_id = Some(id);
        self
    }

    pub fn next_id(&self) -> Option<u64> {
        self.next_id
    }

    pub fn backoff_units(&self) -> u32 {
        self.backoff.units()
    }

    fn back_off(&mut self, id: u64, context: impl fmt::Display) -> StepOutcome {
        let delay = self.backoff.next_delay();
        log::warn!("Set discovery at {}: {}; retrying in {:?}", id, context, delay);
        StepOutcome::Backoff(delay)
    }

    /// Index `set` unless an indexed copy is still fresh.
    async fn index_set(&self, set: BeatmapSet) -> Result<BulkSummary> {
        let now = Utc::now();
        let stamps = self.index.stamps(Collection::Sets, &[set.id]).await?;
        let last = stamps.get(&set.id).map(|s| s.updated_at);
        if !should_reindex(&set, last, now)? {
            log::debug!("Set {} already indexed and fresh", set.id);
            return Ok(BulkSummary::default());
        }

        let mut bulk = BulkIndexer::new(self.index.as_ref(), now);
        bulk.stage_set(set, last.is_none())?;
        bulk.flush().await
    }
}

#[async_trait]
impl CrawlStrategy for SetDiscovery {
    fn name(&self) -> &'static str {
        "set discovery"
    }

    async fn step(&mut self, shutdown: &CancellationToken) -> Result<StepOutcome> {
        let id = match self.next_id {
            Some(id) => id,
            None => match first_unindexed(self.index.as_ref(), Collection::Sets).await {
                Ok(id) => *self.next_id.insert(id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(self.back_off(0, format_args!("max ID lookup failed: {e}"))),
            },
        };

        let fetched = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(StepOutcome::Cancelled),
            result = self.source.beatmapset(id) => result,
        };

        let set = match fetched {
            Ok(set) => set,
            Err(e) if e.is_not_found() => {
                let delay = self.backoff.next_delay();
                log::debug!("Set {} not found, moving on after {:?}", id, delay);
                self.next_id = Some(id + 1);
                return Ok(StepOutcome::Backoff(delay));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.back_off(id, format_args!("fetch failed: {e}"))),
        };

        match self.index_set(set).await {
            Ok(summary) if summary.writes() > 0 => log::info!("Discovered set {}", id),
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.back_off(id, format_args!("indexing failed: {e}"))),
        }

        self.backoff.reset();
        self.next_id = Some(id + 1);
        Ok(StepOutcome::Progressed)
    }
}

/// Walks the map ID space in fixed-size batches via the batch endpoint.
pub struct MapDiscovery {
    source: Arc<dyn CatalogSource>,
    index: Arc<dyn DocumentIndex>,
    backoff: Backoff,
    batch_size: u64,
    next_id: Option<u64>,
}

impl MapDiscovery {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        index: Arc<dyn DocumentIndex>,
        backoff: Backoff,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            index,
            backoff,
            batch_size: batch_size.max(1) as u64,
            next_id: None,
        }
    }

    pub fn starting_at(mut self, id: u64) -> Self {
        self.next_id = Some(id);
        self
    }

    pub fn next_id(&self) -> Option<u64> {
        self.next_id
    }

    pub fn backoff_units(&self) -> u32 {
        self.backoff.units()
    }

    fn back_off(&mut self, id: u64, context: impl fmt::Display) -> StepOutcome {
        let delay = self.backoff.next_delay();
        log::warn!("Map discovery at {}: {}; retrying in {:?}", id, context, delay);
        StepOutcome::Backoff(delay)
    }

    async fn index_maps(&self, maps: Vec<Beatmap>) -> Result<BulkSummary> {
        let now = Utc::now();
        let ids: Vec<u64> = maps.iter().map(|m| m.id).collect();
        let stamps = self.index.stamps(Collection::Maps, &ids).await?;

        let mut bulk = BulkIndexer::new(self.index.as_ref(), now);
        for map in &maps {
            let last = stamps.get(&map.id).map(|s| s.updated_at);
            if should_reindex(map, last, now)? {
                bulk.stage(map, last.is_none())?;
            }
        }
        bulk.flush().await
    }
}

#[async_trait]
impl CrawlStrategy for MapDiscovery {
    fn name(&self) -> &'static str {
        "map discovery"
    }

    async fn step(&mut self, shutdown: &CancellationToken) -> Result<StepOutcome> {
        let start = match self.next_id {
            Some(id) => id,
            None => match first_unindexed(self.index.as_ref(), Collection::Maps).await {
                Ok(id) => *self.next_id.insert(id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(self.back_off(0, format_args!("max ID lookup failed: {e}"))),
            },
        };
        let end = start + self.batch_size;
        let ids: Vec<u64> = (start..end).collect();

        let fetched = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(StepOutcome::Cancelled),
            result = self.source.beatmaps(&ids) => result,
        };

        let maps = match fetched {
            Ok(maps) => maps,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.back_off(start, format_args!("fetch failed: {e}"))),
        };

        if maps.is_empty() {
            let delay = self.backoff.next_delay();
            log::debug!("No maps in {}..{}, moving on after {:?}", start, end, delay);
            self.next_id = Some(end);
            return Ok(StepOutcome::Backoff(delay));
        }

        let found = maps.len();
        match self.index_maps(maps).await {
            Ok(summary) => log::info!(
                "Maps {}..{}: {} found, {} written",
                start,
                end,
                found,
                summary.writes()
            ),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.back_off(start, format_args!("indexing failed: {e}"))),
        }

        self.backoff.reset();
        self.next_id = Some(end);
        Ok(StepOutcome::Progressed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::AppError;
    use crate::services::OsuClient;
    use crate::services::scripted::{ScriptedCatalog, map, set, upstream_at};
    use crate::storage::MemoryIndex;

    const UNIT: Duration = Duration::from_secs(1);

    fn sets(catalog: ScriptedCatalog) -> (SetDiscovery, Arc<ScriptedCatalog>, Arc<MemoryIndex>) {
        let catalog = Arc::new(catalog);
        let index = Arc::new(MemoryIndex::new());
        let discovery = SetDiscovery::new(catalog.clone(), index.clone(), Backoff::new(UNIT, 32));
        (discovery, catalog, index)
    }

    async fn seed(index: &MemoryIndex, set: BeatmapSet) {
        let mut bulk = BulkIndexer::new(index, Utc::now());
        bulk.stage_set(set, true).unwrap();
        bulk.flush().await.unwrap();
    }

    #[tokio::test]
    async fn gaps_back_off_and_advance_until_a_set_is_found() {
        let (mut discovery, _, index) =
            sets(ScriptedCatalog::new().with_set(set(504, "pending", &[5040, 5041])));
        seed(&index, set(500, "ranked", &[])).await;
        let token = CancellationToken::new();

        let mut delays = Vec::new();
        for _ in 501..=503 {
            match discovery.step(&token).await.unwrap() {
                StepOutcome::Backoff(delay) => delays.push(delay.as_secs()),
                other => panic!("expected backoff, got {other:?}"),
            }
        }
        assert_eq!(delays, vec![1, 2, 4]);
        assert_eq!(discovery.next_id(), Some(504));

        assert_eq!(discovery.step(&token).await.unwrap(), StepOutcome::Progressed);
        assert_eq!(discovery.next_id(), Some(505));
        assert_eq!(discovery.backoff_units(), 1);
        assert!(index.get(Collection::Sets, 504).await.unwrap().is_some());
        assert_eq!(index.len(Collection::Sets), 2);
        assert_eq!(index.len(Collection::Maps), 2);
    }

    #[tokio::test]
    async fn empty_index_starts_at_one() {
        let (mut discovery, _, _) = sets(ScriptedCatalog::new().with_set(set(1, "wip", &[])));

        discovery.step(&CancellationToken::new()).await.unwrap();
        assert_eq!(discovery.next_id(), Some(2));
    }

    #[tokio::test]
    async fn rewalking_an_indexed_range_writes_nothing() {
        let catalog = (1..=3).fold(ScriptedCatalog::new(), |c, id| {
            c.with_set(set(id, "pending", &[id * 10]))
        });
        let (discovery, _, index) = sets(catalog);
        for id in 1..=3 {
            seed(&index, set(id, "pending", &[id * 10])).await;
        }
        let writes = index.writes();
        let bulks = index.bulk_requests();

        let mut discovery = discovery.starting_at(1);
        let token = CancellationToken::new();
        for _ in 1..=3 {
            assert_eq!(discovery.step(&token).await.unwrap(), StepOutcome::Progressed);
        }
        assert_eq!(index.writes(), writes);
        assert_eq!(index.bulk_requests(), bulks);
        assert_eq!(discovery.next_id(), Some(4));
    }

    #[tokio::test]
    async fn transient_errors_retry_the_same_id() {
        let (discovery, catalog, index) =
            sets(ScriptedCatalog::new().with_set(set(9, "qualified", &[])));
        let mut discovery = discovery.starting_at(9);
        let token = CancellationToken::new();

        catalog.fail_next(500, 1);
        assert_eq!(
            discovery.step(&token).await.unwrap(),
            StepOutcome::Backoff(UNIT)
        );
        assert_eq!(discovery.next_id(), Some(9));

        index.fail_next_bulks(1);
        assert_eq!(
            discovery.step(&token).await.unwrap(),
            StepOutcome::Backoff(UNIT * 2)
        );
        assert_eq!(discovery.next_id(), Some(9));

        assert_eq!(discovery.step(&token).await.unwrap(), StepOutcome::Progressed);
        assert!(index.get(Collection::Sets, 9).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_state_is_fatal() {
        let (discovery, _, index) = sets(ScriptedCatalog::new().with_set(set(1, "frozen", &[])));
        let mut discovery = discovery.starting_at(1);

        assert!(discovery.step(&CancellationToken::new()).await.is_err());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn malformed_set_payload_is_fatal_and_keeps_the_id() {
        let server = MockServer::start().await;
        let upstream = upstream_at(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/beatmapsets/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "title": "x"})))
            .expect(1)
            .mount(&server)
            .await;

        let index = Arc::new(MemoryIndex::new());
        let mut discovery = SetDiscovery::new(
            Arc::new(OsuClient::new(upstream).unwrap()),
            index.clone(),
            Backoff::new(UNIT, 32),
        )
        .starting_at(5);

        let err = discovery.step(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
        assert!(err.is_fatal());
        assert_eq!(discovery.next_id(), Some(5));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn malformed_map_batch_is_fatal_and_keeps_the_window() {
        let server = MockServer::start().await;
        let upstream = upstream_at(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/beatmaps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "beatmaps": [{"id": 11, "beatmapset_id": 3}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let index = Arc::new(MemoryIndex::new());
        let mut discovery = MapDiscovery::new(
            Arc::new(OsuClient::new(upstream).unwrap()),
            index.clone(),
            Backoff::new(UNIT, 32),
            50,
        )
        .starting_at(1);

        let err = discovery.step(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(discovery.next_id(), Some(1));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn map_batches_advance_through_gaps() {
        let catalog = Arc::new(
            ScriptedCatalog::new()
                .with_map(map(3, 1, "pending"))
                .with_map(map(60, 2, "ranked")),
        );
        let index = Arc::new(MemoryIndex::new());
        let mut discovery =
            MapDiscovery::new(catalog.clone(), index.clone(), Backoff::new(UNIT, 32), 50);
        let token = CancellationToken::new();

        assert_eq!(discovery.step(&token).await.unwrap(), StepOutcome::Progressed);
        assert_eq!(discovery.next_id(), Some(51));
        assert_eq!(discovery.step(&token).await.unwrap(), StepOutcome::Progressed);
        assert_eq!(discovery.next_id(), Some(101));

        assert_eq!(
            discovery.step(&token).await.unwrap(),
            StepOutcome::Backoff(UNIT)
        );
        assert_eq!(discovery.next_id(), Some(151));
        assert_eq!(index.len(Collection::Maps), 2);

        // Walking the same window again writes nothing new.
        let writes = index.writes();
        let mut again = MapDiscovery::new(catalog, index.clone(), Backoff::new(UNIT, 32), 50)
            .starting_at(1);
        again.step(&token).await.unwrap();
        assert_eq!(index.writes(), writes);
    }
}
