// src/pipeline/sweep.rs

//! Paginated sweep over the recently-updated listing.
//!
//! Each step fetches one page at the current cursor, filters it through the
//! staleness policy, flushes the survivors in one bulk request, then
//! checkpoints the next cursor. A failed page is retried from the same
//! cursor after a backoff; the cursor never moves past an unwritten page.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{BeatmapSet, Collection, CrawlCursor, SearchQuery};
use crate::pipeline::backoff::Backoff;
use crate::pipeline::bulk::BulkIndexer;
use crate::pipeline::policy::should_reindex;
use crate::pipeline::runner::{CrawlStrategy, StepOutcome};
use crate::services::CatalogSource;
use crate::storage::{BulkSummary, CursorStore, DocumentIndex};

/// What happened to one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub written: BulkSummary,
}

pub struct SweepStrategy {
    source: Arc<dyn CatalogSource>,
    index: Arc<dyn DocumentIndex>,
    cursors: Arc<dyn CursorStore>,
    sort: String,
    backoff: Backoff,
    cursor: Option<CrawlCursor>,
    resumed: bool,
}

impl SweepStrategy {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        index: Arc<dyn DocumentIndex>,
        cursors: Arc<dyn CursorStore>,
        sort: impl Into<String>,
        backoff: Backoff,
    ) -> Self {
        Self {
            source,
            index,
            cursors,
            sort: sort.into(),
            backoff,
            cursor: None,
            resumed: false,
        }
    }

    /// Cursor of the next page to fetch.
    pub fn cursor(&self) -> Option<&CrawlCursor> {
        self.cursor.as_ref()
    }

    pub fn backoff_units(&self) -> u32 {
        self.backoff.units()
    }

    fn back_off(&mut self, context: impl fmt::Display) -> StepOutcome {
        let delay = self.backoff.next_delay();
        log::warn!("Sweep: {}; retrying same cursor in {:?}", context, delay);
        StepOutcome::Backoff(delay)
    }

    /// Stage every stale or unknown set of the page and flush once.
    async fn index_page(&self, sets: Vec<BeatmapSet>, now: DateTime<Utc>) -> Result<PageSummary> {
        let ids: Vec<u64> = sets.iter().map(|s| s.id).collect();
        let stamps = self.index.stamps(Collection::Sets, &ids).await?;

        let mut summary = PageSummary {
            fetched: sets.len(),
            ..PageSummary::default()
        };
        let mut bulk = BulkIndexer::new(self.index.as_ref(), now);

        for set in sets {
            let last = stamps.get(&set.id).map(|s| s.updated_at);
            if !should_reindex(&set, last, now)? {
                log::debug!("Skipping set {} ({}), still fresh", set.id, set.status);
                summary.skipped += 1;
                continue;
            }
            bulk.stage_set(set, last.is_none())?;
        }

        summary.written = bulk.flush().await?;
        Ok(summary)
    }
}

#[async_trait]
impl CrawlStrategy for SweepStrategy {
    fn name(&self) -> &'static str {
        "sweep"
    }

    async fn step(&mut self, shutdown: &CancellationToken) -> Result<StepOutcome> {
        if !self.resumed {
            self.cursor = self.cursors.load().await?;
            self.resumed = true;
            match &self.cursor {
                Some(cursor) => log::info!("Resuming sweep at cursor {}", cursor.as_value()),
                None => log::info!("Starting sweep from the top of the listing"),
            }
        }

        let query = SearchQuery::recently_updated(self.sort.clone(), self.cursor.clone());
        let fetched = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(StepOutcome::Cancelled),
            result = self.source.search(&query) => result,
        };

        let page = match fetched {
            Ok(page) => page,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.back_off(format_args!("search failed: {e}"))),
        };
        if let Some(message) = &page.error {
            return Ok(self.back_off(format_args!("search page reported '{message}'")));
        }

        let next = page.next_cursor().cloned();
        let summary = match self.index_page(page.beatmapsets, Utc::now()).await {
            Ok(summary) => summary,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.back_off(format_args!("indexing page failed: {e}"))),
        };
        log::info!(
            "Sweep page: {} sets, {} skipped, {} created, {} updated",
            summary.fetched,
            summary.skipped,
            summary.written.created,
            summary.written.updated
        );

        let Some(next) = next else {
            if let Err(e) = self.cursors.clear().await {
                return Ok(self.back_off(format_args!("clearing cursor failed: {e}")));
            }
            self.backoff.reset();
            self.cursor = None;
            log::info!("Sweep reached the end of the listing");
            return Ok(StepOutcome::Exhausted);
        };

        if let Err(e) = self.cursors.save(&next).await {
            return Ok(self.back_off(format_args!("saving cursor failed: {e}")));
        }
        self.backoff.reset();
        self.cursor = Some(next);
        Ok(StepOutcome::Progressed)
    }
}
