// src/pipeline/runner.rs

//! Drives crawl strategies until shutdown.
//!
//! A strategy performs one unit of work per [`CrawlStrategy::step`] and tells
//! the runner what to do next. The runner owns every sleep, so shutdown can
//! interrupt a backoff at any point; a step itself only stops early while it
//! is waiting on upstream, never in the middle of a flush.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Collection, CrawlerConfig, StrategyKind};
use crate::pipeline::backoff::Backoff;
use crate::pipeline::discovery::{MapDiscovery, SetDiscovery};
use crate::pipeline::sweep::SweepStrategy;
use crate::services::CatalogSource;
use crate::storage::{CursorStore, DocumentIndex};

/// What the runner should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Work was done; step again right away.
    Progressed,
    /// Sleep this long before the next step.
    Backoff(Duration),
    /// Nothing left to do in this pass.
    Exhausted,
    /// Shutdown was requested during the step.
    Cancelled,
}

/// One crawl loop, driven step by step.
#[async_trait]
pub trait CrawlStrategy: Send {
    fn name(&self) -> &'static str;

    /// Do one unit of work. Errors returned here stop the loop.
    async fn step(&mut self, shutdown: &CancellationToken) -> Result<StepOutcome>;
}

/// Run `strategy` until shutdown, exhaustion, or a fatal error.
///
/// With `restart_after` set, an exhausted strategy is stepped again after that
/// delay instead of stopping.
pub async fn run_strategy(
    strategy: &mut dyn CrawlStrategy,
    shutdown: &CancellationToken,
    restart_after: Option<Duration>,
) -> Result<()> {
    let name = strategy.name();
    log::info!("Starting {} loop", name);

    while !shutdown.is_cancelled() {
        let pause = match strategy.step(shutdown).await {
            Ok(StepOutcome::Progressed) => continue,
            Ok(StepOutcome::Backoff(delay)) => delay,
            Ok(StepOutcome::Exhausted) => match restart_after {
                Some(delay) => {
                    log::info!("{} pass complete, restarting in {:?}", name, delay);
                    delay
                }
                None => break,
            },
            Ok(StepOutcome::Cancelled) => break,
            Err(e) => {
                log::error!("{} loop stopped: {}", name, e);
                return Err(e);
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = sleep(pause) => {}
        }
    }

    log::info!("{} loop finished", name);
    Ok(())
}

/// Run several strategies concurrently.
///
/// The first fatal error cancels the others and is returned once they have
/// all stopped.
pub async fn run_all(
    strategies: Vec<(Box<dyn CrawlStrategy>, Option<Duration>)>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for (mut strategy, restart_after) in strategies {
        let shutdown = shutdown.clone();
        tasks.spawn(async move { run_strategy(strategy.as_mut(), &shutdown, restart_after).await });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(AppError::from).and_then(|r| r);
        if let Err(e) = result {
            shutdown.cancel();
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Builds crawl strategies over shared upstream, index, and cursor handles.
pub struct Crawler {
    source: Arc<dyn CatalogSource>,
    index: Arc<dyn DocumentIndex>,
    cursors: Arc<dyn CursorStore>,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        index: Arc<dyn DocumentIndex>,
        cursors: Arc<dyn CursorStore>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            source,
            index,
            cursors,
            config,
        }
    }

    /// Create both collections if missing.
    pub async fn bootstrap(&self) -> Result<()> {
        for collection in Collection::ALL {
            if self.index.ensure_collection(collection).await? {
                log::info!("Created {} collection", collection);
            }
        }
        Ok(())
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.config.backoff_unit(), self.config.max_backoff_units)
    }

    pub fn sweep(&self) -> SweepStrategy {
        SweepStrategy::new(
            Arc::clone(&self.source),
            Arc::clone(&self.index),
            Arc::clone(&self.cursors),
            self.config.sweep_sort.clone(),
            self.backoff(),
        )
    }

    pub fn discover_sets(&self, start_id: Option<u64>) -> SetDiscovery {
        let discovery =
            SetDiscovery::new(Arc::clone(&self.source), Arc::clone(&self.index), self.backoff());
        match start_id {
            Some(id) => discovery.starting_at(id),
            None => discovery,
        }
    }

    pub fn discover_maps(&self, start_id: Option<u64>) -> MapDiscovery {
        let discovery = MapDiscovery::new(
            Arc::clone(&self.source),
            Arc::clone(&self.index),
            self.backoff(),
            self.config.map_batch_size,
        );
        match start_id {
            Some(id) => discovery.starting_at(id),
            None => discovery,
        }
    }

    /// Strategy for `kind`, with its restart delay.
    pub fn strategy(&self, kind: StrategyKind) -> (Box<dyn CrawlStrategy>, Option<Duration>) {
        let strategy: Box<dyn CrawlStrategy> = match kind {
            StrategyKind::Sweep => Box::new(self.sweep()),
            StrategyKind::DiscoverSets => Box::new(self.discover_sets(None)),
            StrategyKind::DiscoverMaps => Box::new(self.discover_maps(None)),
        };
        let restart = (kind == StrategyKind::Sweep && self.config.restart_sweep)
            .then(|| Duration::from_secs(self.config.sweep_restart_delay_secs));
        (strategy, restart)
    }

    /// Bootstrap the index, then run `kinds` concurrently until shutdown.
    pub async fn run(&self, kinds: &[StrategyKind], shutdown: CancellationToken) -> Result<()> {
        if kinds.is_empty() {
            return Err(AppError::config("no crawl strategies selected"));
        }
        self.bootstrap().await?;

        let strategies = kinds.iter().map(|kind| self.strategy(*kind)).collect();
        run_all(strategies, shutdown).await
    }
}
