//! Mirror crawler CLI
//!
//! Composition root: builds the upstream client, the document index and the
//! cursor store from configuration and hands them to the crawl loops.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use mirror_crawler::{
    config::load_config,
    error::Result,
    models::{Collection, Config, StrategyKind},
    pipeline::{Crawler, run_strategy},
    services::{EntityCache, OsuClient, Repository},
    storage::{CursorStore, DocumentIndex, ElasticIndex, FileCursorStore},
};
use tokio_util::sync::CancellationToken;

/// Beatmap catalog mirror
#[derive(Parser, Debug)]
#[command(
    name = "mirror-crawler",
    version,
    about = "Mirrors the upstream beatmap catalog into a local document index"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured crawl strategy concurrently
    Run,

    /// Walk the recently-updated listing
    Sweep {
        /// Stop after one pass instead of restarting
        #[arg(long)]
        once: bool,
    },

    /// Walk the ID space past the highest indexed entity
    Discover {
        #[arg(long, value_enum)]
        target: Target,

        /// First ID to fetch (default: highest indexed + 1)
        #[arg(long)]
        start_id: Option<u64>,
    },

    /// Look up one entity through cache, index and upstream
    Lookup {
        #[command(subcommand)]
        key: LookupKey,
    },

    /// Validate the configuration
    Validate,

    /// Show the saved cursor and indexed ID ranges
    Info,

    /// Forget the saved cursor so the next sweep starts from the top
    ResetCursor,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Target {
    Sets,
    Maps,
}

#[derive(Subcommand, Debug)]
enum LookupKey {
    /// Beatmap set by ID
    Set { id: u64 },
    /// Beatmap by ID
    Map { id: u64 },
    /// Beatmap by content checksum
    Checksum { checksum: String },
}

/// Initialize logging; `--verbose` wins over the configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel `token` on Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested, finishing in-flight work...");
        }
        trigger.cancel();
    });
    token
}

struct Handles {
    client: Arc<OsuClient>,
    index: Arc<ElasticIndex>,
    cursors: Arc<FileCursorStore>,
}

impl Handles {
    fn build(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Arc::new(OsuClient::new(config.upstream.clone())?),
            index: Arc::new(ElasticIndex::new(&config.index)?),
            cursors: Arc::new(FileCursorStore::new(&config.cursor.path)),
        })
    }

    fn crawler(&self, config: &Config) -> Crawler {
        Crawler::new(
            self.client.clone(),
            self.index.clone(),
            self.cursors.clone(),
            config.crawler.clone(),
        )
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(cli.verbose, &config.logging.level);

    if cli.config.exists() {
        log::info!("Loaded configuration from {}", cli.config.display());
    } else {
        log::warn!("No config file at {}, using defaults", cli.config.display());
    }

    match cli.command {
        Command::Run => {
            config.validate()?;
            let handles = Handles::build(&config)?;
            let crawler = handles.crawler(&config);
            crawler
                .run(&config.crawler.strategies, shutdown_on_ctrl_c())
                .await?;
        }

        Command::Sweep { once } => {
            config.validate()?;
            let handles = Handles::build(&config)?;
            let crawler = handles.crawler(&config);
            crawler.bootstrap().await?;

            let (mut sweep, restart) = crawler.strategy(StrategyKind::Sweep);
            let restart = if once { None } else { restart };
            run_strategy(sweep.as_mut(), &shutdown_on_ctrl_c(), restart).await?;
        }

        Command::Discover { target, start_id } => {
            config.validate()?;
            let handles = Handles::build(&config)?;
            let crawler = handles.crawler(&config);
            crawler.bootstrap().await?;

            let shutdown = shutdown_on_ctrl_c();
            match target {
                Target::Sets => {
                    let mut discovery = crawler.discover_sets(start_id);
                    run_strategy(&mut discovery, &shutdown, None).await?;
                }
                Target::Maps => {
                    let mut discovery = crawler.discover_maps(start_id);
                    run_strategy(&mut discovery, &shutdown, None).await?;
                }
            }
        }

        Command::Lookup { key } => {
            config.validate()?;
            let handles = Handles::build(&config)?;
            handles.crawler(&config).bootstrap().await?;
            let repository = Repository::new(
                handles.client.clone(),
                handles.index.clone(),
                EntityCache::new(config.cache.capacity),
            );

            let found = match &key {
                LookupKey::Set { id } => repository
                    .beatmapset(*id)
                    .await?
                    .map(|set| print_json(&set))
                    .transpose()?,
                LookupKey::Map { id } => repository
                    .beatmap(*id)
                    .await?
                    .map(|map| print_json(&map))
                    .transpose()?,
                LookupKey::Checksum { checksum } => repository
                    .beatmap_by_checksum(checksum)
                    .await?
                    .map(|map| print_json(&map))
                    .transpose()?,
            };
            if found.is_none() {
                log::warn!("No entity found for {:?}", key);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("All validations passed!");
        }

        Command::Info => {
            let cursors = FileCursorStore::new(&config.cursor.path);
            log::info!("Cursor file: {}", cursors.path().display());
            match cursors.load_saved().await? {
                Some(saved) => {
                    log::info!("Saved cursor: {}", saved.cursor.as_value());
                    log::info!("Saved at: {}", saved.saved_at);
                }
                None => log::info!("No saved cursor, next sweep starts from the top."),
            }

            let index = ElasticIndex::new(&config.index)?;
            for collection in Collection::ALL {
                match index.max_id(collection).await {
                    Ok(Some(max)) => log::info!(
                        "{} ({}): highest ID {}",
                        collection,
                        index.index_name(collection),
                        max
                    ),
                    Ok(None) => log::info!("{}: empty", collection),
                    Err(e) => log::warn!("{}: unavailable ({})", collection, e),
                }
            }
        }

        Command::ResetCursor => {
            let cursors = FileCursorStore::new(&config.cursor.path);
            cursors.clear().await?;
            log::info!("Cleared cursor at {}", cursors.path().display());
        }
    }

    log::info!("Done!");

    Ok(())
}
