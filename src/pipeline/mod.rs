//! Crawl pipeline: fetch, filter, write, checkpoint.
//!
//! - `policy`: staleness decision per entity
//! - `bulk`: batched writes into both collections
//! - `sweep`: cursor-driven walk of the recently-updated listing
//! - `discovery`: sequential walk of the ID space
//! - `runner`: the loop driving strategies until shutdown

pub mod backoff;
pub mod bulk;
pub mod discovery;
pub mod policy;
pub mod runner;
pub mod sweep;

pub use backoff::Backoff;
pub use bulk::BulkIndexer;
pub use discovery::{MapDiscovery, SetDiscovery};
pub use policy::{is_stale, should_reindex};
pub use runner::{CrawlStrategy, Crawler, StepOutcome, run_all, run_strategy};
pub use sweep::{PageSummary, SweepStrategy};
