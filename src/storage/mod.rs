//! Storage abstractions for the mirror.
//!
//! Two kinds of persistence back the crawler:
//! - the document index holding one collection of sets and one of maps
//! - the cursor store checkpointing sweep progress
//!
//! ## Document layout
//!
//! ```text
//! beatmapsets/_doc/{id}   { "data": {set without maps}, "created_at", "updated_at" }
//! beatmaps/_doc/{id}      { "data": {map},              "created_at", "updated_at" }
//! ```

pub mod elastic;
pub mod local;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::error::Result;
use crate::models::{Collection, CrawlCursor, DocumentStamps};

// Re-export for convenience
pub use elastic::ElasticIndex;
pub use local::FileCursorStore;
pub use memory::{MemoryCursorStore, MemoryIndex};

/// How a staged document is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    /// First write. Rejected by the index if the document already exists.
    Create,
    /// Replace `data`, refresh `updated_at`, keep `created_at`.
    /// Creates the document if it is missing.
    Upsert,
}

/// One staged write against the index.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub collection: Collection,
    pub id: u64,
    pub action: BulkAction,
    pub data: Value,
    /// Batch time, used as `updated_at` and as `created_at` for new documents
    pub timestamp: DateTime<Utc>,
}

impl BulkOperation {
    /// Full document for a first write.
    pub fn new_document(&self) -> Value {
        json!({
            "data": self.data,
            "created_at": self.timestamp,
            "updated_at": self.timestamp,
        })
    }
}

/// Outcome of one bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub created: usize,
    pub updated: usize,
    /// Creates rejected because the document already existed
    pub conflicts: usize,
}

impl BulkSummary {
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }
}

/// Document index holding the two mirror collections.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Create the collection if absent. Returns whether it was created.
    async fn ensure_collection(&self, collection: Collection) -> Result<bool>;

    /// Full stored document (`{data, created_at, updated_at}`).
    async fn get(&self, collection: Collection, id: u64) -> Result<Option<Value>>;

    /// Write a new document. Returns `false`, writing nothing, if one exists.
    async fn create(&self, collection: Collection, id: u64, document: &Value) -> Result<bool>;

    /// Timestamps of every listed document that exists, in one round trip.
    async fn stamps(
        &self,
        collection: Collection,
        ids: &[u64],
    ) -> Result<HashMap<u64, DocumentStamps>>;

    /// Apply every operation in one request.
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkSummary>;

    /// Highest `data.id` in the collection.
    async fn max_id(&self, collection: Collection) -> Result<Option<u64>>;

    /// First document whose `field` equals `value`.
    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>>;
}

/// Persistence for the sweep's pagination cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Saved cursor, or `None` to start from the beginning.
    async fn load(&self) -> Result<Option<CrawlCursor>>;

    async fn save(&self, cursor: &CrawlCursor) -> Result<()>;

    /// Forget the cursor so the next sweep starts fresh.
    async fn clear(&self) -> Result<()>;
}
