//! In-memory storage backends.
//!
//! Same contracts as the Elasticsearch index and the file cursor store, for
//! tests and local runs without external services.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{Collection, CrawlCursor, DocumentStamps};
use crate::storage::{BulkAction, BulkOperation, BulkSummary, CursorStore, DocumentIndex};

type Documents = HashMap<Collection, BTreeMap<u64, Value>>;

/// Document index kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: Mutex<Documents>,
    bulk_requests: AtomicUsize,
    writes: AtomicUsize,
    failing_bulks: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bulk requests received, including rejected ones.
    pub fn bulk_requests(&self) -> usize {
        self.bulk_requests.load(Ordering::SeqCst)
    }

    /// Documents created or updated through any write path.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.lock()
            .get(&collection)
            .map(BTreeMap::len)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values().all(BTreeMap::is_empty)
    }

    /// Reject the next `count` bulk requests as the real index would on an outage.
    pub fn fail_next_bulks(&self, count: usize) {
        self.failing_bulks.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Documents> {
        // A poisoned map still holds consistent documents; each write is one insert.
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(docs: &mut Documents, op: &BulkOperation, summary: &mut BulkSummary) {
        let collection = docs.entry(op.collection).or_default();
        if let Some(existing) = collection.get_mut(&op.id) {
            match op.action {
                BulkAction::Create => summary.conflicts += 1,
                BulkAction::Upsert => {
                    existing["data"] = op.data.clone();
                    existing["updated_at"] = json!(op.timestamp);
                    summary.updated += 1;
                }
            }
            return;
        }
        collection.insert(op.id, op.new_document());
        summary.created += 1;
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn ensure_collection(&self, collection: Collection) -> Result<bool> {
        let mut docs = self.lock();
        if docs.contains_key(&collection) {
            return Ok(false);
        }
        docs.insert(collection, BTreeMap::new());
        Ok(true)
    }

    async fn get(&self, collection: Collection, id: u64) -> Result<Option<Value>> {
        Ok(self
            .lock()
            .get(&collection)
            .and_then(|c| c.get(&id))
            .cloned())
    }

    async fn create(&self, collection: Collection, id: u64, document: &Value) -> Result<bool> {
        let mut docs = self.lock();
        let docs = docs.entry(collection).or_default();
        if docs.contains_key(&id) {
            return Ok(false);
        }
        docs.insert(id, document.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn stamps(
        &self,
        collection: Collection,
        ids: &[u64],
    ) -> Result<HashMap<u64, DocumentStamps>> {
        let docs = self.lock();
        let Some(docs) = docs.get(&collection) else {
            return Ok(HashMap::new());
        };

        let mut found = HashMap::new();
        for id in ids {
            if let Some(doc) = docs.get(id) {
                let stamps: DocumentStamps = serde_json::from_value(doc.clone())?;
                found.insert(*id, stamps);
            }
        }
        Ok(found)
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkSummary> {
        self.bulk_requests.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_bulks.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_bulks.store(failing - 1, Ordering::SeqCst);
            return Err(AppError::index_write("bulk request rejected"));
        }

        let mut summary = BulkSummary::default();
        let mut docs = self.lock();
        for op in operations {
            Self::apply(&mut docs, op, &mut summary);
        }
        self.writes.fetch_add(summary.writes(), Ordering::SeqCst);
        Ok(summary)
    }

    async fn max_id(&self, collection: Collection) -> Result<Option<u64>> {
        Ok(self
            .lock()
            .get(&collection)
            .and_then(|c| c.keys().next_back().copied()))
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>> {
        let pointer = format!("/{}", field.replace('.', "/"));
        Ok(self.lock().get(&collection).and_then(|docs| {
            docs.values()
                .find(|doc| doc.pointer(&pointer).and_then(Value::as_str) == Some(value))
                .cloned()
        }))
    }
}

/// Cursor store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: Mutex<Option<CrawlCursor>>,
}

impl MemoryCursorStore {
    pub fn new(initial: Option<CrawlCursor>) -> Self {
        Self {
            cursor: Mutex::new(initial),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CrawlCursor>> {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<CrawlCursor>> {
        Ok(self.lock().clone())
    }

    async fn save(&self, cursor: &CrawlCursor) -> Result<()> {
        *self.lock() = Some(cursor.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.lock() = None;
        Ok(())
    }
}
