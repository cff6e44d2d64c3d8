//! Local filesystem cursor store.
//!
//! ## Storage Layout
//!
//! ```text
//! {path}          # { "cursor": {...}, "saved_at": "..." }
//! {path}.tmp      # transient, renamed over {path} on save
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::CrawlCursor;
use crate::storage::CursorStore;

/// Cursor as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedCursor {
    pub cursor: CrawlCursor,
    pub saved_at: DateTime<Utc>,
}

/// Cursor store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Saved cursor together with the time it was written.
    pub async fn load_saved(&self) -> Result<Option<SavedCursor>> {
        match self.read_bytes().await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<CrawlCursor>> {
        Ok(self.load_saved().await?.map(|saved| saved.cursor))
    }

    async fn save(&self, cursor: &CrawlCursor) -> Result<()> {
        let saved = SavedCursor {
            cursor: cursor.clone(),
            saved_at: Utc::now(),
        };
        self.write_bytes(&serde_json::to_vec_pretty(&saved)?).await
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::models::SearchQuery;

    #[tokio::test]
    async fn missing_file_means_start_of_collection() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::new(tmp.path().join("cursor.json"));

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_cursor_reproduces_the_same_page_request() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state/cursor.json");

        let cursor = CrawlCursor::new(json!({"updated_at": "2024-05-01T10:00:00Z", "id": 2049}));
        let before = SearchQuery::recently_updated("updated_desc", Some(cursor.clone()));
        FileCursorStore::new(&path).save(&cursor).await.unwrap();

        // A fresh store, as after a process restart.
        let loaded = FileCursorStore::new(&path).load().await.unwrap();
        let after = SearchQuery::recently_updated("updated_desc", loaded);

        assert_eq!(after, before);
        assert_eq!(after.params(), before.params());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::new(tmp.path().join("cursor.json"));

        store.save(&CrawlCursor::new(json!({"id": 1}))).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cursor.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        assert!(FileCursorStore::new(&path).load().await.is_err());
    }
}
