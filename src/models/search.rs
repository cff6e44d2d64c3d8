//! Upstream search pages and their pagination cursor.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::BeatmapSet;

/// Opaque pagination token returned by the upstream search endpoint.
///
/// Persisted as-is and sent back as base64 of its compact JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrawlCursor(Value);

impl CrawlCursor {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// An empty object carries no position and means "start".
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Encode as the upstream `cursor_string` parameter.
    pub fn to_cursor_string(&self) -> String {
        STANDARD.encode(self.0.to_string())
    }

    /// Decode an upstream `cursor_string`.
    pub fn from_cursor_string(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| AppError::validation(format!("invalid cursor string: {e}")))?;
        Ok(Self(serde_json::from_slice(&bytes)?))
    }
}

/// Parameters of one upstream search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Sort order, e.g. `updated_desc`
    pub sort: String,
    /// Status section filter; `any` covers every state
    pub section: String,
    pub include_nsfw: bool,
    pub cursor: Option<CrawlCursor>,
}

impl SearchQuery {
    /// Query over the whole catalog, newest updates first.
    pub fn recently_updated(sort: impl Into<String>, cursor: Option<CrawlCursor>) -> Self {
        Self {
            sort: sort.into(),
            section: "any".to_string(),
            include_nsfw: true,
            cursor,
        }
    }

    /// Query-string pairs as sent upstream.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", String::new()),
            ("s", self.section.clone()),
            ("nsfw", self.include_nsfw.to_string()),
            ("sort", self.sort.clone()),
        ];
        if let Some(cursor) = self.cursor.as_ref().filter(|c| !c.is_empty()) {
            params.push(("cursor_string", cursor.to_cursor_string()));
        }
        params
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub beatmapsets: Vec<BeatmapSet>,

    /// Cursor for the next page; `None` once the listing is exhausted
    #[serde(default)]
    pub cursor: Option<CrawlCursor>,

    /// Error message reported in-band by the upstream
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub total: Option<u64>,
}

impl SearchPage {
    /// Next cursor, treating an empty cursor object as exhaustion.
    pub fn next_cursor(&self) -> Option<&CrawlCursor> {
        self.cursor.as_ref().filter(|c| !c.is_empty())
    }
}
