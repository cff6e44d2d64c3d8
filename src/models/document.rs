//! Documents as persisted in the index.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two collections the mirror maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Maps,
    Sets,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Maps, Collection::Sets];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Maps => "maps",
            Collection::Sets => "sets",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record wrapping one upstream snapshot.
///
/// `created_at` is written once; `updated_at` on every write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument<T> {
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T> IndexedDocument<T> {
    /// Document written for the first time at `now`.
    pub fn new(data: T, now: DateTime<Utc>) -> Self {
        Self {
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Timestamps of an indexed document, without its payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentStamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
