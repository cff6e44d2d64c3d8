//! Catalog entities: beatmaps and their parent sets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{Collection, LifecycleState};

/// Common view over the two kinds of catalog entity.
pub trait CatalogEntity: Serialize {
    /// Collection the entity is indexed into.
    const COLLECTION: Collection;

    fn id(&self) -> u64;

    /// Raw upstream status string.
    fn status(&self) -> &str;

    /// Parsed lifecycle state. Fails for unrecognized values.
    fn lifecycle(&self) -> Result<LifecycleState> {
        self.status().parse()
    }
}

/// A single playable difficulty.
///
/// Only the fields the crawler reasons about are typed; everything else the
/// upstream sends is kept in `extra` and written back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Beatmap {
    pub id: u64,

    /// Parent set. Filled from the set when nested maps omit it.
    #[serde(default)]
    pub beatmapset_id: u64,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Difficulty name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// MD5 of the beatmap file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogEntity for Beatmap {
    const COLLECTION: Collection = Collection::Maps;

    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> &str {
        &self.status
    }
}

/// A set of beatmaps sharing one song.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeatmapSet {
    pub id: u64,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,

    /// Child maps as delivered upstream. Never stored on the set document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub beatmaps: Vec<Beatmap>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BeatmapSet {
    /// Detach the child maps, linking each one back to this set.
    pub fn take_beatmaps(&mut self) -> Vec<Beatmap> {
        let mut beatmaps = std::mem::take(&mut self.beatmaps);
        for beatmap in &mut beatmaps {
            beatmap.beatmapset_id = self.id;
        }
        beatmaps
    }
}

impl CatalogEntity for BeatmapSet {
    const COLLECTION: Collection = Collection::Sets;

    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> &str {
        &self.status
    }
}
