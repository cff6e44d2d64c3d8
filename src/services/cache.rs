//! Bounded in-memory cache in front of the index.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use crate::models::{Beatmap, BeatmapSet};

/// LRU caches for sets, maps, and map checksums.
///
/// Entries are advisory: a miss always falls back to the index, and nothing
/// here is authoritative for staleness decisions.
pub struct EntityCache {
    sets: Mutex<LruCache<u64, BeatmapSet>>,
    maps: Mutex<LruCache<u64, Beatmap>>,
    checksums: Mutex<LruCache<String, u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EntityCache {
    /// Cache holding up to `capacity` entries of each kind.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            sets: Mutex::new(LruCache::new(capacity)),
            maps: Mutex::new(LruCache::new(capacity)),
            checksums: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn set(&self, id: u64) -> Option<BeatmapSet> {
        lock(&self.sets).get(&id).cloned()
    }

    pub fn map(&self, id: u64) -> Option<Beatmap> {
        lock(&self.maps).get(&id).cloned()
    }

    pub fn map_by_checksum(&self, checksum: &str) -> Option<Beatmap> {
        let id = *lock(&self.checksums).get(checksum)?;
        self.map(id)
    }

    pub fn put_set(&self, set: BeatmapSet) {
        lock(&self.sets).put(set.id, set);
    }

    pub fn put_map(&self, map: Beatmap) {
        if let Some(checksum) = &map.checksum {
            lock(&self.checksums).put(checksum.clone(), map.id);
        }
        lock(&self.maps).put(map.id, map);
    }

    pub fn len(&self) -> usize {
        lock(&self.sets).len() + lock(&self.maps).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scripted::{map, set};

    #[test]
    fn evicts_least_recently_used() {
        let cache = EntityCache::new(2);
        cache.put_set(set(1, "pending", &[]));
        cache.put_set(set(2, "pending", &[]));

        // Touch 1 so 2 becomes the eviction candidate.
        assert!(cache.set(1).is_some());
        cache.put_set(set(3, "pending", &[]));

        assert!(cache.set(1).is_some());
        assert!(cache.set(2).is_none());
        assert!(cache.set(3).is_some());
    }

    #[test]
    fn checksum_resolves_through_the_map_cache() {
        let cache = EntityCache::new(8);
        cache.put_map(map(7, 1, "ranked"));

        assert_eq!(cache.map_by_checksum("md5-7").unwrap().id, 7);
        assert!(cache.map_by_checksum("md5-8").is_none());
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let cache = EntityCache::new(0);
        cache.put_map(map(1, 1, "ranked"));
        assert_eq!(cache.len(), 1);
    }
}
