//! Shared image cache with explicit "unavailable" markers.
//!
//! The cache maps load keys to decoded pixels and tracks which keys are
//! requested but not yet serviced. Both structures are mutated from the
//! control thread (eviction, dedup) and from worker threads (insertion on
//! completion), so they live behind one mutex. An `Unavailable` entry is
//! distinct from an absent one: it means a decode was attempted and failed,
//! and the UI should show a placeholder instead of re-requesting forever.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use image::RgbImage;

/// Resolution class of a requested decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Low-resolution single-file thumbnail.
    Thumbnail,
    /// High-magnification pyramid decode.
    HighMagnification,
}

/// Identity of one decode task; doubles as cache key and dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadKey {
    /// Index of the specimen in the session's specimen list.
    pub specimen: usize,
    /// Flattened scan index within the specimen.
    pub scan: usize,
    /// Requested resolution tier.
    pub tier: Tier,
}

impl LoadKey {
    /// Thumbnail key for a (specimen, scan) pair.
    pub fn thumbnail(specimen: usize, scan: usize) -> Self {
        Self {
            specimen,
            scan,
            tier: Tier::Thumbnail,
        }
    }

    /// High-magnification key for a (specimen, scan) pair.
    pub fn high_magnification(specimen: usize, scan: usize) -> Self {
        Self {
            specimen,
            scan,
            tier: Tier::HighMagnification,
        }
    }
}

/// A serviced cache slot.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// Decoded pixels, shared with readers without copying.
    Loaded(Arc<RgbImage>),
    /// Decode was attempted and failed; render a placeholder.
    Unavailable,
}

impl CacheEntry {
    /// Decoded pixels, if this entry holds any.
    pub fn image(&self) -> Option<&Arc<RgbImage>> {
        match self {
            CacheEntry::Loaded(image) => Some(image),
            CacheEntry::Unavailable => None,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<LoadKey, CacheEntry>,
    requested: HashSet<LoadKey>,
}

/// Image cache shared between the control thread and the worker pool.
#[derive(Debug, Clone, Default)]
pub struct ImageCache {
    state: Arc<Mutex<CacheState>>,
}

impl ImageCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serviced entry for a key, if any.
    pub fn get(&self, key: &LoadKey) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Whether a key has been serviced (successfully or not).
    pub fn contains(&self, key: &LoadKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Store a serviced entry and clear the key's requested marker.
    pub fn insert(&self, key: LoadKey, entry: CacheEntry) {
        let mut state = self.lock();
        state.requested.remove(&key);
        state.entries.insert(key, entry);
    }

    /// Dedup check-and-set: mark a key requested unless it is already
    /// serviced or already requested. Returns whether the caller should
    /// enqueue the key.
    pub fn try_request(&self, key: LoadKey) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(&key) {
            return false;
        }
        state.requested.insert(key)
    }

    /// Whether a key is requested but not yet serviced.
    pub fn is_pending(&self, key: &LoadKey) -> bool {
        self.lock().requested.contains(key)
    }

    /// Drop entries and requested markers for specimens outside the
    /// in-range set.
    pub fn retain_specimens(&self, in_range: &HashSet<usize>) {
        let mut state = self.lock();
        state.entries.retain(|key, _| in_range.contains(&key.specimen));
        state.requested.retain(|key| in_range.contains(&key.specimen));
    }

    /// Number of serviced entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no entries have been serviced.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // a worker holding the lock cannot panic between here and release
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixels() -> Arc<RgbImage> {
        Arc::new(RgbImage::new(2, 2))
    }

    #[test]
    fn try_request_deduplicates() {
        let cache = ImageCache::new();
        let key = LoadKey::thumbnail(0, 0);
        assert!(cache.try_request(key));
        assert!(!cache.try_request(key));
        assert!(cache.is_pending(&key));
    }

    #[test]
    fn insert_clears_requested_marker() {
        let cache = ImageCache::new();
        let key = LoadKey::thumbnail(0, 0);
        assert!(cache.try_request(key));
        cache.insert(key, CacheEntry::Loaded(pixels()));
        assert!(!cache.is_pending(&key));
        // already serviced keys are not re-requested
        assert!(!cache.try_request(key));
    }

    #[test]
    fn unavailable_is_distinct_from_absent() {
        let cache = ImageCache::new();
        let key = LoadKey::thumbnail(1, 0);
        assert!(cache.get(&key).is_none());

        cache.insert(key, CacheEntry::Unavailable);
        let entry = cache.get(&key).unwrap();
        assert!(entry.image().is_none());
        assert!(cache.contains(&key));
    }

    #[test]
    fn eviction_drops_entries_and_requested_markers() {
        let cache = ImageCache::new();
        let kept = LoadKey::thumbnail(1, 0);
        let evicted = LoadKey::thumbnail(5, 0);
        let evicted_pending = LoadKey::high_magnification(5, 0);

        cache.insert(kept, CacheEntry::Loaded(pixels()));
        cache.insert(evicted, CacheEntry::Loaded(pixels()));
        assert!(cache.try_request(evicted_pending));

        cache.retain_specimens(&HashSet::from([1]));

        assert!(cache.contains(&kept));
        assert!(!cache.contains(&evicted));
        assert!(!cache.is_pending(&evicted_pending));
        // evicted keys are requestable again
        assert!(cache.try_request(evicted_pending));
    }

    #[test]
    fn high_and_low_tier_keys_are_distinct() {
        let cache = ImageCache::new();
        cache.insert(LoadKey::thumbnail(0, 0), CacheEntry::Loaded(pixels()));
        assert!(!cache.contains(&LoadKey::high_magnification(0, 0)));
    }
}
