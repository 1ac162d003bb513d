//! Thread-safe pixel store with byte budget management
//!
//! Tracks the total bytes of stored buffers and evicts the least recently
//! used entries when the budget is exceeded. LRU order is maintained by a
//! logical access clock on each entry, not by physical reordering.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::key::VariantKey;
use crate::pixels::PixelBuffer;

/// Byte-budgeted LRU store for decoded image variants.
///
/// All operations are thread-safe and infallible. Eviction is silent;
/// callers discover it only by a later `get` missing.
pub struct PixelCache {
    inner: Mutex<CacheInner>,
}

struct Entry {
    pixels: PixelBuffer,
    bytes: usize,
    last_access: u64,
}

struct CacheInner {
    entries: HashMap<VariantKey, Entry>,
    total_bytes: usize,
    budget: usize,
    clock: u64,
}

impl PixelCache {
    /// Create a store with the given byte budget.
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                total_bytes: 0,
                budget,
                clock: 0,
            }),
        }
    }

    /// Look up a variant, marking it most recently used on hit.
    pub fn get(&self, key: &VariantKey) -> Option<PixelBuffer> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.entries.get_mut(key)?;
        entry.last_access = clock;
        Some(entry.pixels.clone())
    }

    /// Insert or replace a variant.
    ///
    /// An entry whose `bytes` alone exceed the budget is not retained at all;
    /// resident entries are left undisturbed and the call still succeeds.
    /// Otherwise least-recently-used entries are evicted until the new entry
    /// fits within budget.
    pub fn put(&self, key: VariantKey, pixels: PixelBuffer, bytes: usize) {
        let mut inner = self.inner.lock();
        if bytes > inner.budget {
            log::debug!(
                "not caching {}: {} bytes exceeds the {} byte budget",
                key.source.display(),
                bytes,
                inner.budget
            );
            return;
        }
        inner.clock += 1;
        let clock = inner.clock;

        if let Some(old) = inner.entries.remove(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes);
        }
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
        inner.entries.insert(
            key,
            Entry {
                pixels,
                bytes,
                last_access: clock,
            },
        );

        while inner.total_bytes > inner.budget && !inner.entries.is_empty() {
            inner.evict_lru();
        }
    }

    /// Drop every cached variant of `source`, regardless of revision or size.
    /// Returns how many entries were removed.
    pub fn invalidate(&self, source: &Path) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<VariantKey> = inner
            .entries
            .keys()
            .filter(|key| key.source == source)
            .cloned()
            .collect();
        for key in &doomed {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.bytes);
            }
        }
        doomed.len()
    }

    /// Current total bytes of stored pixel data.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// The configured byte budget.
    pub fn budget(&self) -> usize {
        self.inner.lock().budget
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything and reset the access clock.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
        inner.clock = 0;
    }

    /// Snapshot for monitoring and debugging.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            budget: inner.budget,
        }
    }
}

impl CacheInner {
    fn evict_lru(&mut self) {
        let mut oldest_key = None;
        let mut oldest_time = u64::MAX;
        for (key, entry) in &self.entries {
            if entry.last_access < oldest_time {
                oldest_time = entry.last_access;
                oldest_key = Some(key.clone());
            }
        }
        if let Some(key) = oldest_key {
            if let Some(entry) = self.entries.remove(&key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
            }
        }
    }
}

impl fmt::Debug for PixelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PixelCache")
            .field("entries", &inner.entries.len())
            .field("total_bytes", &inner.total_bytes)
            .field("budget", &inner.budget)
            .finish()
    }
}

/// Store statistics snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub budget: usize,
}

impl CacheStats {
    pub fn usage_percent(&self) -> f64 {
        if self.budget == 0 {
            0.0
        } else {
            (self.total_bytes as f64 / self.budget as f64) * 100.0
        }
    }
}
