// Path: crates/host/src/cache.rs
//! The shared warm-instance cache.
//!
//! Compiled modules are cached under `(code_hash, gas_schedule_hash)` so a
//! schedule change can never serve an instance metered under the old costs.
//! The cache is the only mutable state shared between concurrent calls:
//! lookups take the lock briefly, inserts are single-writer.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crucible_api::engine::CompiledModule;

/// Cache key: contract code hash plus gas schedule identity.
pub type CacheKey = ([u8; 32], [u8; 32]);

/// One cached entry: the live compiled module and its serialized form.
#[derive(Clone)]
pub struct CachedModule {
    /// The compiled module, ready to instantiate.
    pub module: Arc<dyn CompiledModule>,
    /// The engine-serialized module, as saved through the blockchain hook.
    pub serialized: Vec<u8>,
}

/// An LRU of compiled modules bounded by the configured maximum.
pub struct WarmInstanceCache {
    entries: Mutex<LruCache<CacheKey, CachedModule>>,
}

impl WarmInstanceCache {
    /// A cache bounded to `capacity` live entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up a warm module, refreshing its LRU position.
    pub fn get(&self, key: &CacheKey) -> Option<CachedModule> {
        self.entries.lock().get(key).cloned()
    }

    /// Inserts a compiled module, evicting the least recently used entry
    /// when the cache is full.
    pub fn put(&self, key: CacheKey, entry: CachedModule) {
        self.entries.lock().put(key, entry);
    }

    /// Drops every cached module. Called on close, reset, gas-schedule
    /// change and feature-activation epochs.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of currently cached modules.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
