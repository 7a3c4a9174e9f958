// 🧊 Resource Cache Lifecycle - keyed, lazily built, single-flight
//
// Heavy reference structures (ledger indexes) are built at most once per
// key. Concurrent first callers block on the same slot and all receive the
// same finished Arc. Invalidation swaps in a fresh slot; callers holding
// the old Arc keep using it until they drop it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, ValuationError};

/// Builds the value for one cache key
pub type Loader<V> = Arc<dyn Fn() -> V + Send + Sync>;

struct Slot<V> {
    cell: OnceLock<Arc<V>>,
}

impl<V> Slot<V> {
    fn empty() -> Arc<Self> {
        Arc::new(Slot { cell: OnceLock::new() })
    }
}

/// Registry of lazily-built, process-wide resources
pub struct ResourceCache<V> {
    loaders: RwLock<HashMap<String, Loader<V>>>,
    slots: Mutex<HashMap<String, Arc<Slot<V>>>>,
}

impl<V: Send + Sync> ResourceCache<V> {
    pub fn new() -> Self {
        ResourceCache {
            loaders: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the loader for a key. Does not load.
    pub fn register<F>(&self, key: &str, loader: F)
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        let mut loaders = self.loaders.write().unwrap_or_else(|e| e.into_inner());
        loaders.insert(key.to_string(), Arc::new(loader));
    }

    pub fn is_registered(&self, key: &str) -> bool {
        let loaders = self.loaders.read().unwrap_or_else(|e| e.into_inner());
        loaders.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let loaders = self.loaders.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = loaders.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether the key currently holds a built value
    pub fn is_loaded(&self, key: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).is_some_and(|slot| slot.cell.get().is_some())
    }

    /// Get the value for a key, building it on first access.
    ///
    /// Only one thread runs the loader; the others wait for it.
    pub fn get(&self, key: &str) -> Result<Arc<V>> {
        let loader = {
            let loaders = self.loaders.read().unwrap_or_else(|e| e.into_inner());
            loaders
                .get(key)
                .cloned()
                .ok_or_else(|| ValuationError::Config(format!("no resource registered for key '{}'", key)))?
        };

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.to_string()).or_insert_with(Slot::empty).clone()
        };

        let value = slot.cell.get_or_init(|| {
            let started = Instant::now();
            let value = Arc::new(loader());
            info!(key, elapsed_ms = started.elapsed().as_millis() as u64, "resource built");
            value
        });

        Ok(Arc::clone(value))
    }

    /// Pre-populate a key outside the request path
    pub fn warm(&self, key: &str) -> Result<()> {
        self.get(key).map(|_| ())
    }

    /// Force the next access to rebuild. Returns true if a value was dropped.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let had_value = slots
            .remove(key)
            .is_some_and(|slot| slot.cell.get().is_some());
        info!(key, had_value, "resource invalidated");
        had_value
    }
}

impl<V: Send + Sync> Default for ResourceCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PER-PARCEL SIZE CACHE
// ============================================================================

/// Resolved living-area sizes, keyed by canonical PARID (process lifetime).
///
/// Writers for the same parcel are idempotent: a parcel's size does not
/// change, so whichever write lands last is equivalent to the first.
pub struct SizeCache {
    sizes: Arc<RwLock<HashMap<String, u32>>>,
}

impl SizeCache {
    pub fn new() -> Self {
        SizeCache {
            sizes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, parcel_id: &str) -> Option<u32> {
        let sizes = self.sizes.read().unwrap_or_else(|e| e.into_inner());
        sizes.get(parcel_id).copied()
    }

    pub fn insert(&self, parcel_id: &str, size_sqft: u32) {
        let mut sizes = self.sizes.write().unwrap_or_else(|e| e.into_inner());
        sizes.insert(parcel_id.to_string(), size_sqft);
        debug!(parcel_id, size_sqft, "size cached");
    }

    pub fn extend(&self, resolved: impl IntoIterator<Item = (String, u32)>) {
        let mut sizes = self.sizes.write().unwrap_or_else(|e| e.into_inner());
        sizes.extend(resolved);
    }

    pub fn len(&self) -> usize {
        let sizes = self.sizes.read().unwrap_or_else(|e| e.into_inner());
        sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SizeCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
