// # Memory Cache Store
//
// In-memory implementation of CacheStore.
//
// ## Purpose
//
// Holds the most recent snapshot in memory only. Useful for tests, dry runs,
// and deployments that accept one re-apply of every peer after a restart.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - First cycle after a restart treats every hostname as new (applies all)

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::cache_store::{AddressCache, CacheStore};

/// In-memory cache store
///
/// Clones share the same storage, so a test can keep a handle and inspect
/// what the engine persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    stored: Arc<RwLock<AddressCache>>,
    snapshots: Arc<AtomicUsize>,
}

impl MemoryCacheStore {
    /// Create an empty memory cache store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a snapshot
    pub fn with_cache(cache: AddressCache) -> Self {
        let mut cache = cache;
        cache.mark_clean();
        Self {
            stored: Arc::new(RwLock::new(cache)),
            snapshots: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The most recently persisted cache
    pub async fn stored(&self) -> AddressCache {
        self.stored.read().await.clone()
    }

    /// How many snapshots were taken
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self) -> Result<AddressCache, Error> {
        Ok(self.stored.read().await.clone())
    }

    async fn snapshot(&self, cache: &AddressCache) -> Result<(), Error> {
        let mut persisted = cache.clone();
        persisted.mark_clean();
        *self.stored.write().await = persisted;
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
