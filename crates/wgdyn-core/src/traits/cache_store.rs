// # Cache Store Trait
//
// Defines the interface for durable storage of the hostname -> address cache.
//
// ## Purpose
//
// The cache records the last address each peer hostname resolved to, so
// that:
// - A cycle can tell a real change from a repeat answer
// - A restart does not re-apply every endpoint
//
// ## Ownership
//
// The [`AddressCache`] value is owned by the engine. Stores only turn it
// into bytes and back: `load()` hands a fresh value to the engine,
// `snapshot()` borrows it. Stores never hold a copy between calls.
//
// ## Usage
//
// ```rust,ignore
// use wgdyn_core::CacheStore;
//
// let mut cache = store.load().await?;
// cache.set("peer.dyndns.example", "203.0.113.7".parse()?);
// store.snapshot(&cache).await?;
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Hostname -> last known address mapping
///
/// Serializes as a flat JSON object:
///
/// ```json
/// { "myhost.example.com": "192.168.0.1" }
/// ```
///
/// An absent entry means the hostname never resolved successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressCache {
    entries: BTreeMap<String, IpAddr>,

    /// Mutated since the last successful snapshot
    #[serde(skip)]
    dirty: bool,
}

impl AddressCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known address for a hostname
    pub fn get(&self, hostname: &str) -> Option<IpAddr> {
        self.entries.get(hostname).copied()
    }

    /// Record an address for a hostname
    ///
    /// Returns the previous address. The cache becomes dirty only if the
    /// stored value actually changed.
    pub fn set(&mut self, hostname: impl Into<String>, address: IpAddr) -> Option<IpAddr> {
        let previous = self.entries.insert(hostname.into(), address);
        if previous != Some(address) {
            self.dirty = true;
        }
        previous
    }

    /// Number of cached hostnames
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in hostname order
    pub fn iter(&self) -> impl Iterator<Item = (&str, IpAddr)> {
        self.entries.iter().map(|(host, ip)| (host.as_str(), *ip))
    }

    /// Whether the cache changed since the last snapshot
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the cache as persisted
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl FromIterator<(String, IpAddr)> for AddressCache {
    fn from_iter<T: IntoIterator<Item = (String, IpAddr)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            dirty: false,
        }
    }
}

/// Trait for cache store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O on its own backing location
/// - ✅ Create the backing location's parent directory
///
/// ## Forbidden Capabilities
/// - ❌ Keep a private copy of the cache (owned by the engine)
/// - ❌ Decide when to persist (owned by the engine)
/// - ❌ Spawn background tasks
///
/// ## Implementation Guidelines
///
/// - **Atomic snapshots**: a crash mid-write must leave either the old or
///   the new file, never a partial one
/// - **Corruption is recoverable**: unparsable content is reported as
///   [`crate::Error::CorruptCache`] so the engine can start empty
/// - **Missing is empty**: a missing backing file is not an error
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load the persisted cache
    ///
    /// # Returns
    ///
    /// - `Ok(AddressCache)`: The stored cache, or an empty one if none exists
    /// - `Err(Error::CorruptCache)`: The stored data is malformed
    /// - `Err(Error)`: The backing location cannot be read
    async fn load(&self) -> Result<AddressCache, crate::Error>;

    /// Atomically persist the cache
    ///
    /// Does not clear the dirty flag; the engine does that on success.
    async fn snapshot(&self, cache: &AddressCache) -> Result<(), crate::Error>;

    /// Human readable location (for logging)
    fn location(&self) -> String;
}
