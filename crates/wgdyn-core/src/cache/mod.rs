// # Cache Store Implementations
//
// This module provides implementations of the CacheStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::config::CacheStoreConfig;
use crate::traits::CacheStore;

/// Build the cache store described by the configuration
pub async fn from_config(config: &CacheStoreConfig) -> crate::Result<Box<dyn CacheStore>> {
    match config {
        CacheStoreConfig::File { path } => Ok(Box::new(FileCacheStore::new(path).await?)),
        CacheStoreConfig::Memory => Ok(Box::new(MemoryCacheStore::new())),
    }
}
