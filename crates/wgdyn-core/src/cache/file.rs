// # File Cache Store
//
// File-based implementation of CacheStore with crash-safe writes.
//
// ## Purpose
//
// Keeps the last known address of every peer hostname across daemon
// restarts, so a restart with unchanged DNS does not touch any interface.
//
// ## Crash Safety
//
// - Atomic writes: snapshot goes to `<path>.tmp`, is fsynced, then renamed
//   over `<path>`. A crash at any point leaves the old or the new file.
// - Corruption detection: malformed JSON is reported as `CorruptCache`;
//   the engine logs it and starts empty.
// - Leftover `.tmp` files from a crash are never read and are overwritten
//   by the next snapshot.
//
// ## File Format
//
// ```json
// {
//   "office.dyndns.example": "203.0.113.7",
//   "home.dyndns.example": "2001:db8::42"
// }
// ```

use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::traits::cache_store::{AddressCache, CacheStore};

/// File-based cache store
///
/// # Example
///
/// ```rust,no_run
/// use wgdyn_core::cache::FileCacheStore;
/// use wgdyn_core::traits::CacheStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileCacheStore::new("/var/cache/wgdyn.json").await?;
///
///     let mut cache = store.load().await?;
///     cache.set("office.dyndns.example", "203.0.113.7".parse()?);
///     store.snapshot(&cache).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    /// Create a file cache store
    ///
    /// Creates the parent directory if needed. Failing to do so is a
    /// configuration error: the daemon cannot run without a cache location.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        Ok(Self { path })
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("wgdyn-cache"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_temp(&self, temp_path: &Path, json: &str) -> Result<(), Error> {
        let mut file = fs::File::create(temp_path).await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to create temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.write_all(json.as_bytes()).await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to sync temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Make the rename itself durable
    #[cfg(unix)]
    async fn sync_parent(&self) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        match fs::File::open(parent).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    tracing::debug!("Failed to sync directory {}: {}", parent.display(), e);
                }
            }
            Err(e) => tracing::debug!("Failed to open directory {}: {}", parent.display(), e),
        }
    }

    #[cfg(not(unix))]
    async fn sync_parent(&self) {}
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self) -> Result<AddressCache, Error> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Cache file does not exist yet: {}", self.path.display());
                return Ok(AddressCache::new());
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(Error::corrupt_cache(
                    self.path.display().to_string(),
                    e.to_string(),
                ));
            }
            Err(e) => {
                return Err(Error::cache_store(format!(
                    "Failed to read cache file {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let cache: AddressCache = serde_json::from_str(&content).map_err(|e| {
            Error::corrupt_cache(self.path.display().to_string(), e.to_string())
        })?;

        tracing::debug!(
            "Loaded cache from {}: {} entries",
            self.path.display(),
            cache.len()
        );
        Ok(cache)
    }

    async fn snapshot(&self, cache: &AddressCache) -> Result<(), Error> {
        let mut json = serde_json::to_string_pretty(cache)
            .map_err(|e| Error::cache_store(format!("Failed to serialize cache: {}", e)))?;
        json.push('\n');

        let temp_path = self.temp_path();
        if let Err(e) = self.write_temp(&temp_path, &json).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::cache_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            )));
        }

        self.sync_parent().await;

        tracing::trace!("Cache written to {}", self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
