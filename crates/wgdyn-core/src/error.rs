//! Error types for wgdyn
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for wgdyn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for wgdyn
#[derive(Error, Debug)]
pub enum Error {
    /// Reconfiguring a live WireGuard peer failed
    #[error("Endpoint apply failed on {interface}: {message}")]
    Apply {
        /// Interface the peer lives on
        interface: String,
        /// Failure description
        message: String,
    },

    /// Cache store I/O errors
    #[error("Cache store error: {0}")]
    CacheStore(String),

    /// The persisted cache exists but cannot be parsed
    #[error("Corrupt cache file {path}: {message}")]
    CorruptCache {
        /// Path of the malformed file
        path: String,
        /// Parser message
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an apply error
    pub fn apply(interface: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Apply {
            interface: interface.into(),
            message: message.into(),
        }
    }

    /// Create a cache store error
    pub fn cache_store(msg: impl Into<String>) -> Self {
        Self::CacheStore(msg.into())
    }

    /// Create a corrupt cache error
    pub fn corrupt_cache(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptCache {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a recoverable cache corruption
    pub fn is_corrupt_cache(&self) -> bool {
        matches!(self, Self::CorruptCache { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_corrupt_cache_is_recoverable() {
        assert!(Error::corrupt_cache("/var/cache/wgdyn.json", "expected value").is_corrupt_cache());
        assert!(!Error::cache_store("permission denied").is_corrupt_cache());
        assert!(!Error::config("no peers").is_corrupt_cache());
    }

    #[test]
    fn test_apply_error_names_interface() {
        let err = Error::apply("wg0", "wg exited with exit status: 1");
        assert_eq!(
            err.to_string(),
            "Endpoint apply failed on wg0: wg exited with exit status: 1"
        );
    }
}
