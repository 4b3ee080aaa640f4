// # Resolver Trait
//
// Defines the interface for turning a peer hostname into its current address.
//
// ## Implementations
//
// - Platform resolver: [`crate::resolver::SystemResolver`]
// - Test doubles: scripted resolvers in `tests/common`
//
// ## Usage
//
// ```rust,ignore
// use wgdyn_core::Resolver;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let resolver = /* Resolver implementation */;
//
//     let ip = resolver.resolve("peer.dyndns.example").await?;
//     println!("peer is at {ip}");
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Why a hostname could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveCause {
    /// The name does not exist or has no usable address
    NotFound,
    /// No DNS responder could be reached
    NoResponder,
    /// The lookup did not finish within its time budget
    Timeout,
    /// Anything else reported by the resolver
    Other(String),
}

impl fmt::Display for ResolveCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveCause::NotFound => f.write_str("name not found"),
            ResolveCause::NoResponder => f.write_str("no reachable DNS responder"),
            ResolveCause::Timeout => f.write_str("timed out"),
            ResolveCause::Other(msg) => f.write_str(msg),
        }
    }
}

/// A failed resolution of one hostname
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot resolve {hostname}: {cause}")]
pub struct ResolutionFailure {
    /// The hostname that failed
    pub hostname: String,
    /// What went wrong
    pub cause: ResolveCause,
}

impl ResolutionFailure {
    /// Create a resolution failure
    pub fn new(hostname: impl Into<String>, cause: ResolveCause) -> Self {
        Self {
            hostname: hostname.into(),
            cause,
        }
    }

    /// Create a timeout failure
    pub fn timeout(hostname: impl Into<String>) -> Self {
        Self::new(hostname, ResolveCause::Timeout)
    }
}

/// Outcome of resolving one hostname during a cycle
///
/// Transient: produced once per cycle per hostname and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    /// The hostname that was looked up
    pub hostname: String,
    /// The resolved address or the failure
    pub outcome: Result<IpAddr, ResolutionFailure>,
}

/// Trait for hostname resolvers
///
/// Resolvers are stateless observers: one call, one answer. They must not
/// retry, cache, or sleep; the engine owns the per-hostname timeout and
/// decides what to do with a failure.
///
/// # Independence
///
/// A failure for one hostname must not affect a concurrent call for another.
/// The engine fans calls out in parallel, so implementations must be
/// `Send + Sync` and free of shared mutable state.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a hostname to a single address
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: The address the peer should be reached at
    /// - `Err(ResolutionFailure)`: The name could not be resolved this time
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolutionFailure>;

    /// Resolver name (for logging/debugging)
    fn resolver_name(&self) -> &'static str {
        "resolver"
    }
}
