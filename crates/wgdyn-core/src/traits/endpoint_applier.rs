// # Endpoint Applier Trait
//
// Defines the interface for pointing a live WireGuard peer at a new address.
//
// ## Implementations
//
// - `wg` command line tool: `wgdyn-applier-wg` crate
//
// ## Usage
//
// ```rust,ignore
// use wgdyn_core::{ApplyRequest, EndpointApplier};
//
// let request = ApplyRequest::new("wg0", "base64-public-key", "203.0.113.7:51820".parse()?);
// applier.apply(&request).await?;
// ```

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

/// A single endpoint reconfiguration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    /// WireGuard interface name (e.g. "wg0")
    pub interface: String,
    /// Peer public key, base64 as shown by `wg show`
    pub peer_key: String,
    /// The new endpoint
    pub endpoint: SocketAddr,
}

impl ApplyRequest {
    /// Create a new apply request
    pub fn new(
        interface: impl Into<String>,
        peer_key: impl Into<String>,
        endpoint: SocketAddr,
    ) -> Self {
        Self {
            interface: interface.into(),
            peer_key: peer_key.into(),
            endpoint,
        }
    }
}

impl fmt::Display for ApplyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} peer {} -> {}", self.interface, self.peer_key, self.endpoint)
    }
}

/// Trait for endpoint applier implementations
///
/// Appliers are single-shot: they run one reconfiguration and report the
/// result synchronously. They must not retry or remember anything between
/// calls. Retrying a failed apply is the engine's job (the target stays
/// pending until an apply succeeds).
#[async_trait]
pub trait EndpointApplier: Send + Sync {
    /// Reconfigure the peer's endpoint on the live interface
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The interface now uses `request.endpoint` for the peer
    /// - `Err(Error)`: The change was not applied
    async fn apply(&self, request: &ApplyRequest) -> Result<(), crate::Error>;

    /// Applier name (for logging/debugging)
    fn applier_name(&self) -> &'static str;
}
