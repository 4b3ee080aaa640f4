// # Gateway Probe Trait
//
// Checks whether the far side of a tunnel still answers. Used by the engine
// to re-apply an endpoint whose address did not change but whose tunnel
// appears dead (e.g. the peer's NAT mapping was reset).

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for gateway reachability probes
#[async_trait]
pub trait GatewayProbe: Send + Sync {
    /// Returns `true` if the gateway answered
    ///
    /// Probes report unreachability as `false`, never as an error: a probe
    /// that cannot run is indistinguishable from a dead tunnel.
    async fn is_reachable(&self, gateway: IpAddr) -> bool;
}

/// Probe used when gateway checking is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

#[async_trait]
impl GatewayProbe for AlwaysReachable {
    async fn is_reachable(&self, _gateway: IpAddr) -> bool {
        true
    }
}
