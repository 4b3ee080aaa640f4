//! Platform resolver
//!
//! Resolves peer hostnames through the operating system's resolver
//! (`getaddrinfo` via [`tokio::net::lookup_host`]), the same path `wg` itself
//! uses when it is handed a hostname.

use async_trait::async_trait;
use std::io;
use std::net::IpAddr;

use crate::config::AddressFamily;
use crate::traits::resolver::{ResolutionFailure, ResolveCause, Resolver};

/// Resolver backed by the system's name service
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    family: AddressFamily,
}

impl SystemResolver {
    /// Create a resolver returning addresses of the given family
    pub fn new(family: AddressFamily) -> Self {
        Self { family }
    }

    /// Address family this resolver selects
    pub fn family(&self) -> AddressFamily {
        self.family
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolutionFailure> {
        // Port is required by the API and ignored
        let answers = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| ResolutionFailure::new(hostname, classify_lookup_error(&e)))?
            .map(|addr| addr.ip());

        pick_address(answers, self.family)
            .ok_or_else(|| ResolutionFailure::new(hostname, ResolveCause::NotFound))
    }

    fn resolver_name(&self) -> &'static str {
        "system"
    }
}

/// Pick one address from a lookup answer
///
/// `Any` prefers the first IPv4 answer and falls back to the first IPv6 one.
pub fn pick_address(answers: impl IntoIterator<Item = IpAddr>, family: AddressFamily) -> Option<IpAddr> {
    let mut first_v6 = None;
    for ip in answers {
        match (family, ip) {
            (AddressFamily::Any | AddressFamily::Ipv4, IpAddr::V4(_)) => return Some(ip),
            (AddressFamily::Ipv6, IpAddr::V6(_)) => return Some(ip),
            (AddressFamily::Any, IpAddr::V6(_)) if first_v6.is_none() => first_v6 = Some(ip),
            _ => {}
        }
    }
    first_v6
}

/// Map a `getaddrinfo` failure onto a resolution cause
///
/// The platform only exposes these as message text (`EAI_*` strings).
fn classify_lookup_error(err: &io::Error) -> ResolveCause {
    if err.kind() == io::ErrorKind::TimedOut {
        return ResolveCause::Timeout;
    }

    let msg = err.to_string().to_lowercase();
    if msg.contains("not known")
        || msg.contains("no address associated")
        || msg.contains("nodename nor servname")
        || msg.contains("no such host")
    {
        ResolveCause::NotFound
    } else if msg.contains("temporary failure")
        || msg.contains("try again")
        || msg.contains("server failure")
    {
        ResolveCause::NoResponder
    } else {
        ResolveCause::Other(err.to_string())
    }
}
