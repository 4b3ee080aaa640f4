//! Configuration types for wgdyn
//!
//! This module defines all configuration structures used throughout the crate.
//! The on-disk form is JSON:
//!
//! ```json
//! {
//!   "peers": [
//!     {
//!       "hostname": "office.dyndns.example",
//!       "peer_key": "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=",
//!       "interface": "wg0",
//!       "port": 51820
//!     }
//!   ],
//!   "cache": { "type": "file", "path": "/var/cache/wgdyn.json" },
//!   "engine": { "poll_interval_secs": 60 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// Default WireGuard listen port
pub const DEFAULT_WG_PORT: u16 = 51820;

/// Default location of the cache file
pub const DEFAULT_CACHE_PATH: &str = "/var/cache/wgdyn.json";

/// Longest accepted cycle interval (one day)
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

/// Longest accepted per-hostname resolution timeout
pub const MAX_RESOLVE_TIMEOUT_SECS: u64 = 60;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WgDynConfig {
    /// Peers to keep in sync, in configuration order
    pub peers: Vec<PeerTarget>,

    /// Cache store configuration
    #[serde(default)]
    pub cache: CacheStoreConfig,

    /// Resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl WgDynConfig {
    /// Create a new configuration with defaults and no peers
    pub fn new() -> Self {
        Self {
            peers: Vec::new(),
            cache: CacheStoreConfig::default(),
            resolver: ResolverConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("Invalid configuration JSON: {}", e)))
    }

    /// Read a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.peers.is_empty() {
            return Err(Error::config("No peers configured"));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            peer.validate()?;
            if !seen.insert((peer.interface.as_str(), peer.peer_key.as_str())) {
                return Err(Error::config(format!(
                    "Peer {} on {} is configured more than once",
                    peer.peer_key, peer.interface
                )));
            }
        }

        self.cache.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}

impl Default for WgDynConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One WireGuard peer kept in sync with its hostname
///
/// Immutable once loaded; the set of targets is owned by the engine for the
/// process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTarget {
    /// Dynamic DNS hostname of the peer
    pub hostname: String,

    /// Peer public key (base64)
    pub peer_key: String,

    /// Local WireGuard interface
    pub interface: String,

    /// Endpoint port on the peer
    #[serde(default = "default_port")]
    pub port: u16,

    /// Tunnel-side gateway used by the reachability check
    #[serde(default)]
    pub gateway: Option<IpAddr>,

    /// Override of the engine's default resolution timeout
    #[serde(default)]
    pub resolve_timeout_secs: Option<u64>,
}

impl PeerTarget {
    /// Create a target on the default WireGuard port
    pub fn new(
        hostname: impl Into<String>,
        peer_key: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            peer_key: peer_key.into(),
            interface: interface.into(),
            port: DEFAULT_WG_PORT,
            gateway: None,
            resolve_timeout_secs: None,
        }
    }

    /// Create a target from a WireGuard `Endpoint=` value (`host:port`)
    pub fn from_endpoint(
        endpoint: &str,
        peer_key: impl Into<String>,
        interface: impl Into<String>,
    ) -> Result<Self, Error> {
        let (host, port) = split_endpoint(endpoint)?;
        Ok(Self::new(host, peer_key, interface).with_port(port))
    }

    /// Set the endpoint port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the tunnel gateway
    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set a per-target resolution timeout
    pub fn with_resolve_timeout(mut self, secs: u64) -> Self {
        self.resolve_timeout_secs = Some(secs);
        self
    }

    /// Endpoint for a resolved address
    pub fn endpoint(&self, address: IpAddr) -> SocketAddr {
        SocketAddr::new(address, self.port)
    }

    /// Per-target timeout, if overridden
    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout_secs.map(Duration::from_secs)
    }

    /// Validate this target
    pub fn validate(&self) -> Result<(), Error> {
        validate_hostname(&self.hostname)?;
        validate_peer_key(&self.peer_key)?;

        if self.interface.is_empty() {
            return Err(Error::config(format!(
                "Peer {} has an empty interface name",
                self.hostname
            )));
        }
        // IFNAMSIZ - 1
        if self.interface.len() > 15 {
            return Err(Error::config(format!(
                "Interface name too long: '{}' (max 15 chars)",
                self.interface
            )));
        }

        if self.port == 0 {
            return Err(Error::config(format!(
                "Peer {} has endpoint port 0",
                self.hostname
            )));
        }

        if let Some(secs) = self.resolve_timeout_secs
            && !(1..=MAX_RESOLVE_TIMEOUT_SECS).contains(&secs)
        {
            return Err(Error::config(format!(
                "Peer {} resolve_timeout_secs must be between 1 and {}. Got: {}",
                self.hostname, MAX_RESOLVE_TIMEOUT_SECS, secs
            )));
        }

        Ok(())
    }
}

/// Split `host:port` into its parts
///
/// A missing port yields [`DEFAULT_WG_PORT`]. Bracketed IPv6 literals
/// (`[::1]:51820`) are accepted.
pub fn split_endpoint(endpoint: &str) -> Result<(String, u16), Error> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::config("Endpoint cannot be empty"));
    }

    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::config(format!("Unterminated '[' in endpoint '{}'", endpoint)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port, endpoint)?,
            None if tail.is_empty() => DEFAULT_WG_PORT,
            None => {
                return Err(Error::config(format!("Malformed endpoint '{}'", endpoint)));
            }
        };
        return Ok((host.to_string(), port));
    }

    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            Ok((host.to_string(), parse_port(port, endpoint)?))
        }
        Some(_) => Err(Error::config(format!(
            "IPv6 endpoint '{}' must be bracketed",
            endpoint
        ))),
        None => Ok((endpoint.to_string(), DEFAULT_WG_PORT)),
    }
}

fn parse_port(port: &str, endpoint: &str) -> Result<u16, Error> {
    port.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::config(format!("Invalid port in endpoint '{}'", endpoint)))
}

/// Validate that a string is a plausible DNS hostname
///
/// Basic RFC 1035 checks; catches typos, not every invalid name.
pub fn validate_hostname(hostname: &str) -> Result<(), Error> {
    if hostname.is_empty() {
        return Err(Error::config("Hostname cannot be empty"));
    }

    if hostname.len() > 253 {
        return Err(Error::config(format!(
            "Hostname too long: {} chars (max 253). Got: {}",
            hostname.len(),
            hostname
        )));
    }

    for label in hostname.trim_end_matches('.').split('.') {
        if label.is_empty() {
            return Err(Error::config(format!(
                "Hostname has empty label: '{}'",
                hostname
            )));
        }

        if label.len() > 63 {
            return Err(Error::config(format!(
                "Hostname label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }

        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::config(format!(
                "Hostname label contains invalid characters. Label: '{}'",
                label
            )));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::config(format!(
                "Hostname label cannot start or end with hyphen. Label: '{}'",
                label
            )));
        }
    }

    Ok(())
}

/// Validate a WireGuard public key (32 bytes, standard base64)
pub fn validate_peer_key(key: &str) -> Result<(), Error> {
    let well_formed = key.len() == 44
        && key.ends_with('=')
        && !key[..43].contains('=')
        && key[..43]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/');

    if well_formed {
        Ok(())
    } else {
        Err(Error::config(format!(
            "'{}' is not a WireGuard public key (expected 44 base64 chars)",
            key
        )))
    }
}

fn default_port() -> u16 {
    DEFAULT_WG_PORT
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheStoreConfig {
    /// JSON file with atomic replace
    File {
        /// Path to the cache file
        path: PathBuf,
    },

    /// In-memory cache (not persistent)
    Memory,
}

impl CacheStoreConfig {
    /// Validate the cache store configuration
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            CacheStoreConfig::File { path } if path.as_os_str().is_empty() => {
                Err(Error::config("Cache file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        CacheStoreConfig::File {
            path: PathBuf::from(DEFAULT_CACHE_PATH),
        }
    }
}

/// Which address family a lookup should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Either; IPv4 preferred when both exist
    #[default]
    Any,
    /// IPv4 only
    Ipv4,
    /// IPv6 only
    Ipv6,
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(AddressFamily::Any),
            "ipv4" | "v4" | "4" => Ok(AddressFamily::Ipv4),
            "ipv6" | "v6" | "6" => Ok(AddressFamily::Ipv6),
            other => Err(Error::config(format!(
                "Unknown address family '{}'. Valid: any, ipv4, ipv6",
                other
            ))),
        }
    }
}

/// Resolver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Address family to pick from lookup answers
    #[serde(default)]
    pub address_family: AddressFamily,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between reconciliation cycles (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Default per-hostname resolution timeout (in seconds)
    ///
    /// Bounds how long one unreachable DNS provider can stall a cycle.
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,

    /// Minimum interval between automatic cache snapshots (in seconds)
    ///
    /// A snapshot is only written when the cache changed. Set to 0 to
    /// persist after every cycle that changed something. Forced flushes
    /// and shutdown always persist.
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    /// Whether a forced flush also runs a reconciliation cycle
    ///
    /// When false, a forced flush only persists the in-memory cache.
    #[serde(default = "default_flush_reconciles")]
    pub flush_reconciles: bool,

    /// Re-apply endpoints whose tunnel gateway stopped answering
    #[serde(default)]
    pub check_gateway: bool,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs) {
            return Err(Error::config(format!(
                "poll_interval_secs must be between 1 and {}. Got: {}",
                MAX_POLL_INTERVAL_SECS, self.poll_interval_secs
            )));
        }
        if !(1..=MAX_RESOLVE_TIMEOUT_SECS).contains(&self.resolve_timeout_secs) {
            return Err(Error::config(format!(
                "resolve_timeout_secs must be between 1 and {}. Got: {}",
                MAX_RESOLVE_TIMEOUT_SECS, self.resolve_timeout_secs
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }

    /// Cycle interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Default resolution timeout
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /// Auto-persist interval
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
            persist_interval_secs: default_persist_interval_secs(),
            flush_reconciles: default_flush_reconciles(),
            check_gateway: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_resolve_timeout_secs() -> u64 {
    5
}

fn default_persist_interval_secs() -> u64 {
    300
}

fn default_flush_reconciles() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1000
}
