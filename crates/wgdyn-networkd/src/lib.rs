// # systemd-networkd Peer Discovery
//
// This crate builds wgdyn peer targets from a systemd-networkd configuration
// directory (usually `/etc/systemd/network`).
//
// ## What is discovered
//
// - Every `*.netdev` with `[NetDev] Kind=wireguard` is a candidate interface
//   (`[NetDev] Name=`).
// - Each `[WireGuardPeer]` section with both `Endpoint=` and `PublicKey=`
//   becomes one target. Peers without an endpoint are servers' clients and
//   are skipped.
// - Endpoints whose host is already an IP literal are skipped: there is
//   nothing to resolve.
// - The gateway is the first `[Route] Gateway=` found in a `*.network` file
//   whose `[Match] Name=` lists the interface.
//
// ## Parsing
//
// The INI dialect is the subset networkd uses: `[Section]` headers,
// `Key=Value` lines, `#`/`;` comments. Sections may repeat.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use wgdyn_core::config::{PeerTarget, split_endpoint};
use wgdyn_core::{Error, Result};

/// Default systemd-networkd configuration directory
pub const DEFAULT_NETWORK_DIR: &str = "/etc/systemd/network";

/// One `[Section]` of a unit file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    entries: HashMap<String, String>,
}

impl Section {
    /// Value of `key` (the last assignment wins)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// A parsed unit file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFile {
    sections: Vec<Section>,
}

impl UnitFile {
    /// Parse unit file text
    ///
    /// Lines outside any section and lines without `=` are ignored.
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push(Section {
                    name: name.trim().to_string(),
                    entries: HashMap::new(),
                });
                continue;
            }

            let Some(section) = sections.last_mut() else {
                continue;
            };
            if let Some((key, value)) = line.split_once('=') {
                section
                    .entries
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Self { sections }
    }

    /// All sections called `name`, in file order
    pub fn sections<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Section> {
        self.sections.iter().filter(move |s| s.name == name)
    }

    /// Value of `key` in the last `[name]` section that sets it
    pub fn get(&self, name: &str, key: &str) -> Option<&str> {
        self.sections(name).filter_map(|s| s.get(key)).last()
    }
}

/// Discover peer targets from a networkd configuration directory
///
/// Unreadable or malformed files are logged and skipped. Only a missing or
/// unreadable directory is an error.
pub fn discover_targets(dir: impl AsRef<Path>) -> Result<Vec<PeerTarget>> {
    let dir = dir.as_ref();

    let netdevs = unit_files(dir, "netdev")?;
    let networks: Vec<UnitFile> = unit_files(dir, "network")?
        .iter()
        .filter_map(|path| read_unit(path))
        .collect();

    let mut targets = Vec::new();
    for path in &netdevs {
        let Some(netdev) = read_unit(path) else {
            continue;
        };
        let found = targets_from_netdev(&netdev, &networks);
        if found.is_empty() {
            tracing::debug!("{}: no WireGuard client peers", path.display());
        }
        targets.extend(found);
    }

    tracing::info!(
        "Discovered {} WireGuard peer(s) in {}",
        targets.len(),
        dir.display()
    );
    Ok(targets)
}

/// Targets described by one `.netdev` file
pub fn targets_from_netdev(netdev: &UnitFile, networks: &[UnitFile]) -> Vec<PeerTarget> {
    if netdev.get("NetDev", "Kind") != Some("wireguard") {
        return Vec::new();
    }
    let Some(interface) = netdev.get("NetDev", "Name") else {
        tracing::warn!("WireGuard netdev without Name=, skipping");
        return Vec::new();
    };

    let gateway = find_gateway(interface, networks);
    let mut targets = Vec::new();

    for peer in netdev.sections("WireGuardPeer") {
        let (Some(endpoint), Some(peer_key)) = (peer.get("Endpoint"), peer.get("PublicKey"))
        else {
            continue;
        };

        match split_endpoint(endpoint) {
            Ok((host, _)) if host.parse::<IpAddr>().is_ok() => {
                tracing::debug!("{}: endpoint {} is a literal address, skipping", interface, endpoint);
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("{}: {}", interface, e);
                continue;
            }
        }

        let target = match PeerTarget::from_endpoint(endpoint, peer_key, interface) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!("{}: {}", interface, e);
                continue;
            }
        };
        let target = match gateway {
            Some(gateway) => target.with_gateway(gateway),
            None => target,
        };

        if let Err(e) = target.validate() {
            tracing::warn!("{}: {}, skipping", interface, e);
            continue;
        }
        targets.push(target);
    }

    targets
}

/// First `[Route] Gateway=` of a `.network` matching `interface`
pub fn find_gateway(interface: &str, networks: &[UnitFile]) -> Option<IpAddr> {
    networks
        .iter()
        .filter(|network| {
            network
                .get("Match", "Name")
                .is_some_and(|names| names.split_whitespace().any(|name| name == interface))
        })
        .flat_map(|network| network.sections("Route"))
        .filter_map(|route| route.get("Gateway"))
        .find_map(|gateway| match gateway.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!("{}: ignoring non-literal gateway '{}'", interface, gateway);
                None
            }
        })
}

/// Files in `dir` with the given extension, sorted by name
fn unit_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::config(format!("Cannot read network directory {}: {}", dir.display(), e))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect();
    paths.sort();
    Ok(paths)
}

fn read_unit(path: &Path) -> Option<UnitFile> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(UnitFile::parse(&text)),
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn client_netdev(name: &str, endpoint: &str) -> String {
        format!(
            "[NetDev]\nName={name}\nKind=wireguard\n\n\
             [WireGuard]\nPrivateKeyFile=/etc/systemd/network/{name}.key\n\n\
             [WireGuardPeer]\nPublicKey={KEY}\nEndpoint={endpoint}\nAllowedIPs=10.9.0.0/24\n"
        )
    }

    fn write(dir: &Path, name: &str, text: &str) {
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_parse_sections_and_comments() {
        let unit = UnitFile::parse(
            "# comment\n; other comment\n[Match]\nName = wg0\n\n[Route]\nGateway=10.9.0.1\nGateway=10.9.0.2\n",
        );

        assert_eq!(unit.get("Match", "Name"), Some("wg0"));
        assert_eq!(unit.get("Route", "Gateway"), Some("10.9.0.2"), "last assignment wins");
        assert_eq!(unit.get("Route", "Destination"), None);
        assert_eq!(unit.get("Network", "Address"), None);
    }

    #[test]
    fn test_parse_repeated_sections() {
        let unit = UnitFile::parse("[WireGuardPeer]\nPublicKey=a\n[WireGuardPeer]\nPublicKey=b\n");
        let keys: Vec<_> = unit
            .sections("WireGuardPeer")
            .filter_map(|s| s.get("PublicKey"))
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_discovers_client_with_gateway() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "50-wg0.netdev", &client_netdev("wg0", "office.dyn.example:51821"));
        write(
            dir.path(),
            "50-wg0.network",
            "[Match]\nName=wg0\n\n[Network]\nAddress=10.9.0.2/24\n\n[Route]\nGateway=10.9.0.1\n",
        );

        let targets = discover_targets(dir.path()).unwrap();

        assert_eq!(targets.len(), 1);
        let target = &targets[0];
        assert_eq!(target.hostname, "office.dyn.example");
        assert_eq!(target.port, 51821);
        assert_eq!(target.interface, "wg0");
        assert_eq!(target.peer_key, KEY);
        assert_eq!(target.gateway, Some("10.9.0.1".parse().unwrap()));
    }

    #[test]
    fn test_default_port_and_no_gateway() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "wg1.netdev", &client_netdev("wg1", "home.dyn.example"));

        let targets = discover_targets(dir.path()).unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].port, 51820);
        assert_eq!(targets[0].gateway, None);
    }

    #[test]
    fn test_skips_non_wireguard_and_servers() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "br0.netdev", "[NetDev]\nName=br0\nKind=bridge\n");
        write(
            dir.path(),
            "wg-server.netdev",
            &format!("[NetDev]\nName=wg9\nKind=wireguard\n\n[WireGuardPeer]\nPublicKey={KEY}\n"),
        );
        write(dir.path(), "notes.txt", "[NetDev]\nKind=wireguard\n");

        assert!(discover_targets(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_skips_literal_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "wg0.netdev", &client_netdev("wg0", "192.0.2.10:51820"));
        write(dir.path(), "wg1.netdev", &client_netdev("wg1", "[2001:db8::1]:51820"));

        assert!(discover_targets(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_gateway_from_matching_network_only() {
        let networks = vec![
            UnitFile::parse("[Match]\nName=wg1\n[Route]\nGateway=10.1.0.1\n"),
            UnitFile::parse("[Match]\nName=eth0 wg0\n[Route]\nDestination=10.0.0.0/8\n[Route]\nGateway=10.9.0.1\n"),
        ];

        assert_eq!(find_gateway("wg0", &networks), Some("10.9.0.1".parse().unwrap()));
        assert_eq!(find_gateway("wg2", &networks), None);
    }

    #[test]
    fn test_invalid_key_is_skipped() {
        let netdev = UnitFile::parse(
            "[NetDev]\nName=wg0\nKind=wireguard\n[WireGuardPeer]\nPublicKey=short\nEndpoint=a.example:1\n",
        );
        assert!(targets_from_netdev(&netdev, &[]).is_empty());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_targets(dir.path().join("missing"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
