// # WireGuard Endpoint Applier
//
// This crate reconfigures live WireGuard peers through the `wg` tool and
// probes tunnel gateways through `ping`.
//
// ## Scope
//
// Appliers are single-shot: one `wg set` invocation per request. Retries,
// scheduling and state are owned by the `ReconcileEngine`; an applier only
// reports whether the command succeeded.
//
// ## Commands
//
// - Apply: `wg set <interface> peer <public-key> endpoint <address>:<port>`
//   (IPv6 addresses bracketed)
// - Probe: `ping -c 3 -W 3 <gateway>`
//
// ## Dry-Run Mode
//
// With `dry_run` set, the applier logs the command it would run and
// reports success without touching the interface.

use async_trait::async_trait;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use wgdyn_core::traits::{ApplyRequest, EndpointApplier, GatewayProbe};
use wgdyn_core::{Error, Result};

/// Default `wg` binary, looked up on `PATH`
pub const DEFAULT_WG_BINARY: &str = "wg";

/// Default `ping` binary, looked up on `PATH`
pub const DEFAULT_PING_BINARY: &str = "ping";

/// Upper bound for one `wg set` invocation
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint applier backed by `wg set`
#[derive(Debug, Clone)]
pub struct WgCommandApplier {
    /// Path (or name) of the wg tool
    wg_binary: String,

    /// Kill the command if it has not finished by then
    timeout: Duration,

    /// Log instead of running
    dry_run: bool,
}

impl WgCommandApplier {
    /// Create an applier running the given wg binary
    pub fn new(wg_binary: impl Into<String>, dry_run: bool) -> Self {
        Self {
            wg_binary: wg_binary.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            dry_run,
        }
    }

    /// Applier using `wg` from `PATH`
    pub fn new_live() -> Self {
        Self::new(DEFAULT_WG_BINARY, false)
    }

    /// Applier that only logs what it would do
    pub fn new_dry_run() -> Self {
        Self::new(DEFAULT_WG_BINARY, true)
    }

    /// Override the command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether this applier is in dry-run mode
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// The wg binary this applier runs
    pub fn wg_binary(&self) -> &str {
        &self.wg_binary
    }
}

impl Default for WgCommandApplier {
    fn default() -> Self {
        Self::new_live()
    }
}

/// Arguments passed to `wg` for a request
///
/// `SocketAddr`'s display form already brackets IPv6 addresses, which is
/// the form `wg` expects.
pub fn wg_set_args(request: &ApplyRequest) -> Vec<String> {
    vec![
        "set".to_string(),
        request.interface.clone(),
        "peer".to_string(),
        request.peer_key.clone(),
        "endpoint".to_string(),
        request.endpoint.to_string(),
    ]
}

#[async_trait]
impl EndpointApplier for WgCommandApplier {
    async fn apply(&self, request: &ApplyRequest) -> Result<()> {
        let args = wg_set_args(request);

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would run: {} {}", self.wg_binary, args.join(" "));
            return Ok(());
        }

        tracing::debug!("Running {} {}", self.wg_binary, args.join(" "));

        let output = Command::new(&self.wg_binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::apply(
                    &request.interface,
                    format!("failed to run {}: {}", self.wg_binary, e),
                ));
            }
            Err(_) => {
                return Err(Error::apply(
                    &request.interface,
                    format!("{} did not finish within {:?}", self.wg_binary, self.timeout),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.wg_binary, output.status)
            } else {
                format!("{} exited with {}: {}", self.wg_binary, output.status, stderr)
            };
            return Err(Error::apply(&request.interface, message));
        }

        Ok(())
    }

    fn applier_name(&self) -> &'static str {
        "wg"
    }
}

/// Gateway probe backed by `ping`
///
/// Sends three echo requests with a three second wait each; the gateway
/// counts as reachable when `ping` exits successfully.
#[derive(Debug, Clone)]
pub struct PingProbe {
    ping_binary: String,
}

impl PingProbe {
    /// Create a probe running the given ping binary
    pub fn new(ping_binary: impl Into<String>) -> Self {
        Self {
            ping_binary: ping_binary.into(),
        }
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PING_BINARY)
    }
}

/// Arguments passed to `ping` for a gateway
pub fn ping_args(gateway: IpAddr) -> Vec<String> {
    vec![
        "-c".to_string(),
        "3".to_string(),
        "-W".to_string(),
        "3".to_string(),
        gateway.to_string(),
    ]
}

#[async_trait]
impl GatewayProbe for PingProbe {
    async fn is_reachable(&self, gateway: IpAddr) -> bool {
        let status = Command::new(&self.ping_binary)
            .args(ping_args(gateway))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) => {
                tracing::debug!("{} {} exited with {}", self.ping_binary, gateway, status);
                status.success()
            }
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", self.ping_binary, e);
                false
            }
        }
    }
}
