// # wgdynd - WireGuard Dynamic Endpoint Daemon
//
// The wgdynd daemon is a thin integration layer around wgdyn-core. It is
// responsible for:
// 1. Reading configuration from environment variables (and an optional JSON file)
// 2. Discovering peers from systemd-networkd when no peer list is given
// 3. Initializing the runtime and the reconciliation engine
// 4. Mapping signals onto the engine's control surface
//
// All reconciliation logic lives in wgdyn-core.
//
// ## Configuration
//
// ### Peers
// - `WGDYN_CONFIG`: Path to a JSON configuration file
// - `WGDYN_NETDEV_DIR`: systemd-networkd directory (default: /etc/systemd/network)
// - `WGDYN_DISCOVER`: Also discover peers when `WGDYN_CONFIG` is set (default: false)
//
// ### Cache
// - `WGDYN_CACHE_PATH`: Cache file (default: /var/cache/wgdyn.json)
//
// ### Engine
// - `WGDYN_POLL_INTERVAL_SECS`: Cycle interval, 1-86400 (default: 60)
// - `WGDYN_RESOLVE_TIMEOUT_SECS`: Per-hostname lookup timeout, 1-60 (default: 5)
// - `WGDYN_PERSIST_INTERVAL_SECS`: Auto-persist interval, 0 = every change (default: 300)
// - `WGDYN_FLUSH_RECONCILES`: SIGUSR1 also reconciles (default: true)
// - `WGDYN_CHECK_GATEWAY`: Ping tunnel gateways (default: false)
// - `WGDYN_ADDRESS_FAMILY`: any, ipv4, ipv6 (default: any)
//
// ### Tools
// - `WGDYN_WG_BINARY`: wg tool (default: wg)
// - `WGDYN_MODE`: Set to `dry-run` to log `wg set` instead of running it
//
// ### Logging
// - `WGDYN_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// Environment variables override values from the configuration file.
//
// ## Signals
//
// - `SIGUSR1`: Force a cache flush
// - `SIGTERM` / `SIGINT`: Finish the current cycle, flush, exit
//
// ## Example
//
// ```bash
// export WGDYN_CACHE_PATH=/var/cache/wgdyn.json
// export WGDYN_CHECK_GATEWAY=true
//
// wgdynd
// ```

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use wgdyn_applier_wg::{PingProbe, WgCommandApplier};
use wgdyn_core::config::{MAX_POLL_INTERVAL_SECS, MAX_RESOLVE_TIMEOUT_SECS};
use wgdyn_core::{
    AddressFamily, CacheStoreConfig, EngineEvent, FlushHandle, FlushRequest, ReconcileEngine,
    SystemResolver, WgDynConfig,
};

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Default systemd-networkd directory
const DEFAULT_NETDEV_DIR: &str = "/etc/systemd/network";

/// How long the engine may take to stop after a shutdown signal
///
/// Matches systemd's default `TimeoutStopSec`.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(90);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WgDynExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (e.g. the final snapshot failed)
    RuntimeError = 2,
}

impl From<WgDynExitCode> for ExitCode {
    fn from(code: WgDynExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon settings read from the environment
#[derive(Debug, Clone)]
struct Settings {
    config_path: Option<PathBuf>,
    netdev_dir: PathBuf,
    discover: bool,
    cache_path: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    resolve_timeout_secs: Option<u64>,
    persist_interval_secs: Option<u64>,
    flush_reconciles: Option<bool>,
    check_gateway: Option<bool>,
    address_family: Option<AddressFamily>,
    wg_binary: String,
    dry_run: bool,
    log_level: String,
}

impl Settings {
    /// Load settings from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through a variable lookup
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            config_path: var("WGDYN_CONFIG").map(PathBuf::from),
            netdev_dir: var("WGDYN_NETDEV_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_NETDEV_DIR)),
            discover: parse_var(&var, "WGDYN_DISCOVER", parse_bool)?.unwrap_or(false),
            cache_path: var("WGDYN_CACHE_PATH").map(PathBuf::from),
            poll_interval_secs: parse_var(&var, "WGDYN_POLL_INTERVAL_SECS", parse_secs)?,
            resolve_timeout_secs: parse_var(&var, "WGDYN_RESOLVE_TIMEOUT_SECS", parse_secs)?,
            persist_interval_secs: parse_var(&var, "WGDYN_PERSIST_INTERVAL_SECS", parse_secs)?,
            flush_reconciles: parse_var(&var, "WGDYN_FLUSH_RECONCILES", parse_bool)?,
            check_gateway: parse_var(&var, "WGDYN_CHECK_GATEWAY", parse_bool)?,
            address_family: parse_var(&var, "WGDYN_ADDRESS_FAMILY", |v| {
                v.parse::<AddressFamily>().map_err(|e| e.to_string())
            })?,
            wg_binary: var("WGDYN_WG_BINARY")
                .unwrap_or_else(|| wgdyn_applier_wg::DEFAULT_WG_BINARY.to_string()),
            dry_run: var("WGDYN_MODE").is_some_and(|mode| mode.eq_ignore_ascii_case("dry-run")),
            log_level: var("WGDYN_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the settings
    ///
    /// Checks numeric ranges and enumerations. Peer and engine invariants
    /// are checked by `WgDynConfig::validate` once the configuration is
    /// assembled.
    fn validate(&self) -> Result<()> {
        if let Some(interval) = self.poll_interval_secs
            && !(1..=MAX_POLL_INTERVAL_SECS).contains(&interval)
        {
            anyhow::bail!(
                "WGDYN_POLL_INTERVAL_SECS must be between 1 and {} seconds. Got: {}",
                MAX_POLL_INTERVAL_SECS,
                interval
            );
        }

        if let Some(timeout) = self.resolve_timeout_secs
            && !(1..=MAX_RESOLVE_TIMEOUT_SECS).contains(&timeout)
        {
            anyhow::bail!(
                "WGDYN_RESOLVE_TIMEOUT_SECS must be between 1 and {} seconds. Got: {}",
                MAX_RESOLVE_TIMEOUT_SECS,
                timeout
            );
        }

        if self.wg_binary.trim().is_empty() {
            anyhow::bail!("WGDYN_WG_BINARY cannot be empty");
        }

        if self.config_path.is_none() && !cfg!(feature = "networkd") {
            anyhow::bail!(
                "WGDYN_CONFIG is required (built without systemd-networkd discovery). \
                Set it via: export WGDYN_CONFIG=/etc/wgdyn.json"
            );
        }

        if self.discover && !cfg!(feature = "networkd") {
            anyhow::bail!("WGDYN_DISCOVER=true requires the networkd feature");
        }

        log_level(&self.log_level)?;

        Ok(())
    }

    /// Assemble the engine configuration
    ///
    /// File values first, then discovered peers, then environment overrides.
    fn build_config(&self) -> Result<WgDynConfig> {
        let mut config = match &self.config_path {
            Some(path) => WgDynConfig::from_file(path)?,
            None => WgDynConfig::new(),
        };

        if self.config_path.is_none() || self.discover {
            self.merge_discovered(&mut config)?;
        }

        if let Some(path) = &self.cache_path {
            config.cache = CacheStoreConfig::File { path: path.clone() };
        }
        if let Some(family) = self.address_family {
            config.resolver.address_family = family;
        }

        let engine = &mut config.engine;
        if let Some(secs) = self.poll_interval_secs {
            engine.poll_interval_secs = secs;
        }
        if let Some(secs) = self.resolve_timeout_secs {
            engine.resolve_timeout_secs = secs;
        }
        if let Some(secs) = self.persist_interval_secs {
            engine.persist_interval_secs = secs;
        }
        if let Some(flag) = self.flush_reconciles {
            engine.flush_reconciles = flag;
        }
        if let Some(flag) = self.check_gateway {
            engine.check_gateway = flag;
        }

        config.validate()?;
        Ok(config)
    }

    /// Append networkd peers not already configured
    #[cfg(feature = "networkd")]
    fn merge_discovered(&self, config: &mut WgDynConfig) -> Result<()> {
        let discovered = wgdyn_networkd::discover_targets(&self.netdev_dir)?;

        for target in discovered {
            let known = config
                .peers
                .iter()
                .any(|p| p.interface == target.interface && p.peer_key == target.peer_key);
            if known {
                debug!(
                    "Peer {} on {} already configured, ignoring discovered entry",
                    target.peer_key, target.interface
                );
                continue;
            }
            config.peers.push(target);
        }

        Ok(())
    }

    #[cfg(not(feature = "networkd"))]
    fn merge_discovered(&self, _config: &mut WgDynConfig) -> Result<()> {
        anyhow::bail!("Peer discovery requires the networkd feature")
    }
}

/// Parse an optional variable, naming it in the error
fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> std::result::Result<T, String>,
) -> Result<Option<T>> {
    match var(key) {
        Some(value) => parse(value.trim())
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        None => Ok(None),
    }
}

fn parse_secs(value: &str) -> std::result::Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("expected a number of seconds, got '{}'", value))
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("expected true or false, got '{}'", value)),
    }
}

fn log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "WGDYN_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    // Load settings from environment
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return WgDynExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return WgDynExitCode::ConfigError.into();
    }

    // Initialize tracing
    let level = log_level(&settings.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return WgDynExitCode::ConfigError.into();
    }

    info!("Starting wgdynd daemon");

    let config = match settings.build_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return WgDynExitCode::ConfigError.into();
        }
    };
    info!("Configuration loaded: {} peer(s)", config.peers.len());

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return WgDynExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let (engine, events) = match start_engine(&settings, config).await {
            Ok(started) => started,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return WgDynExitCode::ConfigError;
            }
        };

        match run_daemon(engine, events).await {
            Ok(()) => WgDynExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                WgDynExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Build the engine and its collaborators
///
/// Fails when the cache location is unusable; a corrupt cache file is not
/// an error.
async fn start_engine(
    settings: &Settings,
    config: WgDynConfig,
) -> Result<(ReconcileEngine, mpsc::Receiver<EngineEvent>)> {
    let store = wgdyn_core::cache::from_config(&config.cache)
        .await
        .context("Cannot open cache store")?;
    let resolver = SystemResolver::new(config.resolver.address_family);

    let applier = WgCommandApplier::new(settings.wg_binary.clone(), settings.dry_run);
    if applier.is_dry_run() {
        warn!("Running in DRY-RUN mode - peer endpoints will not be changed");
    }

    let check_gateway = config.engine.check_gateway;
    let (engine, events) =
        ReconcileEngine::new(config, store, Box::new(resolver), Box::new(applier)).await?;

    let engine = if check_gateway {
        info!("Gateway checking enabled");
        engine.with_gateway_probe(Box::new(PingProbe::default()))
    } else {
        engine
    };

    Ok((engine, events))
}

/// Run the engine until a shutdown signal arrives
async fn run_daemon(engine: ReconcileEngine, events: mpsc::Receiver<EngineEvent>) -> Result<()> {
    let mut shutdown_signals = ShutdownSignals::install()?;

    let flush_task = spawn_flush_listener(engine.flush_handle())?;
    let event_task = tokio::spawn(log_events(ReceiverStream::new(events)));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut engine_task = tokio::spawn(engine.run_with_shutdown(Some(shutdown_rx)));

    let outcome = tokio::select! {
        signal = shutdown_signals.recv() => {
            info!("Received shutdown signal: {}", signal);
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut engine_task).await {
                Ok(joined) => joined,
                Err(_) => {
                    engine_task.abort();
                    Ok(Err(wgdyn_core::Error::Other(format!(
                        "Shutdown timeout after {:?}",
                        SHUTDOWN_TIMEOUT
                    ))))
                }
            }
        }
        joined = &mut engine_task => joined,
    };

    // The flush listener holds an event sender; stop it so the logger drains
    flush_task.abort();
    let _ = flush_task.await;
    let _ = event_task.await;

    match outcome {
        Ok(Ok(())) => {
            info!("Shutting down daemon");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(join_error) => Err(anyhow::anyhow!("Engine task failed: {}", join_error)),
    }
}

/// Log engine events that the engine itself does not already report
async fn log_events(mut events: ReceiverStream<EngineEvent>) {
    while let Some(event) = events.next().await {
        match event {
            EngineEvent::Started {
                targets,
                cached_entries,
            } => {
                info!(
                    "Reconciling {} peer(s) ({} cached address(es))",
                    targets, cached_entries
                );
            }
            EngineEvent::CycleCompleted(report) => {
                if report.changed.is_empty() && report.failed == 0 && report.applies_failed == 0 {
                    debug!("{} cycle: all peers in sync", report.trigger);
                } else {
                    info!(
                        "{} cycle: {} changed, {} lookup(s) failed, {}/{} apply(s) failed",
                        report.trigger,
                        report.changed.len(),
                        report.failed,
                        report.applies_failed,
                        report.applies_attempted
                    );
                }
            }
            EngineEvent::FlushCoalesced => {
                debug!("Flush request merged into pending flush");
            }
            EngineEvent::Stopped { reason } => {
                info!("Engine stopped: {}", reason);
            }
            other => debug!("Engine event: {:?}", other),
        }
    }
}

/// Forward SIGUSR1 to the engine's flush handle
#[cfg(unix)]
fn spawn_flush_listener(flush: FlushHandle) -> Result<tokio::task::JoinHandle<()>> {
    let mut sigusr1 = signal(SignalKind::user_defined1())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGUSR1 handler: {}", e))?;

    Ok(tokio::spawn(async move {
        while sigusr1.recv().await.is_some() {
            match flush.trigger() {
                FlushRequest::Queued => info!("SIGUSR1 received, flushing cache"),
                FlushRequest::Coalesced => debug!("SIGUSR1 received, flush already pending"),
                FlushRequest::Closed => break,
            }
        }
    }))
}

/// No SIGUSR1 outside unix; the handle is kept so the task owns it
#[cfg(not(unix))]
fn spawn_flush_listener(flush: FlushHandle) -> Result<tokio::task::JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        let _flush = flush;
        std::future::pending::<()>().await;
    }))
}

/// Shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
        Ok(Self { sigterm, sigint })
    }

    /// Wait for either signal and return its name
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

/// Shutdown signal (Ctrl-C only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for CTRL-C: {}", e);
            std::future::pending::<()>().await;
        }
        "SIGINT"
    }
}
