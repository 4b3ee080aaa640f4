//! Reconciliation engine
//!
//! The ReconcileEngine is responsible for:
//! - Resolving every configured peer hostname
//! - Diffing answers against the address cache
//! - Re-pointing WireGuard peers whose address changed (or whose last apply failed)
//! - Persisting the cache on schedule, on forced flush, and at shutdown
//!
//! ## Architecture
//!
//! ```text
//!   timer tick ──┐            ┌──────────────────┐
//!   startup ─────┼──────────▶ │ ReconcileEngine  │
//!   FlushHandle ─┘            └──────────────────┘
//!                                      │
//!         ┌────────────────┬───────────┼───────────────┬─────────────────┐
//!         ▼                ▼           ▼               ▼                 ▼
//!   ┌──────────┐   ┌──────────────┐ ┌──────────────┐ ┌─────────────┐ ┌────────┐
//!   │ Resolver │   │ AddressCache │ │ GatewayProbe │ │  Endpoint   │ │ Cache  │
//!   │ (fan-out)│   │   (diff)     │ │  (optional)  │ │  Applier    │ │ Store  │
//!   └──────────┘   └──────────────┘ └──────────────┘ └─────────────┘ └────────┘
//! ```
//!
//! ## Cycle Phases
//!
//! 1. Resolve all hostnames concurrently, each bounded by its timeout
//! 2. Diff: a new or different address updates the cache and marks the
//!    target pending. A target not yet applied by this process is pending
//!    too, since a previous run may have cached an address it never applied
//! 3. Probe gateways of in-sync targets (when enabled)
//! 4. Apply every pending target; failures stay pending for the next cycle
//! 5. Persist when forced, or when dirty and the persist interval elapsed
//!
//! A phase only starts once the previous one finished for every target.
//!
//! ## Single Writer
//!
//! The engine owns the cache and runs all cycles from one loop, so at most
//! one cycle is ever in flight and the cache needs no lock.

pub mod control;

pub use control::{CycleTrigger, FlushHandle, FlushRequest};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, PeerTarget, WgDynConfig};
use crate::error::Result;
use crate::traits::{
    AddressCache, AlwaysReachable, ApplyRequest, CacheStore, EndpointApplier, GatewayProbe,
    ResolutionFailure, ResolutionResult, ResolveCause, Resolver,
};

/// Whether the live interface is believed to match the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyStatus {
    /// Not yet observed this process lifetime
    #[default]
    Unknown,
    /// Last apply by this process succeeded
    Applied,
    /// An apply is owed; retried every cycle until it succeeds
    PendingApply,
}

/// Engine-side state of one target (not persisted)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetState {
    /// Apply status
    pub status: ApplyStatus,
    /// When the endpoint was last applied successfully
    pub last_applied_at: Option<DateTime<Utc>>,
}

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// What started the cycle
    pub trigger: CycleTrigger,
    /// When the cycle started
    pub started_at: DateTime<Utc>,
    /// Hostnames resolved successfully
    pub resolved: usize,
    /// Hostnames that failed to resolve
    pub failed: usize,
    /// Hostnames whose address changed (or appeared)
    pub changed: Vec<String>,
    /// Applier invocations
    pub applies_attempted: usize,
    /// Applier invocations that failed
    pub applies_failed: usize,
    /// Whether the cache was written
    pub persisted: bool,
}

/// Events emitted by the ReconcileEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        targets: usize,
        cached_entries: usize,
    },

    /// A cycle began
    CycleStarted {
        trigger: CycleTrigger,
    },

    /// A hostname failed to resolve; its cache entry is untouched
    ResolutionFailed {
        hostname: String,
        cause: ResolveCause,
    },

    /// A hostname resolved to a new address
    AddressChanged {
        hostname: String,
        previous: Option<IpAddr>,
        current: IpAddr,
    },

    /// A tunnel gateway did not answer
    GatewayUnreachable {
        interface: String,
        gateway: IpAddr,
    },

    /// A peer endpoint was reconfigured
    EndpointApplied {
        interface: String,
        peer_key: String,
        endpoint: SocketAddr,
    },

    /// Reconfiguring a peer endpoint failed
    ApplyFailed {
        interface: String,
        peer_key: String,
        error: String,
    },

    /// The cache was written
    CachePersisted {
        entries: usize,
    },

    /// Writing the cache failed
    PersistFailed {
        error: String,
    },

    /// A force-flush request merged into one already pending
    FlushCoalesced,

    /// A cycle finished
    CycleCompleted(CycleReport),

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`ReconcileEngine::new()`] (loads the cache)
/// 2. Hand out [`FlushHandle`]s with [`ReconcileEngine::flush_handle()`]
/// 3. Start with [`ReconcileEngine::run()`]
/// 4. Engine runs until shutdown, then writes a final snapshot
pub struct ReconcileEngine {
    /// Peers to keep in sync
    targets: Vec<PeerTarget>,

    /// Per-target state, parallel to `targets`
    states: Vec<TargetState>,

    /// Last known addresses, owned here
    cache: AddressCache,

    /// Where the cache is persisted
    store: Box<dyn CacheStore>,

    /// Hostname resolver, shared with resolution tasks
    resolver: Arc<dyn Resolver>,

    /// Applies endpoint changes
    applier: Box<dyn EndpointApplier>,

    /// Gateway reachability probe
    probe: Box<dyn GatewayProbe>,

    /// Engine settings
    config: EngineConfig,

    /// Last successful snapshot
    last_persist: Option<Instant>,

    /// Force-flush requests
    flush_tx: mpsc::Sender<()>,
    flush_rx: mpsc::Receiver<()>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ReconcileEngine {
    /// Create a new engine and load the cache
    ///
    /// A corrupt cache is logged and replaced by an empty one. Any other
    /// load failure (e.g. permission denied) is returned: the daemon cannot
    /// run without a usable cache location.
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub async fn new(
        config: WgDynConfig,
        store: Box<dyn CacheStore>,
        resolver: Box<dyn Resolver>,
        applier: Box<dyn EndpointApplier>,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let cache = match store.load().await {
            Ok(cache) => {
                info!("Loaded {} cached address(es) from {}", cache.len(), store.location());
                cache
            }
            Err(e) if e.is_corrupt_cache() => {
                warn!("{}. Starting with an empty cache.", e);
                AddressCache::new()
            }
            Err(e) => return Err(e),
        };

        let (event_tx, event_rx) = mpsc::channel(config.engine.event_channel_capacity);
        let (flush_tx, flush_rx) = mpsc::channel(1);

        let engine = Self {
            states: vec![TargetState::default(); config.peers.len()],
            targets: config.peers,
            cache,
            store,
            resolver: Arc::from(resolver),
            applier,
            probe: Box::new(AlwaysReachable),
            config: config.engine,
            last_persist: None,
            flush_tx,
            flush_rx,
            event_tx,
        };

        Ok((engine, event_rx))
    }

    /// Use a gateway probe (only consulted when `check_gateway` is enabled)
    pub fn with_gateway_probe(mut self, probe: Box<dyn GatewayProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Handle for requesting forced flushes
    pub fn flush_handle(&self) -> FlushHandle {
        FlushHandle::new(self.flush_tx.clone(), self.event_tx.clone())
    }

    /// Current in-memory cache
    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    /// Targets with their engine-side state
    pub fn targets(&self) -> impl Iterator<Item = (&PeerTarget, &TargetState)> {
        self.targets.iter().zip(self.states.iter())
    }

    /// Run the engine until Ctrl-C
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown, final snapshot written
    /// - `Err(Error)`: The final snapshot could not be written
    pub async fn run(self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine until `shutdown_rx` fires (or Ctrl-C when `None`)
    pub async fn run_with_shutdown(
        self,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(mut self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            targets: self.targets.len(),
            cached_entries: self.cache.len(),
        });
        info!(
            "Engine started: {} target(s), polling every {}s",
            self.targets.len(),
            self.config.poll_interval_secs
        );

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        self.run_cycle(CycleTrigger::Startup).await;

        let period = self.config.poll_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Each branch body runs to completion before shutdown is polled
        // again, so an in-flight cycle always finishes.
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(()) = self.flush_rx.recv() => {
                    self.force_flush().await;
                }

                _ = ticker.tick() => {
                    self.run_cycle(CycleTrigger::Tick).await;
                }
            }
        }

        let result = self.persist().await;
        self.emit_event(EngineEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });

        match result {
            Ok(()) => {
                info!("Cache flushed, engine stopped");
                Ok(())
            }
            Err(e) => {
                error!("Final cache snapshot failed: {}", e);
                Err(e)
            }
        }
    }

    /// Handle a force-flush request
    ///
    /// Runs a full cycle when `flush_reconciles` is set, otherwise only
    /// persists the current cache.
    pub async fn force_flush(&mut self) -> bool {
        if self.config.flush_reconciles {
            self.run_cycle(CycleTrigger::ForceFlush).await.persisted
        } else {
            info!("Forced flush of {} cached address(es)", self.cache.len());
            self.persist().await.is_ok()
        }
    }

    /// Run one reconciliation cycle
    pub async fn run_cycle(&mut self, trigger: CycleTrigger) -> CycleReport {
        let started_at = Utc::now();
        debug!("Cycle started ({})", trigger);
        self.emit_event(EngineEvent::CycleStarted { trigger });

        // Phase 1: resolve-all
        let results = self.resolve_all().await;
        let mut resolved: HashMap<String, IpAddr> = HashMap::new();
        let mut failed = 0;
        for result in results {
            match result.outcome {
                Ok(ip) => {
                    resolved.insert(result.hostname, ip);
                }
                Err(failure) => {
                    failed += 1;
                    warn!("{}. Keeping cached address.", failure);
                    self.emit_event(EngineEvent::ResolutionFailed {
                        hostname: failure.hostname,
                        cause: failure.cause,
                    });
                }
            }
        }

        // Phase 2: diff
        let changed = self.diff(&resolved);

        // Phase 3: gateway probe
        if self.config.check_gateway {
            self.probe_gateways(&resolved, &changed).await;
        }

        // Phase 4: apply-all
        let (applies_attempted, applies_failed) = self.apply_pending(&resolved).await;

        // Phase 5: persist
        let persisted = if self.should_persist(trigger) {
            self.persist().await.is_ok()
        } else {
            false
        };

        let report = CycleReport {
            trigger,
            started_at,
            resolved: resolved.len(),
            failed,
            changed,
            applies_attempted,
            applies_failed,
            persisted,
        };

        debug!(
            "Cycle finished ({}): {} resolved, {} failed, {} changed, {}/{} applies failed",
            trigger,
            report.resolved,
            report.failed,
            report.changed.len(),
            report.applies_failed,
            report.applies_attempted
        );
        self.emit_event(EngineEvent::CycleCompleted(report.clone()));

        report
    }

    /// Resolve every distinct hostname concurrently
    ///
    /// Each lookup is bounded by its timeout; all results are collected
    /// before returning, in configuration order.
    async fn resolve_all(&self) -> Vec<ResolutionResult> {
        let mut lookups: Vec<(String, Duration)> = Vec::new();
        for target in &self.targets {
            if lookups.iter().any(|(host, _)| *host == target.hostname) {
                continue;
            }
            let timeout = target
                .resolve_timeout()
                .unwrap_or_else(|| self.config.resolve_timeout());
            lookups.push((target.hostname.clone(), timeout));
        }

        let mut results: Vec<ResolutionResult> = lookups
            .iter()
            .map(|(hostname, _)| ResolutionResult {
                hostname: hostname.clone(),
                outcome: Err(ResolutionFailure::new(
                    hostname.clone(),
                    ResolveCause::Other("resolution task aborted".to_string()),
                )),
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (idx, (hostname, timeout)) in lookups.into_iter().enumerate() {
            let resolver = Arc::clone(&self.resolver);
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, resolver.resolve(&hostname)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ResolutionFailure::timeout(hostname.clone())),
                };
                (idx, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => results[idx].outcome = outcome,
                Err(e) => error!("Resolution task failed: {}", e),
            }
        }

        results
    }

    /// Update the cache from fresh answers and mark affected targets
    ///
    /// Returns the hostnames whose address changed.
    fn diff(&mut self, resolved: &HashMap<String, IpAddr>) -> Vec<String> {
        let mut changed = Vec::new();

        for (target, state) in self.targets.iter().zip(self.states.iter_mut()) {
            let Some(&current) = resolved.get(&target.hostname) else {
                continue;
            };

            let previous = self.cache.get(&target.hostname);
            let is_change = previous != Some(current)
                || changed.iter().any(|host| *host == target.hostname);

            if is_change {
                if !changed.contains(&target.hostname) {
                    self.cache.set(target.hostname.clone(), current);
                    info!(
                        "Host {}: {} -> {}",
                        target.hostname,
                        previous.map(|ip| ip.to_string()).unwrap_or_else(|| "(none)".to_string()),
                        current
                    );
                    send_event(&self.event_tx, EngineEvent::AddressChanged {
                        hostname: target.hostname.clone(),
                        previous,
                        current,
                    });
                    changed.push(target.hostname.clone());
                }
                state.status = ApplyStatus::PendingApply;
            } else if state.status == ApplyStatus::Unknown {
                debug!(
                    "Host {} unchanged at {}, endpoint not yet applied by this run",
                    target.hostname, current
                );
                state.status = ApplyStatus::PendingApply;
            } else {
                debug!("Host {} unchanged at {}", target.hostname, current);
            }
        }

        changed
    }

    /// Mark in-sync targets with a dead gateway as pending
    async fn probe_gateways(&mut self, resolved: &HashMap<String, IpAddr>, changed: &[String]) {
        for (target, state) in self.targets.iter().zip(self.states.iter_mut()) {
            if state.status != ApplyStatus::Applied
                || changed.contains(&target.hostname)
                || !resolved.contains_key(&target.hostname)
            {
                continue;
            }

            let Some(gateway) = target.gateway else {
                debug!("No gateway configured for {}, treating as reachable", target.interface);
                continue;
            };

            if !self.probe.is_reachable(gateway).await {
                info!(
                    "Gateway {} on {} is not reachable, re-applying endpoint",
                    gateway, target.interface
                );
                send_event(&self.event_tx, EngineEvent::GatewayUnreachable {
                    interface: target.interface.clone(),
                    gateway,
                });
                state.status = ApplyStatus::PendingApply;
            }
        }
    }

    /// Apply every pending target that has an address this cycle
    ///
    /// Returns (attempted, failed). A failure never rolls back the cache.
    async fn apply_pending(&mut self, resolved: &HashMap<String, IpAddr>) -> (usize, usize) {
        let mut attempted = 0;
        let mut failed = 0;

        for (target, state) in self.targets.iter().zip(self.states.iter_mut()) {
            if state.status != ApplyStatus::PendingApply {
                continue;
            }
            let Some(&address) = resolved.get(&target.hostname) else {
                debug!("{} is pending but unresolved this cycle", target.hostname);
                continue;
            };

            let request = ApplyRequest::new(
                target.interface.clone(),
                target.peer_key.clone(),
                target.endpoint(address),
            );

            attempted += 1;
            match self.applier.apply(&request).await {
                Ok(()) => {
                    info!("Endpoint applied: {}", request);
                    state.status = ApplyStatus::Applied;
                    state.last_applied_at = Some(Utc::now());
                    send_event(&self.event_tx, EngineEvent::EndpointApplied {
                        interface: request.interface,
                        peer_key: request.peer_key,
                        endpoint: request.endpoint,
                    });
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        "Applying endpoint via {} failed: {}. Will retry next cycle.",
                        self.applier.applier_name(),
                        e
                    );
                    state.status = ApplyStatus::PendingApply;
                    send_event(&self.event_tx, EngineEvent::ApplyFailed {
                        interface: request.interface,
                        peer_key: request.peer_key,
                        error: e.to_string(),
                    });
                }
            }
        }

        (attempted, failed)
    }

    /// Auto-persist condition
    fn should_persist(&self, trigger: CycleTrigger) -> bool {
        if trigger == CycleTrigger::ForceFlush {
            return true;
        }
        if !self.cache.is_dirty() {
            return false;
        }
        match self.last_persist {
            None => true,
            Some(at) => at.elapsed() >= self.config.persist_interval(),
        }
    }

    /// Snapshot the cache
    ///
    /// On failure the cache stays dirty, so the next cycle tries again.
    async fn persist(&mut self) -> Result<()> {
        match self.store.snapshot(&self.cache).await {
            Ok(()) => {
                self.cache.mark_clean();
                self.last_persist = Some(Instant::now());
                debug!("Cache persisted to {}", self.store.location());
                self.emit_event(EngineEvent::CachePersisted {
                    entries: self.cache.len(),
                });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to persist cache to {}: {}", self.store.location(), e);
                self.emit_event(EngineEvent::PersistFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        send_event(&self.event_tx, event);
    }
}

/// Send an event without blocking, dropping it when the channel is full
fn send_event(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if tx.try_send(event).is_err() {
        warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_state_defaults_to_unknown() {
        let state = TargetState::default();
        assert_eq!(state.status, ApplyStatus::Unknown);
        assert!(state.last_applied_at.is_none());
    }

    #[test]
    fn test_engine_event_equality() {
        let event = EngineEvent::AddressChanged {
            hostname: "peer.example".to_string(),
            previous: None,
            current: IpAddr::from([1, 2, 3, 4]),
        };
        assert_eq!(event.clone(), event);
    }
}
