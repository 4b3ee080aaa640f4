//! Test doubles and common utilities for contract tests
//!
//! Every double is cheap to clone and clones share their recorded state, so a
//! test can hand one copy to the engine and keep another for assertions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use wgdyn_core::config::{CacheStoreConfig, EngineConfig, PeerTarget, WgDynConfig};
use wgdyn_core::traits::{
    AddressCache, ApplyRequest, CacheStore, EndpointApplier, GatewayProbe, ResolutionFailure,
    ResolveCause, Resolver,
};
use wgdyn_core::{EngineEvent, Error, MemoryCacheStore, ReconcileEngine, Result};

/// Scripted answer for one hostname
#[derive(Debug, Clone)]
pub enum Answer {
    Address(IpAddr),
    Fail(ResolveCause),
    /// Never answers (exercises the engine's timeout)
    Hang,
}

/// A resolver whose answers are set by the test
#[derive(Clone, Default)]
pub struct ScriptedResolver {
    answers: Arc<Mutex<HashMap<String, Answer>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, hostname: &str, ip: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(hostname.to_string(), Answer::Address(ip.parse().unwrap()));
    }

    pub fn fail(&self, hostname: &str, cause: ResolveCause) {
        self.answers
            .lock()
            .unwrap()
            .insert(hostname.to_string(), Answer::Fail(cause));
    }

    pub fn hang(&self, hostname: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(hostname.to_string(), Answer::Hang);
    }

    /// Number of resolve() calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve(&self, hostname: &str) -> std::result::Result<IpAddr, ResolutionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answers.lock().unwrap().get(hostname).cloned();
        match answer {
            Some(Answer::Address(ip)) => Ok(ip),
            Some(Answer::Fail(cause)) => Err(ResolutionFailure::new(hostname, cause)),
            Some(Answer::Hang) => std::future::pending().await,
            None => Err(ResolutionFailure::new(hostname, ResolveCause::NotFound)),
        }
    }

    fn resolver_name(&self) -> &'static str {
        "scripted"
    }
}

/// An applier that records every request and can be told to fail
#[derive(Clone, Default)]
pub struct RecordingApplier {
    requests: Arc<Mutex<Vec<ApplyRequest>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent apply() calls fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All requests received, including failed ones
    pub fn requests(&self) -> Vec<ApplyRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl EndpointApplier for RecordingApplier {
    async fn apply(&self, request: &ApplyRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::apply(&request.interface, "wg exited with status 1"))
        } else {
            Ok(())
        }
    }

    fn applier_name(&self) -> &'static str {
        "recording"
    }
}

/// A cache store wrapping [`MemoryCacheStore`] whose snapshots can be made to fail
#[derive(Clone, Default)]
pub struct FlakyCacheStore {
    inner: MemoryCacheStore,
    failing: Arc<AtomicBool>,
}

impl FlakyCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.snapshot_count()
    }

    pub async fn stored(&self) -> AddressCache {
        self.inner.stored().await
    }
}

#[async_trait::async_trait]
impl CacheStore for FlakyCacheStore {
    async fn load(&self) -> Result<AddressCache> {
        self.inner.load().await
    }

    async fn snapshot(&self, cache: &AddressCache) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::cache_store("disk full"));
        }
        self.inner.snapshot(cache).await
    }

    fn location(&self) -> String {
        "flaky".to_string()
    }
}

/// A probe whose answer is set by the test
#[derive(Clone)]
pub struct ScriptedProbe {
    reachable: Arc<AtomicBool>,
    probes: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GatewayProbe for ScriptedProbe {
    async fn is_reachable(&self, _gateway: IpAddr) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

/// A syntactically valid WireGuard public key, distinct per seed
pub fn peer_key(seed: char) -> String {
    let mut key: String = std::iter::repeat(seed).take(43).collect();
    key.push('=');
    key
}

/// A target on `wg<n>` with a key derived from `n`
pub fn target(hostname: &str, n: u8) -> PeerTarget {
    let seed = (b'A' + n) as char;
    PeerTarget::new(hostname, peer_key(seed), format!("wg{}", n))
}

/// Configuration with an in-memory cache that persists every dirty cycle
///
/// The poll interval is long enough that timer ticks never fire during a test.
pub fn config_for(targets: Vec<PeerTarget>) -> WgDynConfig {
    WgDynConfig {
        peers: targets,
        cache: CacheStoreConfig::Memory,
        resolver: Default::default(),
        engine: EngineConfig {
            poll_interval_secs: 3600,
            resolve_timeout_secs: 1,
            persist_interval_secs: 0,
            flush_reconciles: true,
            check_gateway: false,
            event_channel_capacity: 1000,
        },
    }
}

/// Build an engine over the given doubles
pub async fn engine_with(
    config: WgDynConfig,
    store: impl CacheStore + 'static,
    resolver: &ScriptedResolver,
    applier: &RecordingApplier,
) -> (ReconcileEngine, mpsc::Receiver<EngineEvent>) {
    ReconcileEngine::new(
        config,
        Box::new(store),
        Box::new(resolver.clone()),
        Box::new(applier.clone()),
    )
    .await
    .expect("engine construction succeeds")
}

/// Cache pre-populated with the given entries
pub fn cache_of(entries: &[(&str, &str)]) -> AddressCache {
    entries
        .iter()
        .map(|(host, ip)| (host.to_string(), ip.parse::<IpAddr>().unwrap()))
        .collect()
}

/// Wait for the first event matching `pred`, failing after 5 seconds
pub async fn wait_for_event(
    rx: &mut mpsc::Receiver<EngineEvent>,
    pred: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event within 5 seconds")
}
