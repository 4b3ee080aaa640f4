//! Contract Test: Gateway Check
//!
//! Verifies the optional tunnel liveness check.
//!
//! Constraints verified:
//! - An in-sync target whose gateway is dead is re-applied
//! - A reachable gateway causes no extra apply
//! - Targets without a gateway, or with the check disabled, are never probed
//!
//! If this test fails, tunnels behind a reset NAT mapping stay down.

mod common;

use common::*;
use wgdyn_core::{CycleTrigger, EngineEvent, MemoryCacheStore, ReconcileEngine};

async fn engine_with_probe(
    check_gateway: bool,
    gateway: Option<&str>,
    resolver: &ScriptedResolver,
    applier: &RecordingApplier,
    probe: &ScriptedProbe,
) -> (ReconcileEngine, tokio::sync::mpsc::Receiver<EngineEvent>) {
    let mut peer = target("h.example", 0);
    if let Some(gateway) = gateway {
        peer = peer.with_gateway(gateway.parse().unwrap());
    }
    let mut config = config_for(vec![peer]);
    config.engine.check_gateway = check_gateway;

    let (engine, events) = engine_with(config, MemoryCacheStore::new(), resolver, applier).await;
    (engine.with_gateway_probe(Box::new(probe.clone())), events)
}

#[tokio::test]
async fn dead_gateway_forces_reapply() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    let probe = ScriptedProbe::new(true);
    resolver.answer("h.example", "192.0.2.1");

    let (mut engine, mut events) =
        engine_with_probe(true, Some("10.9.0.1"), &resolver, &applier, &probe).await;

    engine.run_cycle(CycleTrigger::Tick).await;
    assert_eq!(applier.call_count(), 1);

    probe.set_reachable(false);
    let report = engine.run_cycle(CycleTrigger::Tick).await;

    assert!(report.changed.is_empty());
    assert_eq!(report.applies_attempted, 1);
    assert_eq!(applier.call_count(), 2);
    let event = wait_for_event(&mut events, |e| {
        matches!(e, EngineEvent::GatewayUnreachable { .. })
    })
    .await;
    assert_eq!(
        event,
        EngineEvent::GatewayUnreachable {
            interface: "wg0".to_string(),
            gateway: "10.9.0.1".parse().unwrap(),
        }
    );
}

#[tokio::test]
async fn reachable_gateway_is_left_alone() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    let probe = ScriptedProbe::new(true);
    resolver.answer("h.example", "192.0.2.1");

    let (mut engine, _events) =
        engine_with_probe(true, Some("10.9.0.1"), &resolver, &applier, &probe).await;

    engine.run_cycle(CycleTrigger::Tick).await;
    assert_eq!(probe.probe_count(), 0, "Changed targets are applied, not probed");

    engine.run_cycle(CycleTrigger::Tick).await;
    assert_eq!(probe.probe_count(), 1);
    assert_eq!(applier.call_count(), 1);
}

#[tokio::test]
async fn target_without_gateway_is_not_probed() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    let probe = ScriptedProbe::new(false);
    resolver.answer("h.example", "192.0.2.1");

    let (mut engine, _events) = engine_with_probe(true, None, &resolver, &applier, &probe).await;

    engine.run_cycle(CycleTrigger::Tick).await;
    engine.run_cycle(CycleTrigger::Tick).await;

    assert_eq!(probe.probe_count(), 0);
    assert_eq!(applier.call_count(), 1);
}

#[tokio::test]
async fn disabled_check_never_probes() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    let probe = ScriptedProbe::new(false);
    resolver.answer("h.example", "192.0.2.1");

    let (mut engine, _events) =
        engine_with_probe(false, Some("10.9.0.1"), &resolver, &applier, &probe).await;

    engine.run_cycle(CycleTrigger::Tick).await;
    engine.run_cycle(CycleTrigger::Tick).await;

    assert_eq!(probe.probe_count(), 0);
    assert_eq!(applier.call_count(), 1);
}

#[tokio::test]
async fn unresolved_target_is_not_probed() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    let probe = ScriptedProbe::new(false);
    resolver.answer("h.example", "192.0.2.1");

    let (mut engine, _events) =
        engine_with_probe(true, Some("10.9.0.1"), &resolver, &applier, &probe).await;

    engine.run_cycle(CycleTrigger::Tick).await;
    resolver.fail("h.example", wgdyn_core::ResolveCause::NoResponder);
    engine.run_cycle(CycleTrigger::Tick).await;

    assert_eq!(probe.probe_count(), 0);
    assert_eq!(applier.call_count(), 1);
}
