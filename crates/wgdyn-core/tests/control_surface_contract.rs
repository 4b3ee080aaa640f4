//! Contract Test: Control Surface
//!
//! Verifies what starts a cycle and what happens when the engine stops.
//!
//! Constraints verified:
//! - A forced flush runs without waiting for the timer
//! - With flush_reconciles disabled a forced flush only persists
//! - Triggers arriving while one is pending collapse into one flush
//! - Shutdown always writes a final snapshot
//! - A failed final snapshot is reported to the caller
//!
//! If this test fails, operators cannot rely on SIGUSR1 or clean shutdown.

mod common;

use common::*;
use std::time::Duration;
use tokio::sync::oneshot;
use wgdyn_core::{CycleTrigger, EngineEvent, FlushRequest, MemoryCacheStore};

fn completed(trigger: CycleTrigger) -> impl Fn(&EngineEvent) -> bool {
    move |event: &EngineEvent| {
        matches!(event, EngineEvent::CycleCompleted(report) if report.trigger == trigger)
    }
}

#[tokio::test]
async fn forced_flush_runs_without_timer_tick() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    resolver.answer("h.example", "192.0.2.1");

    let store = MemoryCacheStore::new();
    let config = config_for(vec![target("h.example", 0)]);
    let (engine, mut events) = engine_with(config, store.clone(), &resolver, &applier).await;
    let handle = engine.flush_handle();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(engine.run_with_shutdown(Some(shutdown_rx)));

    wait_for_event(&mut events, completed(CycleTrigger::Startup)).await;
    assert_eq!(store.snapshot_count(), 1);

    assert_eq!(handle.trigger(), FlushRequest::Queued);
    let event = wait_for_event(&mut events, completed(CycleTrigger::ForceFlush)).await;

    let EngineEvent::CycleCompleted(report) = event else {
        unreachable!()
    };
    assert!(report.persisted, "Forced flush always snapshots");
    assert_eq!(resolver.call_count(), 2, "Forced flush reconciles first");
    assert_eq!(store.snapshot_count(), 2);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn flush_without_reconcile_only_persists() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    resolver.answer("h.example", "192.0.2.1");

    let store = MemoryCacheStore::new();
    let mut config = config_for(vec![target("h.example", 0)]);
    config.engine.flush_reconciles = false;
    let (engine, mut events) = engine_with(config, store.clone(), &resolver, &applier).await;
    let handle = engine.flush_handle();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(engine.run_with_shutdown(Some(shutdown_rx)));

    wait_for_event(&mut events, completed(CycleTrigger::Startup)).await;
    handle.trigger();
    wait_for_event(&mut events, |e| matches!(e, EngineEvent::CachePersisted { .. })).await;

    assert_eq!(resolver.call_count(), 1, "No lookups on a persist-only flush");
    assert_eq!(store.snapshot_count(), 2);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn pending_triggers_coalesce_into_one_flush() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    resolver.answer("h.example", "192.0.2.1");

    let config = config_for(vec![target("h.example", 0)]);
    let (engine, mut events) =
        engine_with(config, MemoryCacheStore::new(), &resolver, &applier).await;
    let handle = engine.flush_handle();

    // All three arrive before the engine gets to look at them
    assert_eq!(handle.trigger(), FlushRequest::Queued);
    assert_eq!(handle.trigger(), FlushRequest::Coalesced);
    assert_eq!(handle.trigger(), FlushRequest::Coalesced);
    drop(handle);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(engine.run_with_shutdown(Some(shutdown_rx)));

    wait_for_event(&mut events, completed(CycleTrigger::ForceFlush)).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    let mut extra_flushes = 0;
    while let Some(event) = events.recv().await {
        if completed(CycleTrigger::ForceFlush)(&event) {
            extra_flushes += 1;
        }
    }
    assert_eq!(extra_flushes, 0);
}

#[tokio::test]
async fn trigger_after_engine_stopped_reports_closed() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    resolver.answer("h.example", "192.0.2.1");

    let config = config_for(vec![target("h.example", 0)]);
    let (engine, _events) =
        engine_with(config, MemoryCacheStore::new(), &resolver, &applier).await;
    let handle = engine.flush_handle();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    shutdown_tx.send(()).unwrap();
    engine.run_with_shutdown(Some(shutdown_rx)).await.unwrap();

    assert_eq!(handle.trigger(), FlushRequest::Closed);
}

#[tokio::test]
async fn shutdown_writes_final_snapshot() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    resolver.answer("h.example", "192.0.2.1");

    let store = FlakyCacheStore::new();
    store.set_failing(true);
    let config = config_for(vec![target("h.example", 0)]);
    let (engine, mut events) = engine_with(config, store.clone(), &resolver, &applier).await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(engine.run_with_shutdown(Some(shutdown_rx)));

    wait_for_event(&mut events, completed(CycleTrigger::Startup)).await;
    assert_eq!(store.snapshot_count(), 0, "Startup persist failed");

    store.set_failing(false);
    shutdown_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("engine stops promptly")
        .unwrap();
    assert!(result.is_ok());

    assert_eq!(store.snapshot_count(), 1);
    assert_eq!(
        store.stored().await.get("h.example"),
        Some("192.0.2.1".parse().unwrap())
    );
    wait_for_event(&mut events, |e| matches!(e, EngineEvent::Stopped { .. })).await;
}

#[tokio::test]
async fn failed_final_snapshot_is_an_error() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    resolver.answer("h.example", "192.0.2.1");

    let store = FlakyCacheStore::new();
    store.set_failing(true);
    let config = config_for(vec![target("h.example", 0)]);
    let (engine, _events) = engine_with(config, store, &resolver, &applier).await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(engine.run_with_shutdown(Some(shutdown_rx)));
    shutdown_tx.send(()).unwrap();

    let result = task.await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn timer_drives_periodic_cycles() {
    let resolver = ScriptedResolver::new();
    let applier = RecordingApplier::new();
    resolver.answer("h.example", "192.0.2.1");

    let mut config = config_for(vec![target("h.example", 0)]);
    config.engine.poll_interval_secs = 1;
    let (engine, mut events) =
        engine_with(config, MemoryCacheStore::new(), &resolver, &applier).await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(engine.run_with_shutdown(Some(shutdown_rx)));

    wait_for_event(&mut events, completed(CycleTrigger::Startup)).await;
    wait_for_event(&mut events, completed(CycleTrigger::Tick)).await;

    assert_eq!(resolver.call_count(), 2);
    assert_eq!(applier.call_count(), 1, "Tick with unchanged DNS is idle");

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}
