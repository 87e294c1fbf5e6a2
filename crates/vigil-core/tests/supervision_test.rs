#![allow(clippy::unwrap_used)]
// Integration tests for heartbeat supervision and the tag cascade.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast::error::TryRecvError;

use vigil_core::{
    Engine, EngineConfig, EntityId, EquipmentDef, ProcessDef, QualityFlag, SupervisedKind,
    SupervisionStatus, TagDef, TagOwner,
};

// ── Helpers ─────────────────────────────────────────────────────────

const P: EntityId = EntityId::new(1);
const P_ALIVE: EntityId = EntityId::new(101);
const E1: EntityId = EntityId::new(11);
const E1_ALIVE: EntityId = EntityId::new(111);
const E2: EntityId = EntityId::new(12);
const E2_ALIVE: EntityId = EntityId::new(112);
const T1: EntityId = EntityId::new(1001);
const T2: EntityId = EntityId::new(1002);

/// Process P with equipment E1 and E2, tag T1 on E1 and T2 on E2.
fn topology(alive_interval_ms: u64, config: EngineConfig) -> Engine {
    let engine = Engine::new(config).unwrap();
    engine
        .configure_process(&ProcessDef {
            id: P,
            name: "P_PLANT".into(),
            alive_id: P_ALIVE,
            alive_interval_ms,
            local_config: false,
        })
        .unwrap();
    for (id, alive, name) in [(E1, E1_ALIVE, "E_PUMP"), (E2, E2_ALIVE, "E_VALVE")] {
        engine
            .configure_equipment(&EquipmentDef {
                id,
                name: name.into(),
                process_id: P,
                alive_id: alive,
                alive_interval_ms,
                comm_fault: None,
            })
            .unwrap();
    }
    for (id, owner, name) in [(T1, E1, "T_PRESSURE"), (T2, E2, "T_POSITION")] {
        engine
            .configure_tag(&TagDef {
                id,
                name: name.into(),
                owner: TagOwner::Equipment(owner),
            })
            .unwrap();
    }
    engine
}

fn status(engine: &Engine, kind: SupervisedKind, id: EntityId) -> SupervisionStatus {
    engine.supervised(kind, id).unwrap().status
}

fn down(engine: &Engine, kind: SupervisedKind, id: EntityId, at: DateTime<Utc>) {
    engine
        .report(kind, id, SupervisionStatus::Down, at, "stopped")
        .unwrap();
}

// ── Liveness and expiry ─────────────────────────────────────────────

#[test]
fn test_heartbeats_within_interval_keep_entity_running() {
    let engine = topology(30_000, EngineConfig::default());
    let svc = engine.supervision();
    let mut events = engine.subscribe_supervision();
    let start = Utc::now();

    // Ten minutes of heartbeats every 20 s, swept every 5 s.
    for tick in 0..120 {
        let now = start + TimeDelta::seconds(tick * 5);
        if tick % 4 == 0 {
            svc.on_heartbeat(P_ALIVE, now, now).unwrap();
        }
        assert!(svc.sweep(now).is_empty());
    }

    assert_eq!(status(&engine, SupervisedKind::Process, P), SupervisionStatus::Running);
    let first = events.try_recv().unwrap();
    assert_eq!(first.status, SupervisionStatus::Running);
    assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[test]
fn test_expiry_emits_exactly_one_down() {
    let engine = topology(30_000, EngineConfig::default());
    let svc = engine.supervision();
    let start = Utc::now();
    svc.on_heartbeat(P_ALIVE, start, start).unwrap();
    let mut events = engine.subscribe_supervision();

    // 40 s is the threshold; the sweep at 40 s must not fire.
    assert!(svc.sweep(start + TimeDelta::seconds(40)).is_empty());

    let mut downs = 0;
    for s in 41..200 {
        downs += svc.sweep(start + TimeDelta::seconds(s)).len();
    }
    assert_eq!(downs, 1);

    let event = events.try_recv().unwrap();
    assert_eq!(event.status, SupervisionStatus::Down);
    assert_eq!(event.entity_id, P);
    assert!(event.message.contains("P_PLANT"));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_heartbeat_after_expiry_restores_running() {
    let engine = topology(30_000, EngineConfig::default());
    let svc = engine.supervision();
    let start = Utc::now();
    svc.on_heartbeat(E1_ALIVE, start, start).unwrap();
    svc.sweep(start + TimeDelta::seconds(45));
    assert_eq!(status(&engine, SupervisedKind::Equipment, E1), SupervisionStatus::Down);
    assert!(!engine.tag(T1).unwrap().is_valid());

    let back = start + TimeDelta::seconds(50);
    svc.on_heartbeat(E1_ALIVE, back, back).unwrap();
    assert_eq!(status(&engine, SupervisedKind::Equipment, E1), SupervisionStatus::Running);
    assert!(engine.tag(T1).unwrap().is_valid());
}

// ── Cascade ─────────────────────────────────────────────────────────

#[test]
fn test_cascade_flags_are_tracked_per_cause() {
    let engine = topology(30_000, EngineConfig::default());
    let now = Utc::now();

    // 1. P down flags both tags with PROCESS_DOWN.
    down(&engine, SupervisedKind::Process, P, now);
    for tag in [T1, T2] {
        let tag = engine.tag(tag).unwrap();
        assert!(tag.quality.has(QualityFlag::ProcessDown));
        assert!(!tag.quality.has(QualityFlag::EquipmentDown));
    }

    // 2. E1 down flags T1 only with EQUIPMENT_DOWN.
    down(&engine, SupervisedKind::Equipment, E1, now + TimeDelta::seconds(1));
    assert!(engine.tag(T1).unwrap().quality.has(QualityFlag::EquipmentDown));
    assert!(!engine.tag(T2).unwrap().quality.has(QualityFlag::EquipmentDown));

    // 3. P running again clears PROCESS_DOWN; T1 stays invalid.
    engine
        .report(
            SupervisedKind::Process,
            P,
            SupervisionStatus::Running,
            now + TimeDelta::seconds(2),
            "restarted",
        )
        .unwrap();
    let t1 = engine.tag(T1).unwrap();
    let t2 = engine.tag(T2).unwrap();
    assert!(!t1.quality.has(QualityFlag::ProcessDown));
    assert!(!t2.quality.has(QualityFlag::ProcessDown));
    assert!(!t1.is_valid());
    assert!(t2.is_valid());
}

#[test]
fn test_cascade_description_is_event_message() {
    let engine = topology(30_000, EngineConfig::default());
    engine
        .report(
            SupervisedKind::Equipment,
            E2,
            SupervisionStatus::Down,
            Utc::now(),
            "valve controller unreachable",
        )
        .unwrap();

    let description = engine.tag(T2).unwrap().quality.description();
    assert_eq!(description, "EQUIPMENT_DOWN: valve controller unreachable");
}

#[test]
fn test_uncertain_also_invalidates() {
    let engine = topology(30_000, EngineConfig::default());
    engine
        .report(
            SupervisedKind::Process,
            P,
            SupervisionStatus::Uncertain,
            Utc::now(),
            "connection lost",
        )
        .unwrap();
    assert!(engine.tag(T1).unwrap().quality.has(QualityFlag::ProcessDown));
}

// ── Background sweep ────────────────────────────────────────────────

#[tokio::test]
async fn test_background_sweep_takes_silent_entity_down() {
    let config = EngineConfig {
        sweep_interval: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let engine = topology(150, config);
    let mut events = engine.subscribe_supervision();
    engine.start().await.unwrap();

    engine.heartbeat(E2_ALIVE, Utc::now()).unwrap();
    let running = events.recv().await.unwrap();
    assert_eq!(running.status, SupervisionStatus::Running);

    let down = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(down.entity_id, E2);
    assert_eq!(down.status, SupervisionStatus::Down);
    assert!(engine.store().last_sweep().is_some());

    engine.shutdown().await;
}
