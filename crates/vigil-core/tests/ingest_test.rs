#![allow(clippy::unwrap_used)]
// Integration tests for the sharded ingest pool.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use vigil_core::{
    CoreError, Engine, EngineConfig, EngineState, EntityId, Inbound, ProcessDef, SupervisedKind,
    SupervisionStatus, TagDef, TagOwner,
};

// ── Helpers ─────────────────────────────────────────────────────────

const PROCESS: EntityId = EntityId::new(7);
const ALIVE: EntityId = EntityId::new(70);
const TAG: EntityId = EntityId::new(700);

async fn running_engine() -> Engine {
    let engine = Engine::new(EngineConfig {
        ingest_workers: 3,
        ..EngineConfig::default()
    })
    .unwrap();
    engine
        .configure_process(&ProcessDef {
            id: PROCESS,
            name: "P_DRIVER".into(),
            alive_id: ALIVE,
            alive_interval_ms: 60_000,
            local_config: false,
        })
        .unwrap();
    engine
        .configure_tag(&TagDef {
            id: TAG,
            name: "T_FLOW".into(),
            owner: TagOwner::Process(PROCESS),
        })
        .unwrap();
    engine.start().await.unwrap();
    engine
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

// ── Routing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_heartbeat_through_pool_starts_process() {
    let engine = running_engine().await;
    let ingest = engine.ingest().unwrap();
    assert_eq!(ingest.workers(), 3);

    ingest
        .send(Inbound::Heartbeat {
            alive_id: ALIVE,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    eventually(|| {
        engine.supervised(SupervisedKind::Process, PROCESS).unwrap().status
            == SupervisionStatus::Running
    })
    .await;
    engine.shutdown().await;
}

#[tokio::test]
async fn test_updates_for_one_tag_apply_in_order() {
    let engine = running_engine().await;
    let ingest = engine.ingest().unwrap();
    let t0 = Utc::now();

    for i in 0..100_i64 {
        ingest
            .send(Inbound::TagUpdate {
                tag_id: TAG,
                value: json!(i),
                timestamp: t0 + TimeDelta::milliseconds(i),
                quality: None,
            })
            .await
            .unwrap();
    }

    eventually(|| engine.tag(TAG).unwrap().value == Some(json!(99))).await;
    assert_eq!(
        engine.tag(TAG).unwrap().source_timestamp,
        Some(t0 + TimeDelta::milliseconds(99))
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_messages_for_unknown_entities_are_dropped() {
    let engine = running_engine().await;
    let ingest = engine.ingest().unwrap();

    ingest
        .send(Inbound::Heartbeat {
            alive_id: EntityId::new(404),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    ingest
        .send(Inbound::Heartbeat {
            alive_id: ALIVE,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    eventually(|| {
        engine.supervised(SupervisedKind::Process, PROCESS).unwrap().status
            == SupervisionStatus::Running
    })
    .await;
    assert_eq!(engine.state(), EngineState::Running);
    engine.shutdown().await;
}

// ── Wire format ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_json_report_is_applied() {
    let engine = running_engine().await;
    let raw = r#"{
        "type": "report",
        "kind": "PROCESS",
        "entity_id": 7,
        "status": "DOWN",
        "timestamp": "2026-01-01T00:00:00Z",
        "message": "operator stop"
    }"#;
    let message: Inbound = serde_json::from_str(raw).unwrap();
    assert_eq!(message.shard_key(), PROCESS);

    engine.ingest().unwrap().send(message).await.unwrap();
    eventually(|| !engine.tag(TAG).unwrap().is_valid()).await;

    let process = engine.supervised(SupervisedKind::Process, PROCESS).unwrap();
    assert_eq!(process.status, SupervisionStatus::Down);
    assert_eq!(process.status_message.as_deref(), Some("operator stop"));
    engine.shutdown().await;
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pool_rejects_input_after_shutdown() {
    let engine = running_engine().await;
    let ingest = engine.ingest().unwrap();
    engine.shutdown().await;

    assert!(matches!(engine.ingest(), Err(CoreError::ShutDown)));
    let err = ingest
        .send(Inbound::Heartbeat {
            alive_id: ALIVE,
            timestamp: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ShutDown));
}
