// ── Inbound update pool ──
//
// Drivers push updates through an `IngestHandle`. Messages are sharded
// by key over a fixed set of worker tasks, so updates for one key are
// applied in arrival order while different keys proceed in parallel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::Engine;
use crate::error::CoreError;
use crate::model::{EntityId, QualityHint, SupervisedKind, SupervisionStatus};

/// One inbound update from a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Heartbeat {
        alive_id: EntityId,
        timestamp: DateTime<Utc>,
    },
    Report {
        kind: SupervisedKind,
        entity_id: EntityId,
        status: SupervisionStatus,
        timestamp: DateTime<Utc>,
        message: String,
    },
    TagUpdate {
        tag_id: EntityId,
        value: serde_json::Value,
        timestamp: DateTime<Utc>,
        #[serde(default)]
        quality: Option<QualityHint>,
    },
    CommFault {
        tag_id: EntityId,
        value: bool,
        timestamp: DateTime<Utc>,
    },
}

impl Inbound {
    /// Key the message is sharded on.
    pub fn shard_key(&self) -> EntityId {
        match self {
            Self::Heartbeat { alive_id, .. } => *alive_id,
            Self::Report { entity_id, .. } => *entity_id,
            Self::TagUpdate { tag_id, .. } | Self::CommFault { tag_id, .. } => *tag_id,
        }
    }
}

/// Cloneable sender side of the ingest pool.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    senders: Arc<Vec<mpsc::Sender<Inbound>>>,
}

impl IngestHandle {
    /// Queue `message`, waiting for room if its worker is backed up.
    pub async fn send(&self, message: Inbound) -> Result<(), CoreError> {
        self.sender_for(message.shard_key())?
            .send(message)
            .await
            .map_err(|_| CoreError::ShutDown)
    }

    /// Queue `message` without waiting. Fails if the worker queue is full.
    pub fn try_send(&self, message: Inbound) -> Result<(), CoreError> {
        self.sender_for(message.shard_key())?
            .try_send(message)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    CoreError::Internal("ingest queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => CoreError::ShutDown,
            })
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    fn sender_for(&self, key: EntityId) -> Result<&mpsc::Sender<Inbound>, CoreError> {
        self.senders
            .get(shard(key, self.senders.len()))
            .ok_or(CoreError::ShutDown)
    }
}

fn shard(key: EntityId, workers: usize) -> usize {
    let workers = u64::try_from(workers.max(1)).unwrap_or(1);
    usize::try_from(key.get() % workers).unwrap_or(0)
}

/// Spawn `workers` ingest tasks feeding `engine`.
pub(crate) fn spawn_workers(
    engine: &Engine,
    workers: usize,
    queue_capacity: usize,
    cancel: &CancellationToken,
    handles: &mut Vec<JoinHandle<()>>,
) -> IngestHandle {
    let mut senders = Vec::with_capacity(workers);
    for worker in 0..workers.max(1) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        senders.push(tx);
        handles.push(tokio::spawn(ingest_worker(
            engine.clone(),
            worker,
            rx,
            cancel.clone(),
        )));
    }
    IngestHandle {
        senders: Arc::new(senders),
    }
}

async fn ingest_worker(
    engine: Engine,
    worker: usize,
    mut rx: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => {
                let Some(message) = next else { break };
                engine.dispatch(message);
            }
        }
    }
    debug!(worker, "ingest worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_always_lands_on_same_worker() {
        let key = EntityId::new(4711);
        assert_eq!(shard(key, 4), shard(key, 4));
        assert_eq!(shard(key, 4), 3);
        assert_eq!(shard(key, 1), 0);
        assert_eq!(shard(key, 0), 0);
    }

    #[test]
    fn shard_key_per_variant() {
        let now = Utc::now();
        let hb = Inbound::Heartbeat {
            alive_id: EntityId::new(7),
            timestamp: now,
        };
        let cf = Inbound::CommFault {
            tag_id: EntityId::new(9),
            value: true,
            timestamp: now,
        };
        assert_eq!(hb.shard_key(), EntityId::new(7));
        assert_eq!(cf.shard_key(), EntityId::new(9));
    }

    #[test]
    fn inbound_deserializes_from_tagged_json() {
        let msg: Inbound = serde_json::from_str(
            r#"{"type":"heartbeat","alive_id":100,"timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(msg.shard_key(), EntityId::new(100));
    }
}
