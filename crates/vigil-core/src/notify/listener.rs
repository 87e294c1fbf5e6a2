// ── Listener registration and immediate delivery ──

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::buffered::buffered_task;
use super::{CacheEvent, DeliveryMode, EventMask, Notification};
use crate::model::EntityId;

/// Queue depth at which a subscriber is reported as falling behind.
pub(crate) const BACKLOG_WARN: usize = 10_000;

/// Outcome of one listener callback. Errors are logged, never retried.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives cache events for one collection.
///
/// Callbacks run on the subscriber's own task. They may block briefly but
/// must not write to the key that triggered them from inside the callback
/// expecting the write to be seen synchronously.
pub trait CacheListener<T>: Send + Sync + 'static {
    fn on_event(&self, notification: &Notification<T>) -> ListenerResult;

    /// Called with a whole batch in buffered mode. Defaults to one
    /// `on_event` per element, stopping at the first error.
    fn on_batch(&self, batch: &[Notification<T>]) -> ListenerResult {
        for notification in batch {
            self.on_event(notification)?;
        }
        Ok(())
    }
}

/// Adapter turning a closure into a [`CacheListener`].
pub struct FnListener<F>(pub F);

impl<T, F> CacheListener<T> for FnListener<F>
where
    T: Send + Sync + 'static,
    F: Fn(&Notification<T>) -> ListenerResult + Send + Sync + 'static,
{
    fn on_event(&self, notification: &Notification<T>) -> ListenerResult {
        (self.0)(notification)
    }
}

/// Handle for one subscription. Cancelling stops delivery and ends the
/// subscriber task once its current callback returns.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    cancel: CancellationToken,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Registration<T> {
    id: u64,
    mask: EventMask,
    tx: mpsc::UnboundedSender<Notification<T>>,
    cancel: CancellationToken,
    /// Events sent but not yet taken by the subscriber task.
    pending: Arc<AtomicUsize>,
}

impl<T> Registration<T> {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

/// Subscribers of one collection.
///
/// The registration list is swapped whole on (de)registration so that
/// publishing only takes a lock-free snapshot.
pub(crate) struct ListenerSet<T> {
    collection: &'static str,
    registrations: ArcSwap<Vec<Arc<Registration<T>>>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl<T: Send + Sync + 'static> ListenerSet<T> {
    pub(crate) fn new(collection: &'static str, shutdown: CancellationToken) -> Self {
        Self {
            collection,
            registrations: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Register `listener` for the events in `mask`.
    ///
    /// Spawns the subscriber task, so this must run inside a Tokio runtime.
    pub(crate) fn register(
        &self,
        mask: EventMask,
        mode: DeliveryMode,
        listener: Arc<dyn CacheListener<T>>,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        let inbox = Inbox::new(rx);
        let pending = Arc::clone(&inbox.pending);

        let collection = self.collection;
        match mode {
            DeliveryMode::Immediate => {
                tokio::spawn(immediate_task(collection, listener, inbox, cancel.clone()));
            }
            DeliveryMode::Buffered {
                capacity,
                flush_interval,
            } => {
                tokio::spawn(buffered_task(
                    collection,
                    listener,
                    inbox,
                    cancel.clone(),
                    capacity.max(1),
                    flush_interval,
                ));
            }
        }

        let registration = Arc::new(Registration {
            id,
            mask,
            tx,
            cancel: cancel.clone(),
            pending,
        });
        self.registrations.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().filter(|r| r.is_live()).cloned());
            next.push(Arc::clone(&registration));
            next
        });
        debug!(collection, listener_id = id, ?mode, "listener registered");

        ListenerHandle { id, cancel }
    }

    /// Enqueue one event for every interested subscriber.
    ///
    /// Called under the writer's per-key lock; only pushes onto unbounded
    /// channels, never waits on a subscriber. A subscriber whose queue
    /// reaches [`BACKLOG_WARN`] is logged at warn each time it gets there.
    pub(crate) fn publish(&self, event: CacheEvent, id: EntityId, entity: &Arc<T>) {
        let registrations = self.registrations.load();
        let mut dead = false;

        for registration in registrations.iter() {
            if !registration.mask.contains(event) {
                continue;
            }
            if registration.cancel.is_cancelled() {
                dead = true;
                continue;
            }
            let notification = Notification {
                event,
                id,
                entity: Arc::clone(entity),
            };
            // Counted before the send so the subscriber never sees zero.
            let backlog = registration.pending.fetch_add(1, Ordering::Relaxed) + 1;
            if registration.tx.send(notification).is_err() {
                // Subscriber task is gone (cancelled or panicked).
                registration.pending.fetch_sub(1, Ordering::Relaxed);
                dead = true;
                continue;
            }
            if backlog == BACKLOG_WARN {
                warn!(
                    collection = self.collection,
                    listener_id = registration.id,
                    backlog,
                    "listener is falling behind"
                );
            }
        }

        if dead {
            self.prune();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations
            .load()
            .iter()
            .filter(|r| r.is_live())
            .count()
    }

    /// Events queued for live subscribers and not yet picked up.
    pub(crate) fn backlog(&self) -> usize {
        self.registrations
            .load()
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.pending.load(Ordering::Relaxed))
            .sum()
    }

    pub(crate) fn unregister(&self, handle: &ListenerHandle) {
        handle.cancel();
        self.registrations.rcu(|current| {
            current
                .iter()
                .filter(|r| r.id != handle.id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    fn prune(&self) {
        self.registrations.rcu(|current| {
            current
                .iter()
                .filter(|r| r.is_live())
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// Receiving end of one subscription.
pub(super) struct Inbox<T> {
    rx: mpsc::UnboundedReceiver<Notification<T>>,
    pending: Arc<AtomicUsize>,
}

impl<T> Inbox<T> {
    pub(super) fn new(rx: mpsc::UnboundedReceiver<Notification<T>>) -> Self {
        Self {
            rx,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(super) async fn recv(&mut self) -> Option<Notification<T>> {
        let next = self.rx.recv().await;
        if next.is_some() {
            let _ = self
                .pending
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
        next
    }
}

async fn immediate_task<T>(
    collection: &'static str,
    listener: Arc<dyn CacheListener<T>>,
    mut inbox: Inbox<T>,
    cancel: CancellationToken,
) where
    T: Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = inbox.recv() => {
                let Some(notification) = next else { break };
                if let Err(e) = listener.on_event(&notification) {
                    warn!(
                        collection,
                        id = %notification.id,
                        event = %notification.event,
                        error = %e,
                        "listener failed"
                    );
                }
            }
        }
    }
    debug!(collection, "listener task stopped");
}
