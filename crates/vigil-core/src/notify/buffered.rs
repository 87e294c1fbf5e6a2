// ── Buffered delivery ──

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::listener::Inbox;
use super::{CacheListener, Notification};

/// Collects events into a bounded batch and hands it to the listener when
/// the batch is full or the flush interval ticks. Whatever is pending when
/// the subscription ends is flushed once more.
pub(super) async fn buffered_task<T>(
    collection: &'static str,
    listener: Arc<dyn CacheListener<T>>,
    mut inbox: Inbox<T>,
    cancel: CancellationToken,
    capacity: usize,
    flush_interval: Duration,
) where
    T: Send + Sync + 'static,
{
    let mut buffer: Vec<Notification<T>> = Vec::with_capacity(capacity);
    let mut interval = tokio::time::interval(flush_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                flush(collection, listener.as_ref(), &mut buffer, capacity);
                break;
            }
            _ = interval.tick() => {
                flush(collection, listener.as_ref(), &mut buffer, capacity);
            }
            next = inbox.recv() => {
                let Some(notification) = next else {
                    flush(collection, listener.as_ref(), &mut buffer, capacity);
                    break;
                };
                buffer.push(notification);
                if buffer.len() >= capacity {
                    flush(collection, listener.as_ref(), &mut buffer, capacity);
                }
            }
        }
    }
    debug!(collection, "buffered listener task stopped");
}

fn flush<T: 'static>(
    collection: &'static str,
    listener: &dyn CacheListener<T>,
    buffer: &mut Vec<Notification<T>>,
    capacity: usize,
) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::replace(buffer, Vec::with_capacity(capacity));
    if let Err(e) = listener.on_batch(&batch) {
        warn!(collection, batch = batch.len(), error = %e, "buffered listener failed");
    }
}
