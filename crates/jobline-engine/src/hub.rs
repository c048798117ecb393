//! Notification hub: fans job snapshots out to subscribers.

use crate::job::JobRecord;
use crate::metrics::HubMetrics;
use futures::Stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Subscriber identifier.
pub type SubscriberId = u64;

/// Broadcasts every job-state change to all current subscribers.
///
/// Each subscriber owns a bounded queue. Publishing never waits on a
/// subscriber: one whose queue is closed or full is removed.
pub struct NotificationHub {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<JobRecord>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl NotificationHub {
    /// Creates a hub with the given per-subscriber buffer.
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        })
    }

    /// Registers a new subscriber. It only sees snapshots published from now on.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        HubMetrics::update_subscribers(count);
        debug!(subscriber_id = id, subscribers = count, "Subscriber added");

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Removes a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            (subscribers.remove(&id).is_some(), subscribers.len())
        };
        if removed {
            HubMetrics::update_subscribers(count);
            debug!(subscriber_id = id, subscribers = count, "Subscriber removed");
        }
        removed
    }

    /// Delivers a snapshot to every subscriber. Returns the number reached.
    pub fn publish(&self, snapshot: &JobRecord) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<JobRecord>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(snapshot.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber_id = id, "Subscriber lagging, dropping it");
                    dropped.push(id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(id),
            }
        }

        for id in dropped {
            self.unsubscribe(id);
        }
        delivered
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<JobRecord>,
    hub: Weak<NotificationHub>,
}

impl Subscription {
    /// Subscriber ID, usable with [`NotificationHub::unsubscribe`].
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next snapshot. `None` once the subscription is removed
    /// and its queue drained.
    pub async fn recv(&mut self) -> Option<JobRecord> {
        self.rx.recv().await
    }

    /// Returns a queued snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<JobRecord> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = JobRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn snapshot(progress: u8) -> JobRecord {
        let mut job = JobRecord::new(vec!["a.txt".to_string()]).unwrap();
        job.progress = progress;
        job
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = NotificationHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        assert_eq!(hub.publish(&snapshot(10)), 2);
        assert_eq!(first.recv().await.unwrap().progress, 10);
        assert_eq!(second.recv().await.unwrap().progress, 10);
    }

    #[tokio::test]
    async fn test_per_subscriber_fifo() {
        let hub = NotificationHub::new(8);
        let mut sub = hub.subscribe();
        for progress in [0, 20, 40] {
            hub.publish(&snapshot(progress));
        }

        let received: Vec<u8> = (&mut sub).take(3).map(|job| job.progress).collect().await;
        assert_eq!(received, vec![0, 20, 40]);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let hub = NotificationHub::new(8);
        hub.publish(&snapshot(10));

        let mut late = hub.subscribe();
        assert!(late.try_recv().is_none());

        hub.publish(&snapshot(20));
        assert_eq!(late.recv().await.unwrap().progress, 20);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped_without_affecting_others() {
        let hub = NotificationHub::new(1);
        let _stalled = hub.subscribe();
        let mut healthy = hub.subscribe();

        assert_eq!(hub.publish(&snapshot(1)), 2);
        healthy.recv().await.unwrap();

        // The stalled subscriber never drained its single slot.
        assert_eq!(hub.publish(&snapshot(2)), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(healthy.recv().await.unwrap().progress, 2);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = NotificationHub::new(4);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(&snapshot(0)), 0);
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe_ends_stream() {
        let hub = NotificationHub::new(4);
        let mut sub = hub.subscribe();
        assert!(hub.unsubscribe(sub.id()));
        assert!(!hub.unsubscribe(sub.id()));
        assert!(sub.recv().await.is_none());
    }
}
