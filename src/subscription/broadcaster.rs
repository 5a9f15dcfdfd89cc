use crate::state::StateStore;
use crate::subscription::protocol::encode_snapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Default per-subscriber outbound buffer (in snapshots)
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Encoded snapshot shared by every subscriber
pub type SnapshotFrame = Arc<str>;

/// Registry entry for a live subscriber
#[derive(Clone, Debug)]
struct SubscriberInfo {
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

/// Fans full state snapshots out to every registered subscriber.
///
/// Each subscriber reads from its own cursor on a bounded broadcast channel.
/// A subscriber that falls more than `buffer` snapshots behind loses the
/// oldest ones and resumes at the newest, so a slow dashboard never stalls
/// ingestion.
pub struct Broadcaster {
    store: Arc<StateStore>,

    /// Live subscriber set (id -> info)
    subscribers: Arc<DashMap<Uuid, SubscriberInfo>>,

    tx: broadcast::Sender<SnapshotFrame>,

    /// Keeps snapshot-then-send atomic so frames leave in state order
    publish_lock: Mutex<()>,
}

impl Broadcaster {
    pub fn new(store: Arc<StateStore>, buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));

        Self {
            store,
            subscribers: Arc::new(DashMap::new()),
            tx,
            publish_lock: Mutex::new(()),
        }
    }

    /// Add a subscriber and capture its initial snapshot.
    ///
    /// The update cursor is taken before the snapshot, so no reading accepted
    /// after registration can be missed (at worst one is seen twice).
    pub fn register(&self, peer: Option<SocketAddr>) -> Result<Subscription> {
        let updates = self.tx.subscribe();
        let initial = self.current_frame()?;

        let id = Uuid::now_v7();
        self.subscribers.insert(
            id,
            SubscriberInfo {
                peer,
                connected_at: Utc::now(),
            },
        );

        info!(
            subscriber_id = %id,
            peer = ?peer,
            subscribers = self.subscribers.len(),
            "Subscriber registered"
        );

        Ok(Subscription {
            id,
            initial: Some(initial),
            updates,
            registry: Arc::clone(&self.subscribers),
        })
    }

    /// Send the current full snapshot to every subscriber.
    ///
    /// Returns the number of subscribers the frame was queued for.
    pub fn publish(&self) -> Result<usize> {
        if self.tx.receiver_count() == 0 {
            return Ok(0);
        }

        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let frame = self.current_frame()?;

        // No receivers left between the check and the send is fine
        let delivered = self.tx.send(frame).unwrap_or(0);
        debug!(subscribers = delivered, "Published snapshot");

        Ok(delivered)
    }

    /// Encode the store's current state
    pub fn current_frame(&self) -> Result<SnapshotFrame> {
        let snapshot = self.store.snapshot();
        let encoded = encode_snapshot(&snapshot).context("Failed to encode snapshot")?;
        Ok(Arc::from(encoded))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// A registered subscriber's handle.
///
/// Dropping it removes the subscriber from the set, so every exit path of a
/// session (disconnect, send failure, shutdown) unregisters.
pub struct Subscription {
    id: Uuid,
    initial: Option<SnapshotFrame>,
    updates: broadcast::Receiver<SnapshotFrame>,
    registry: Arc<DashMap<Uuid, SubscriberInfo>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The snapshot captured at registration; `None` once taken
    pub fn take_initial(&mut self) -> Option<SnapshotFrame> {
        self.initial.take()
    }

    /// Wait for the next published snapshot.
    ///
    /// Lagging past the buffer skips stale frames; `None` means the broadcaster is gone.
    pub async fn next_frame(&mut self) -> Option<SnapshotFrame> {
        loop {
            match self.updates.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        subscriber_id = %self.id,
                        skipped = skipped,
                        "Subscriber lagged, dropped oldest snapshots"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some((_, info)) = self.registry.remove(&self.id) {
            let connected_secs = (Utc::now() - info.connected_at).num_seconds();
            info!(
                subscriber_id = %self.id,
                peer = ?info.peer,
                connected_secs = connected_secs,
                subscribers = self.registry.len(),
                "Subscriber removed"
            );
        }
    }
}
