//! Polling coordinator: one fetch loop, many subscribers.
//!
//! Owns the current snapshot and the command pass-through. Entities hold a
//! handle to this object, never a global, and re-resolve their own
//! record by topic after every refresh. The snapshot is only ever replaced
//! as a whole reference, so a reader sees either the old list or the new
//! one, never a partial merge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::api::{BemfaClient, UpdateFailed};
use crate::device::{DeviceRecord, Snapshot};

/// Fan-out notification to subscribers. Every refresh broadcasts, success
/// or not; subscribers recompute either way.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Refreshed { success: bool },
    CommandSent { topic: String },
}

pub struct Coordinator {
    client: BemfaClient,
    snapshot: RwLock<Snapshot>,
    last_success: AtomicBool,
    poll_interval: Duration,
    event_tx: broadcast::Sender<CoordinatorEvent>,
}

impl Coordinator {
    pub fn new(client: BemfaClient, poll_interval: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            client,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            last_success: AtomicBool::new(false),
            poll_interval,
            event_tx,
        }
    }

    /// The latest successful snapshot. Stale-but-available after a failed
    /// poll; empty before the first successful one.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().unwrap().clone()
    }

    /// Whether the most recent refresh succeeded.
    pub fn last_success(&self) -> bool {
        self.last_success.load(Ordering::Relaxed)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Fetch a fresh snapshot.
    ///
    /// On success the snapshot is replaced wholesale; on failure the old
    /// one is retained. Both outcomes are broadcast. The returned error is
    /// for the caller that needs it (setup's first refresh); the poll
    /// loop just logs and ticks again.
    pub async fn refresh(&self) -> Result<(), UpdateFailed> {
        let result = self.client.fetch_devices().await;
        self.ingest(result)
    }

    fn ingest(&self, result: Result<Vec<DeviceRecord>, UpdateFailed>) -> Result<(), UpdateFailed> {
        match result {
            Ok(devices) => {
                *self.snapshot.write().unwrap() = Arc::new(devices);
                self.last_success.store(true, Ordering::Relaxed);
                let _ = self.event_tx.send(CoordinatorEvent::Refreshed { success: true });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("poll failed, keeping previous snapshot: {}", e);
                self.last_success.store(false, Ordering::Relaxed);
                let _ = self.event_tx.send(CoordinatorEvent::Refreshed { success: false });
                Err(e)
            }
        }
    }

    /// Pass a command through to the cloud. Never touches the snapshot:
    /// the caller applies its own optimistic update and the next poll
    /// reconciles.
    pub async fn send_command(&self, topic: &str, msg: &str) -> bool {
        let ok = self.client.send_command(topic, msg).await;
        let _ = self.event_tx.send(CoordinatorEvent::CommandSent {
            topic: topic.to_string(),
        });
        ok
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }
}
