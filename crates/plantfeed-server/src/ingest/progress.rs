//! Progress publishing
//!
//! Runs write events into a [`ProgressSender`] and never wait on anyone.
//! A background task drains the queue and fans each event out to the
//! run's own topic and to the all-runs feed. Delivery is at-most-once: a
//! subscriber only sees events published after it subscribed, and a
//! subscriber that falls behind loses the oldest events.

use plantfeed_common::types::ProgressEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-topic buffer before slow subscribers start lagging.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Write end handed to run attempts.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// Queue `event`; failures are logged and dropped.
    pub fn publish(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(run_id = %e.0.run_id, stage = ?e.0.stage, "Progress publisher is gone, dropping event");
        }
    }
}

pub struct ProgressPublisher {
    topics: Mutex<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
    all: broadcast::Sender<ProgressEvent>,
    capacity: usize,
}

impl ProgressPublisher {
    /// Create the publisher and spawn its drain task on the current runtime.
    pub fn start(capacity: usize) -> (Arc<Self>, ProgressSender) {
        let capacity = capacity.max(1);
        let (all, _) = broadcast::channel(capacity);
        let publisher = Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            all,
            capacity,
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let drain = Arc::clone(&publisher);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                drain.fan_out(event).await;
            }
            debug!("Progress queue closed");
        });

        (publisher, ProgressSender { tx })
    }

    /// Future events of one run. The topic is dropped after the run's final
    /// event, so subscribe before or while the run is active.
    pub async fn subscribe(&self, run_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Future events of every run.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ProgressEvent> {
        self.all.subscribe()
    }

    async fn fan_out(&self, event: ProgressEvent) {
        let run_id = event.run_id;
        let is_final = event.stage.is_final();

        {
            let mut topics = self.topics.lock().await;
            if let Some(topic) = topics.get(&run_id) {
                if topic.send(event.clone()).is_err() {
                    debug!(run_id = %run_id, "No subscribers on run topic");
                }
            }
            if is_final {
                topics.remove(&run_id);
            }
        }

        // Err only means nobody is listening.
        let _ = self.all.send(event);
    }
}
