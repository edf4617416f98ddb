//! Fire-and-forget status publishing. Delivery is best-effort: the
//! persisted submission row is the source of truth, updates are a
//! latency optimization, so failures here are logged and swallowed.

use std::sync::Arc;

use async_trait::async_trait;
use common::update::StatusUpdate;
use mq::Mq;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, update: StatusUpdate);
}

/// Pushes updates onto a queue for out-of-process subscribers.
pub struct MqStatusPublisher {
    mq: Arc<Mq>,
    queue: String,
}

impl MqStatusPublisher {
    pub fn new(mq: Arc<Mq>, queue: impl Into<String>) -> Self {
        Self {
            mq,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl StatusPublisher for MqStatusPublisher {
    async fn publish(&self, update: StatusUpdate) {
        if let Err(e) = self.mq.publish(&self.queue, None, &update, None).await {
            warn!(
                submission_id = update.submission_id,
                status = %update.status,
                error = %e,
                "Failed to publish status update"
            );
        }
    }
}

/// In-process fan-out for embedded deployments. Lagging subscribers
/// may miss updates; they recover by reading the submission record.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<StatusUpdate>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl StatusPublisher for BroadcastPublisher {
    async fn publish(&self, update: StatusUpdate) {
        // send fails only when nobody is subscribed
        if self.tx.send(update).is_err() {
            debug!("No status subscribers");
        }
    }
}

/// Composes several publishers into one.
pub struct FanoutPublisher {
    targets: Vec<Arc<dyn StatusPublisher>>,
}

impl FanoutPublisher {
    pub fn new(targets: Vec<Arc<dyn StatusPublisher>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl StatusPublisher for FanoutPublisher {
    async fn publish(&self, update: StatusUpdate) {
        for target in &self.targets {
            target.publish(update.clone()).await;
        }
    }
}
