use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::event::{EventEnvelope, LibraryEvent};

/// Default number of envelopes buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of [`EventEnvelope`]s.
///
/// Publishing never blocks and never fails the caller. A subscriber that
/// falls more than the channel capacity behind skips the oldest envelopes.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Wrap `event` in a fresh envelope and publish it.
    pub fn publish(&self, event: LibraryEvent, at: DateTime<Utc>) -> EventEnvelope {
        let envelope = EventEnvelope::new(event, at);
        self.publish_envelope(envelope.clone());
        envelope
    }

    pub fn publish_envelope(&self, envelope: EventEnvelope) {
        let name = envelope.event.name();
        match self.tx.send(envelope) {
            Ok(receivers) => tracing::debug!(event = name, receivers, "event published"),
            Err(_) => tracing::debug!(event = name, "event published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Consumer of published events.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle one envelope. Errors are logged and the loop moves on.
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Run `subscriber` against `bus` on a background task until every sender
/// is dropped or the task is aborted.
pub fn spawn_subscriber(bus: &EventBus, subscriber: Arc<dyn Subscriber>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let name = subscriber.name();
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if let Err(err) = subscriber.handle(&envelope).await {
                        tracing::warn!(
                            subscriber = name,
                            event_id = %envelope.id,
                            event = envelope.event.name(),
                            error = %err,
                            "event handler failed"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscriber = name, skipped, "subscriber lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(subscriber = name, "event bus closed, subscriber stopping");
                    break;
                }
            }
        }
    })
}
