//! Typed publish-subscribe event bus.
//!
//! A thin broadcast channel carrying [`PipelineEvent`] envelopes. Delivery
//! is best-effort: subscribers run in their own loops and a handler error
//! never propagates to the publisher or blocks other subscribers. Within a
//! finding's lineage events arrive in causal order because each stage only
//! publishes after committing its own write.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use vantage_core::events::PipelineEvent;

/// Event envelope with publication time.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub time: DateTime<Utc>,
    pub event: PipelineEvent,
}

/// Broadcast bus for pipeline events.
#[derive(Debug, Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    /// Subscribe to all events; receivers filter by kind.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Publish an event. A bus with no subscribers drops the event silently
    /// (nothing is listening yet; the store remains the source of truth).
    pub fn publish(&self, event: PipelineEvent) {
        let kind = event.kind();
        let receivers = self.tx.receiver_count();
        match self.tx.send(Envelope {
            time: Utc::now(),
            event,
        }) {
            Ok(delivered) => {
                trace!(kind = %kind, delivered, "event published");
            }
            Err(_) => {
                debug!(kind = %kind, receivers, "event published with no subscribers");
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
