//! Broadcast-channel event bus.

use async_trait::async_trait;
use seine_types::{CrawlError, CrawlEvent, EventSink};
use tokio::sync::broadcast;
use tracing::debug;

/// [`EventSink`] over a `tokio::sync::broadcast` channel.
///
/// Publishing never fails the caller: without subscribers the event is
/// dropped, and a lagging subscriber loses the oldest events rather than
/// blocking the engine.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<CrawlEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventSink for BroadcastEventBus {
    async fn publish(&self, event: CrawlEvent) -> Result<(), CrawlError> {
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(receivers, "event published");
            }
            Err(broadcast::error::SendError(event)) => {
                debug!(event_type = event.event_type(), "event dropped, no subscribers");
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.sender.subscribe()
    }
}
