use tokio::sync::broadcast;
use tracing::{debug, info};

use super::CustodyEvent;

/// Destination for custody events. `publish` must return immediately.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: CustodyEvent);
}

/// Fan-out to in-process subscribers. Events published with no subscriber, or
/// missed by a lagging subscriber, are dropped.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<CustodyEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CustodyEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: CustodyEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            debug!("No subscribers for {} event", name);
        }
    }
}

/// Writes events to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: CustodyEvent) {
        info!(event = event.name(), "{}", event.summary());
    }
}
