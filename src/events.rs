//! Typed outbound events.
//!
//! The core publishes onto a broadcast channel; notification, dashboard,
//! and database collaborators subscribe independently and can never block
//! or slow the mining path. A publish with no subscribers is a no-op.

use tokio::sync::broadcast;

/// Events emitted by the core.
#[derive(Debug, Clone)]
pub enum Event {
    MinerConnected {
        worker: String,
        miner_software: String,
    },
    MinerDisconnected {
        worker: String,
    },
    ShareAccepted {
        worker: String,
        share_difficulty: f64,
        is_block: bool,
    },
    BlockFound {
        chain: String,
        height: u64,
        block_hash: String,
        worker: String,
        share_difficulty: f64,
    },
    BlockRejected {
        chain: String,
        height: u64,
        reason: String,
    },
}

/// Broadcast fan-out for [`Event`].
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; lagging or absent subscribers are their problem.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(Event::MinerDisconnected {
            worker: "w".into(),
        });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::BlockFound {
            chain: "RXD".into(),
            height: 1,
            block_hash: "00".into(),
            worker: "w".into(),
            share_difficulty: 2.0,
        });
        match rx.recv().await.unwrap() {
            Event::BlockFound { chain, height, .. } => {
                assert_eq!(chain, "RXD");
                assert_eq!(height, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
