//! Bounded single-producer/multi-consumer progress channel. The orchestrator
//! is the sole writer; the processor is the primary reader that translates
//! events into queue updates; any number of additional subscribers may
//! observe, and a slow or absent subscriber must never stall ingestion.

use tokio::sync::{broadcast, mpsc};

use crate::domain::TaskState;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

pub struct ProgressBus {
    primary_tx: mpsc::Sender<TaskState>,
    broadcast_tx: broadcast::Sender<TaskState>,
}

impl ProgressBus {
    /// `capacity` bounds the primary channel to the processor; additional
    /// subscribers get their own bounded ring buffer and drop the oldest
    /// event on overflow rather than block the publisher.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskState>) {
        let (primary_tx, primary_rx) = mpsc::channel(capacity.max(1));
        let (broadcast_tx, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        (
            Self {
                primary_tx,
                broadcast_tx,
            },
            primary_rx,
        )
    }

    /// Never blocks: if the primary channel is full the event is dropped,
    /// since progress is advisory and ingestion must not stall on it.
    pub fn publish(&self, event: TaskState) {
        if let Err(err) = self.primary_tx.try_send(event.clone()) {
            tracing::debug!("progress bus primary channel dropped event: {err}");
        }
        // No registered subscribers is not an error; ignore it.
        let _ = self.broadcast_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskState> {
        self.broadcast_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProcessingStage;

    #[tokio::test]
    async fn primary_receiver_gets_published_events() {
        let (bus, mut rx) = ProgressBus::new(4);
        bus.publish(TaskState::marker(ProcessingStage::DocumentChunking, "chunking"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, ProcessingStage::DocumentChunking);
    }

    #[tokio::test]
    async fn publish_never_blocks_when_primary_channel_is_full() {
        let (bus, _rx) = ProgressBus::new(1);
        for _ in 0..10 {
            bus.publish(TaskState::marker(ProcessingStage::Persisting, "x"));
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_independently_of_primary() {
        let (bus, mut primary_rx) = ProgressBus::new(4);
        let mut sub_rx = bus.subscribe();
        bus.publish(TaskState::marker(ProcessingStage::Completed, "done"));
        assert_eq!(
            primary_rx.recv().await.unwrap().stage,
            ProcessingStage::Completed
        );
        assert_eq!(sub_rx.recv().await.unwrap().stage, ProcessingStage::Completed);
    }
}
