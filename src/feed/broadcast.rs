use super::poller::LogBatch;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Delivers each batch to every attached receiver. A slow receiver lags and
/// skips batches on its own side; it never holds up the sender or others.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<Arc<LogBatch>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LogBatch>> {
        self.sender.subscribe()
    }

    /// Returns the number of receivers the batch was handed to.
    pub fn broadcast(&self, batch: LogBatch) -> usize {
        // Err only means nobody is listening.
        self.sender.send(Arc::new(batch)).unwrap_or(0)
    }
}
