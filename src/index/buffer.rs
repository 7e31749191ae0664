//! The backpressured hand-off between producers and the bulk consumer.

use crate::error::{IndexError, Result};
use crate::index::operations::IndexOperationMessage;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout_at, Instant};

#[async_trait]
pub trait BufferQueue: Send + Sync {
    /// Hand a message to the queue. Fails with [`IndexError::QueueFull`] when
    /// the queue stays full for the whole offer timeout.
    async fn offer(&self, message: IndexOperationMessage) -> Result<()>;

    /// Up to `max` messages. Waits at most `timeout` for the first one, then
    /// drains whatever else is immediately available. Empty on timeout.
    async fn take(&self, max: usize, timeout: Duration) -> Result<Vec<IndexOperationMessage>>;

    /// Messages were written to the backend.
    async fn ack(&self, messages: Vec<IndexOperationMessage>);

    /// Messages could not be written.
    async fn fail(&self, messages: Vec<IndexOperationMessage>, cause: IndexError);

    /// Messages currently waiting, where the implementation can tell.
    fn len(&self) -> usize {
        0
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-process queue. Completion handles are resolved by the consumer
/// once the backend has answered.
pub struct InMemoryBufferQueue {
    tx: mpsc::Sender<IndexOperationMessage>,
    rx: Mutex<mpsc::Receiver<IndexOperationMessage>>,
    capacity: usize,
    offer_timeout: Duration,
}

impl InMemoryBufferQueue {
    pub fn new(capacity: usize, offer_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        InMemoryBufferQueue {
            tx,
            rx: Mutex::new(rx),
            capacity: capacity.max(1),
            offer_timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl BufferQueue for InMemoryBufferQueue {
    async fn offer(&self, message: IndexOperationMessage) -> Result<()> {
        match self.tx.send_timeout(message, self.offer_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(mut message)) => {
                let err = IndexError::QueueFull {
                    capacity: self.capacity,
                };
                tracing::warn!(
                    "[BUF] queue full after {}ms, rejecting message with {} operations",
                    self.offer_timeout.as_millis(),
                    message.operation_count()
                );
                message.resolve(Err(err.clone()));
                Err(err)
            }
            Err(mpsc::error::SendTimeoutError::Closed(mut message)) => {
                let err = IndexError::Closed("index buffer closed".to_string());
                message.resolve(Err(err.clone()));
                Err(err)
            }
        }
    }

    async fn take(&self, max: usize, timeout: Duration) -> Result<Vec<IndexOperationMessage>> {
        let deadline = Instant::now() + timeout;
        let mut rx = match timeout_at(deadline, self.rx.lock()).await {
            Ok(rx) => rx,
            Err(_) => return Ok(Vec::new()),
        };

        let mut drained = Vec::new();
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(first)) => drained.push(first),
            Ok(None) | Err(_) => return Ok(drained),
        }
        while drained.len() < max {
            match rx.try_recv() {
                Ok(message) => drained.push(message),
                Err(_) => break,
            }
        }
        Ok(drained)
    }

    async fn ack(&self, messages: Vec<IndexOperationMessage>) {
        for mut message in messages {
            message.resolve(Ok(()));
        }
    }

    async fn fail(&self, messages: Vec<IndexOperationMessage>, cause: IndexError) {
        for mut message in messages {
            message.resolve(Err(cause.clone()));
        }
    }

    fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_returns_empty_on_timeout() {
        let queue = InMemoryBufferQueue::new(4, Duration::from_millis(10));
        let got = queue.take(10, Duration::from_millis(5)).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn take_drains_up_to_max() {
        let queue = InMemoryBufferQueue::new(8, Duration::from_millis(10));
        for _ in 0..5 {
            queue.offer(IndexOperationMessage::new()).await.unwrap();
        }
        assert_eq!(queue.len(), 5);
        let first = queue.take(3, Duration::from_millis(5)).await.unwrap();
        assert_eq!(first.len(), 3);
        let rest = queue.take(10, Duration::from_millis(5)).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_and_resolves_handle() {
        let queue = InMemoryBufferQueue::new(1, Duration::from_millis(5));
        queue.offer(IndexOperationMessage::new()).await.unwrap();

        let mut second = IndexOperationMessage::new();
        let handle = second.completion().unwrap();
        let err = queue.offer(second).await.unwrap_err();
        assert_eq!(err, IndexError::QueueFull { capacity: 1 });
        assert_eq!(handle.wait().await, Err(IndexError::QueueFull { capacity: 1 }));
    }

    #[tokio::test]
    async fn ack_and_fail_resolve_handles() {
        let queue = InMemoryBufferQueue::new(4, Duration::from_millis(10));
        let mut a = IndexOperationMessage::new();
        let mut b = IndexOperationMessage::new();
        let ha = a.completion().unwrap();
        let hb = b.completion().unwrap();
        queue.ack(vec![a]).await;
        queue
            .fail(vec![b], IndexError::Backend("boom".into()))
            .await;
        assert_eq!(ha.wait().await, Ok(()));
        assert_eq!(hb.wait().await, Err(IndexError::Backend("boom".into())));
    }
}
