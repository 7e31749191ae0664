//! Background workers that drain the buffer queue and write bulk requests.

use crate::backend::{BulkItem, BulkRequest, SearchBackend};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::buffer::BufferQueue;
use crate::index::failure::FailureMonitor;
use crate::index::operations::IndexOperationMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct ConsumerStats {
    in_flight: AtomicU64,
    messages_acked: AtomicU64,
    messages_failed: AtomicU64,
    bulk_requests: AtomicU64,
    operations_written: AtomicU64,
    take_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerStatsSnapshot {
    pub in_flight: u64,
    pub messages_acked: u64,
    pub messages_failed: u64,
    pub bulk_requests: u64,
    pub operations_written: u64,
    pub take_errors: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            messages_acked: self.messages_acked.load(Ordering::SeqCst),
            messages_failed: self.messages_failed.load(Ordering::SeqCst),
            bulk_requests: self.bulk_requests.load(Ordering::SeqCst),
            operations_written: self.operations_written.load(Ordering::SeqCst),
            take_errors: self.take_errors.load(Ordering::SeqCst),
        }
    }
}

struct WorkerContext {
    config: IndexConfig,
    queue: Arc<dyn BufferQueue>,
    backend: Arc<dyn SearchBackend>,
    failure_monitor: Arc<FailureMonitor>,
    stats: Arc<ConsumerStats>,
    shutdown: AtomicBool,
}

/// Owns all backend write I/O. Each worker loops: take a window of messages,
/// flatten them into bulk items, write in chunks, then ack or fail every
/// message it took.
pub struct IndexBufferConsumer {
    ctx: Arc<WorkerContext>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexBufferConsumer {
    pub fn new(
        config: IndexConfig,
        queue: Arc<dyn BufferQueue>,
        backend: Arc<dyn SearchBackend>,
        failure_monitor: Arc<FailureMonitor>,
    ) -> Self {
        IndexBufferConsumer {
            ctx: Arc::new(WorkerContext {
                config,
                queue,
                backend,
                failure_monitor,
                stats: Arc::new(ConsumerStats::default()),
                shutdown: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `worker_count` workers. Must be called inside a tokio runtime.
    /// Calling it while workers are running does nothing.
    pub fn start(&self) {
        let Ok(mut workers) = self.workers.lock() else {
            return;
        };
        if !workers.is_empty() {
            return;
        }
        self.ctx.shutdown.store(false, Ordering::SeqCst);
        for worker_id in 0..self.ctx.config.worker_count.max(1) {
            let ctx = Arc::clone(&self.ctx);
            workers.push(tokio::spawn(run_worker(worker_id, ctx)));
        }
        tracing::info!(
            "[CONSUMER] started {} workers, buffer_size={}, buffer_timeout={}ms, max_bulk_size={}",
            workers.len(),
            self.ctx.config.buffer_size,
            self.ctx.config.buffer_timeout_ms,
            self.ctx.config.max_bulk_size
        );
    }

    /// Signal workers to stop after their current window and wait for them.
    pub async fn stop(&self) {
        self.ctx.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("[CONSUMER] worker panicked: {}", e);
            }
        }
        tracing::info!("[CONSUMER] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().map(|w| !w.is_empty()).unwrap_or(false)
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Process one batch of messages on the caller's task. Used by workers and
    /// by callers that drive the pipeline manually.
    pub async fn execute(&self, messages: Vec<IndexOperationMessage>) {
        execute(&self.ctx, messages).await;
    }
}

async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) {
    tracing::debug!("[CONSUMER {}] running", worker_id);
    while !ctx.shutdown.load(Ordering::SeqCst) {
        let taken = ctx
            .queue
            .take(ctx.config.buffer_size, ctx.config.buffer_timeout())
            .await;
        match taken {
            Ok(messages) if messages.is_empty() => continue,
            Ok(messages) => {
                let count = messages.len() as u64;
                ctx.stats.in_flight.fetch_add(count, Ordering::SeqCst);
                execute(&ctx, messages).await;
                ctx.stats.in_flight.fetch_sub(count, Ordering::SeqCst);
            }
            Err(e) => {
                ctx.stats.take_errors.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    "[CONSUMER {}] failed to dequeue, retrying in {}ms: {}",
                    worker_id,
                    ctx.config.failure_retry_ms,
                    e
                );
                tokio::time::sleep(ctx.config.failure_retry()).await;
            }
        }
    }
    tracing::debug!("[CONSUMER {}] exiting", worker_id);
}

async fn execute(ctx: &WorkerContext, messages: Vec<IndexOperationMessage>) {
    let started = std::time::Instant::now();

    // (message index, item) so chunk failures can be traced back to messages.
    let mut items: Vec<(usize, BulkItem)> = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        for op in message.index_requests() {
            items.push((
                i,
                BulkItem::Index {
                    index: op.write_alias.clone(),
                    id: op.document_id.clone(),
                    document: op.document.clone(),
                },
            ));
        }
        for op in message.deindex_requests() {
            for index in &op.indices {
                items.push((
                    i,
                    BulkItem::Delete {
                        index: index.clone(),
                        id: op.document_id.clone(),
                    },
                ));
            }
        }
    }

    let mut failed: HashMap<usize, IndexError> = HashMap::new();
    for chunk in items.chunks(ctx.config.max_bulk_size.max(1)) {
        let request = BulkRequest {
            items: chunk.iter().map(|(_, item)| item.clone()).collect(),
            refresh: ctx.config.forced_refresh,
        };
        if let Err(e) = send_bulk(ctx, request).await {
            for (i, _) in chunk {
                failed.entry(*i).or_insert_with(|| e.clone());
            }
        } else {
            ctx.stats
                .operations_written
                .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        }
    }

    let total = messages.len();
    let mut succeeded = Vec::new();
    let mut failures: Vec<(IndexOperationMessage, IndexError)> = Vec::new();
    for (i, message) in messages.into_iter().enumerate() {
        match failed.remove(&i) {
            Some(err) => failures.push((message, err)),
            None => succeeded.push(message),
        }
    }

    tracing::debug!(
        "[CONSUMER] flushed {} messages ({} items) in {}ms, {} failed",
        total,
        items.len(),
        started.elapsed().as_millis(),
        failures.len()
    );

    ctx.stats
        .messages_acked
        .fetch_add(succeeded.len() as u64, Ordering::SeqCst);
    ctx.stats
        .messages_failed
        .fetch_add(failures.len() as u64, Ordering::SeqCst);

    if !succeeded.is_empty() {
        ctx.queue.ack(succeeded).await;
    }
    for (message, err) in failures {
        ctx.queue.fail(vec![message], err).await;
    }
}

async fn send_bulk(ctx: &WorkerContext, request: BulkRequest) -> Result<()> {
    let total = request.items.len();
    ctx.stats.bulk_requests.fetch_add(1, Ordering::SeqCst);

    let response = match ctx.backend.bulk(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("[CONSUMER] unable to execute bulk of {} items: {}", total, e);
            ctx.failure_monitor.fail("Unable to execute batch", &e).await;
            if e.is_overloaded() {
                backoff(ctx).await;
            }
            return Err(e);
        }
    };
    ctx.failure_monitor.success();

    let failures = response.failures();
    if failures.is_empty() {
        return Ok(());
    }

    for item in &failures {
        tracing::error!(
            "[CONSUMER] unable to index id={}, index={}, status={}: {}",
            item.id,
            item.index,
            item.status,
            item.error.as_deref().unwrap_or("unknown")
        );
    }
    let overloaded = failures.iter().any(|i| i.is_overloaded());
    let message = failures
        .first()
        .and_then(|i| i.error.clone())
        .unwrap_or_default();
    let failed = failures.len();
    if overloaded {
        backoff(ctx).await;
        return Err(IndexError::Overloaded(format!(
            "{} of {} bulk items rejected: {}",
            failed, total, message
        )));
    }
    Err(IndexError::BulkFailure {
        failed,
        total,
        message,
    })
}

async fn backoff(ctx: &WorkerContext) {
    tracing::warn!(
        "[CONSUMER] backend overloaded, backing off {}ms",
        ctx.config.overload_backoff_ms
    );
    tokio::time::sleep(Duration::from_millis(ctx.config.overload_backoff_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::index::buffer::InMemoryBufferQueue;
    use crate::index::operations::DeIndexOperation;
    use crate::types::{EntityId, Version};

    fn consumer(
        config: IndexConfig,
        backend: Arc<MemoryBackend>,
    ) -> (IndexBufferConsumer, Arc<InMemoryBufferQueue>) {
        let queue = Arc::new(InMemoryBufferQueue::new(16, config.offer_timeout()));
        let monitor = Arc::new(FailureMonitor::new(backend.clone(), config.max_failures));
        let consumer = IndexBufferConsumer::new(config, queue.clone(), backend, monitor);
        (consumer, queue)
    }

    fn delete_message(n: usize) -> IndexOperationMessage {
        let mut message = IndexOperationMessage::new();
        for i in 0..n {
            message.add_deindex_request(DeIndexOperation::new(
                vec!["idx".to_string()],
                format!("doc{}", i),
                EntityId::generate("user"),
                Version::now(),
            ));
        }
        message
    }

    #[tokio::test]
    async fn chunks_by_max_bulk_size() {
        let backend = Arc::new(MemoryBackend::new());
        let config = IndexConfig {
            max_bulk_size: 2,
            ..IndexConfig::for_tests()
        };
        let (consumer, _queue) = consumer(config, backend.clone());
        let mut message = delete_message(5);
        let handle = message.completion().unwrap();
        consumer.execute(vec![message]).await;
        assert_eq!(handle.wait().await, Ok(()));
        assert_eq!(backend.bulk_calls(), 3);
        assert_eq!(consumer.stats().operations_written, 5);
    }

    #[tokio::test]
    async fn transport_error_fails_message() {
        let backend = Arc::new(MemoryBackend::new());
        let (consumer, _queue) = consumer(IndexConfig::for_tests(), backend.clone());
        backend.fail_next(IndexError::NoNodeAvailable("down".into()));
        let mut message = delete_message(1);
        let handle = message.completion().unwrap();
        consumer.execute(vec![message]).await;
        assert_eq!(
            handle.wait().await,
            Err(IndexError::NoNodeAvailable("down".into()))
        );
        assert_eq!(consumer.stats().messages_failed, 1);
    }

    #[tokio::test]
    async fn only_messages_in_failed_chunk_fail() {
        let backend = Arc::new(MemoryBackend::new());
        let config = IndexConfig {
            max_bulk_size: 1,
            ..IndexConfig::for_tests()
        };
        let (consumer, _queue) = consumer(config, backend.clone());
        let mut a = delete_message(1);
        let mut b = delete_message(1);
        let ha = a.completion().unwrap();
        let hb = b.completion().unwrap();
        backend.fail_next(IndexError::Backend("first chunk".into()));
        consumer.execute(vec![a, b]).await;
        assert!(ha.wait().await.is_err());
        assert_eq!(hb.wait().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn overloaded_bulk_backs_off() {
        let backend = Arc::new(MemoryBackend::new());
        let config = IndexConfig {
            overload_backoff_ms: 5_000,
            ..IndexConfig::for_tests()
        };
        let (consumer, _queue) = consumer(config, backend.clone());
        backend.overload_next_bulk(1);
        let mut message = delete_message(1);
        let handle = message.completion().unwrap();
        let before = tokio::time::Instant::now();
        consumer.execute(vec![message]).await;
        assert!(before.elapsed() >= Duration::from_millis(5_000));
        assert!(matches!(handle.wait().await, Err(IndexError::Overloaded(_))));
    }

    #[tokio::test]
    async fn workers_drain_queue_until_stopped() {
        let backend = Arc::new(MemoryBackend::new());
        let (consumer, queue) = consumer(IndexConfig::for_tests(), backend.clone());
        consumer.start();
        assert!(consumer.is_running());

        let mut message = delete_message(2);
        let handle = message.completion().unwrap();
        queue.offer(message).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        consumer.stop().await;
        assert!(!consumer.is_running());
        assert_eq!(consumer.stats().messages_acked, 1);
    }
}
