use crate::backend::SearchBackend;
use crate::config::{BufferBackend, IndexConfig};
use crate::error::Result;
use crate::index::alias::AliasCache;
use crate::index::buffer::{BufferQueue, InMemoryBufferQueue};
use crate::index::consumer::{ConsumerStatsSnapshot, IndexBufferConsumer};
use crate::index::entity_index::{EntityIndex, IndexServices};
use crate::index::failure::FailureMonitor;
use crate::index::journal::{BrokerBufferQueue, JournalBroker};
use crate::query::cursor::{CursorManager, MemoryCursorStore};
use crate::types::{ApplicationScope, EntityId};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Composition root for the indexing layer.
///
/// Owns one backend handle, the buffer queue, the consumer workers, the
/// alias cache and the cursor store, and hands out one [`EntityIndex`] per
/// application, created lazily and shared.
///
/// ```rust,no_run
/// use edgeindex::{EntityIndexManager, IndexConfig, MemoryBackend};
/// use edgeindex::types::{ApplicationScope, EntityId};
/// use std::sync::Arc;
///
/// # async fn run() -> edgeindex::Result<()> {
/// let manager = EntityIndexManager::new(IndexConfig::from_env(), Arc::new(MemoryBackend::new()))?;
/// manager.start();
/// let app = ApplicationScope::new(EntityId::generate("application"));
/// let index = manager.entity_index(&app);
/// index.initialize().await?;
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct EntityIndexManager {
    services: IndexServices,
    consumer: IndexBufferConsumer,
    cursor_store: Arc<MemoryCursorStore>,
    loaded: DashMap<EntityId, Arc<EntityIndex>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl EntityIndexManager {
    /// Build with the queue `config.buffer_backend` selects.
    pub fn new(config: IndexConfig, backend: Arc<dyn SearchBackend>) -> Result<Arc<Self>> {
        config.validate()?;
        let queue: Arc<dyn BufferQueue> = match config.buffer_backend {
            BufferBackend::Memory => Arc::new(InMemoryBufferQueue::new(
                config.queue_capacity,
                config.offer_timeout(),
            )),
            BufferBackend::Journal => {
                let broker = JournalBroker::open(&config.journal_dir, config.journal_batch_limit)?;
                tracing::info!(
                    "[JOURNAL] buffering through {} ({} pending)",
                    config.journal_dir.display(),
                    broker.pending_count()
                );
                Arc::new(
                    BrokerBufferQueue::new(Arc::new(broker))
                        .with_redelivery(config.failure_retry(), config.max_deliveries),
                )
            }
        };
        Ok(Self::with_queue(config, backend, queue))
    }

    /// Build around an existing queue.
    pub fn with_queue(
        config: IndexConfig,
        backend: Arc<dyn SearchBackend>,
        queue: Arc<dyn BufferQueue>,
    ) -> Arc<Self> {
        let failure_monitor = Arc::new(FailureMonitor::new(
            Arc::clone(&backend),
            config.max_failures,
        ));
        let alias_cache = AliasCache::from_config(Arc::clone(&backend), &config);
        let cursor_store = Arc::new(MemoryCursorStore::new());
        let cursors = CursorManager::new(cursor_store.clone(), config.cursor_ttl());
        let consumer = IndexBufferConsumer::new(
            config.clone(),
            Arc::clone(&queue),
            Arc::clone(&backend),
            Arc::clone(&failure_monitor),
        );
        Arc::new(EntityIndexManager {
            services: IndexServices {
                config,
                backend,
                queue,
                alias_cache,
                failure_monitor,
                cursors,
            },
            consumer,
            cursor_store,
            loaded: DashMap::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Start consumer workers, the alias refresher and cursor expiry.
    pub fn start(&self) {
        self.consumer.start();
        let Ok(mut background) = self.background.lock() else {
            return;
        };
        if !background.is_empty() {
            return;
        }
        background.push(self.services.alias_cache.spawn_refresher());

        let store = Arc::clone(&self.cursor_store);
        let period = self.services.config.cursor_ttl().max(Duration::from_secs(1));
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!("[CURSOR] purged {} expired cursors", purged);
                }
            }
        }));
    }

    /// Stop workers (letting in-flight windows finish) and background tasks.
    pub async fn shutdown(&self) {
        self.consumer.stop().await;
        let handles: Vec<JoinHandle<()>> = match self.background.lock() {
            Ok(mut background) => background.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            handle.abort();
        }
    }

    pub fn entity_index(&self, scope: &ApplicationScope) -> Arc<EntityIndex> {
        Arc::clone(
            self.loaded
                .entry(scope.application.clone())
                .or_insert_with(|| {
                    Arc::new(EntityIndex::new(self.services.clone(), scope.clone()))
                })
                .value(),
        )
    }

    /// Forget a loaded application. Its indices are untouched.
    pub fn unload(&self, scope: &ApplicationScope) {
        self.loaded.remove(&scope.application);
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn config(&self) -> &IndexConfig {
        &self.services.config
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.services.backend
    }

    pub fn queue(&self) -> &Arc<dyn BufferQueue> {
        &self.services.queue
    }

    pub fn consumer(&self) -> &IndexBufferConsumer {
        &self.consumer
    }

    pub fn consumer_stats(&self) -> ConsumerStatsSnapshot {
        self.consumer.stats()
    }

    pub fn failure_monitor(&self) -> &Arc<FailureMonitor> {
        &self.services.failure_monitor
    }

    pub fn alias_cache(&self) -> &AliasCache {
        &self.services.alias_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn entity_indexes_are_shared_per_application() {
        let manager =
            EntityIndexManager::new(IndexConfig::for_tests(), Arc::new(MemoryBackend::new()))
                .unwrap();
        let a = ApplicationScope::new(EntityId::generate("application"));
        let b = ApplicationScope::new(EntityId::generate("application"));
        let first = manager.entity_index(&a);
        let again = manager.entity_index(&a);
        assert!(Arc::ptr_eq(&first, &again));
        manager.entity_index(&b);
        assert_eq!(manager.loaded_count(), 2);
        manager.unload(&a);
        assert_eq!(manager.loaded_count(), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = IndexConfig {
            queue_capacity: 0,
            ..IndexConfig::for_tests()
        };
        assert!(EntityIndexManager::new(config, Arc::new(MemoryBackend::new())).is_err());
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let manager =
            EntityIndexManager::new(IndexConfig::for_tests(), Arc::new(MemoryBackend::new()))
                .unwrap();
        manager.start();
        manager.start();
        assert!(manager.consumer().is_running());
        manager.shutdown().await;
        assert!(!manager.consumer().is_running());
    }
}
