use crate::error::{IndexError, Result};
use crate::index::alias::{AliasCache, IndexAlias};
use crate::index::buffer::BufferQueue;
use crate::index::document::{create_index_doc_id, flatten};
use crate::index::operations::{
    CompletionHandle, DeIndexOperation, IndexOperation, IndexOperationMessage,
};
use crate::types::{ApplicationScope, CandidateResult, Entity, EntityId, IndexEdge, SearchEdge, Version};
use std::sync::Arc;

/// Collects index and de-index operations for one application and hands
/// them to the buffer queue as a single message.
///
/// Flattening happens eagerly in [`EntityIndexBatch::index`], so a malformed
/// entity fails there and never reaches the queue.
pub struct EntityIndexBatch {
    scope: ApplicationScope,
    alias: IndexAlias,
    alias_cache: AliasCache,
    queue: Arc<dyn BufferQueue>,
    message: IndexOperationMessage,
}

impl EntityIndexBatch {
    pub(crate) fn new(
        scope: ApplicationScope,
        alias: IndexAlias,
        alias_cache: AliasCache,
        queue: Arc<dyn BufferQueue>,
    ) -> Self {
        EntityIndexBatch {
            scope,
            alias,
            alias_cache,
            queue,
            message: IndexOperationMessage::new(),
        }
    }

    /// Queue an upsert of `entity` under `edge` through the write alias.
    pub fn index(&mut self, edge: &IndexEdge, entity: &Entity) -> Result<&mut Self> {
        let document = flatten(&self.scope, edge, entity)?;
        tracing::trace!(
            "[BATCH] index {} into {}",
            document.id,
            self.alias.write_alias
        );
        self.message
            .add_index_request(IndexOperation::new(self.alias.write_alias.clone(), document));
        Ok(self)
    }

    /// Queue removal of one version of an entity from every index behind
    /// the read and write aliases.
    pub async fn deindex(
        &mut self,
        edge: &SearchEdge,
        id: &EntityId,
        version: Version,
    ) -> Result<&mut Self> {
        edge.validate()?;
        id.validate()?;
        let indices = self.alias_cache.unique_indexes(&self.alias).await?;
        let document_id = create_index_doc_id(&self.scope, id, &version, edge);
        tracing::trace!("[BATCH] deindex {} from {:?}", document_id, indices);
        self.message.add_deindex_request(DeIndexOperation::new(
            indices,
            document_id,
            id.clone(),
            version,
        ));
        Ok(self)
    }

    pub async fn deindex_candidate(
        &mut self,
        edge: &SearchEdge,
        candidate: &CandidateResult,
    ) -> Result<&mut Self> {
        self.deindex(edge, &candidate.id, candidate.version).await
    }

    pub fn len(&self) -> usize {
        self.message.operation_count()
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    /// Offer the collected operations to the buffer queue.
    ///
    /// The returned handle resolves once the operations are written (or, for
    /// a durable queue, once they are accepted). An empty batch resolves
    /// immediately without touching the queue.
    pub async fn execute(self) -> Result<CompletionHandle> {
        let mut message = self.message;
        if message.is_empty() {
            return Ok(CompletionHandle::resolved(Ok(())));
        }
        let handle = message
            .completion()
            .ok_or_else(|| IndexError::Closed("batch already executed".to_string()))?;
        let operations = message.operation_count();
        self.queue.offer(message).await?;
        tracing::debug!("[BATCH] offered {} operations", operations);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AliasAction, IndexSettings, MemoryBackend, SearchBackend};
    use crate::index::buffer::InMemoryBufferQueue;
    use crate::types::NodeRole;
    use std::time::Duration;
    use uuid::Uuid;

    fn scope() -> ApplicationScope {
        ApplicationScope::new(EntityId::new(Uuid::new_v4(), "application"))
    }

    fn alias() -> IndexAlias {
        IndexAlias {
            read_alias: "app_read_alias".into(),
            write_alias: "app_write_alias".into(),
        }
    }

    async fn setup() -> (EntityIndexBatch, Arc<InMemoryBufferQueue>) {
        let backend = Arc::new(MemoryBackend::new());
        let settings = IndexSettings {
            number_of_shards: 1,
            number_of_replicas: 0,
        };
        backend.create_index("idx_a", settings).await.unwrap();
        backend.create_index("idx_b", settings).await.unwrap();
        backend
            .update_aliases(vec![
                AliasAction::Add {
                    index: "idx_a".into(),
                    alias: "app_read_alias".into(),
                },
                AliasAction::Add {
                    index: "idx_b".into(),
                    alias: "app_read_alias".into(),
                },
                AliasAction::Add {
                    index: "idx_b".into(),
                    alias: "app_write_alias".into(),
                },
            ])
            .await
            .unwrap();
        let cache = AliasCache::new(backend, Duration::from_secs(60), 10);
        let queue = Arc::new(InMemoryBufferQueue::new(10, Duration::from_millis(50)));
        let batch = EntityIndexBatch::new(scope(), alias(), cache, queue.clone());
        (batch, queue)
    }

    #[tokio::test]
    async fn empty_batch_resolves_without_queueing() {
        let (batch, queue) = setup().await;
        assert!(batch.is_empty());
        let handle = batch.execute().await.unwrap();
        assert!(handle.wait().await.is_ok());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn invalid_entity_fails_fast() {
        let (mut batch, _) = setup().await;
        let edge = IndexEdge::new(EntityId::generate("user"), "friends", NodeRole::Source, 1);
        let mut entity = Entity::new(EntityId::generate("user"), Version::now());
        entity.version = None;
        assert!(matches!(
            batch.index(&edge, &entity),
            Err(IndexError::InvalidEntity(_))
        ));
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn deindex_targets_unique_read_and_write_indices() {
        let (mut batch, queue) = setup().await;
        let edge = SearchEdge::new(EntityId::generate("user"), "friends", NodeRole::Source);
        let id = EntityId::generate("user");
        batch.deindex(&edge, &id, Version::now()).await.unwrap();
        assert_eq!(batch.len(), 1);
        let _handle = batch.execute().await.unwrap();

        let taken = queue.take(10, Duration::from_millis(10)).await.unwrap();
        let op = taken[0].deindex_requests().iter().next().unwrap();
        assert_eq!(op.indices, vec!["idx_a".to_string(), "idx_b".to_string()]);
        assert_eq!(op.entity_id, id);
    }
}
