#![allow(dead_code)]

use edgeindex::{
    ApplicationScope, Entity, EntityId, EntityIndex, EntityIndexManager, IndexConfig, IndexEdge,
    MemoryBackend, NodeRole, SearchEdge, Version,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub struct TestIndex {
    pub backend: Arc<MemoryBackend>,
    pub manager: Arc<EntityIndexManager>,
    pub index: Arc<EntityIndex>,
    pub scope: ApplicationScope,
}

pub async fn setup() -> TestIndex {
    setup_with(IndexConfig::for_tests()).await
}

pub async fn setup_with(config: IndexConfig) -> TestIndex {
    edgeindex::telemetry::init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let manager = EntityIndexManager::new(config, backend.clone()).unwrap();
    manager.start();
    let scope = scope();
    let index = manager.entity_index(&scope);
    index.initialize().await.unwrap();
    TestIndex {
        backend,
        manager,
        index,
        scope,
    }
}

pub fn scope() -> ApplicationScope {
    ApplicationScope::new(EntityId::new(Uuid::new_v4(), "application"))
}

/// The application owns everything under a named collection edge.
pub fn collection_edge(scope: &ApplicationScope, name: &str, timestamp: i64) -> IndexEdge {
    IndexEdge::new(scope.application.clone(), name, NodeRole::Source, timestamp)
}

pub fn search_edge(scope: &ApplicationScope, name: &str) -> SearchEdge {
    SearchEdge::new(scope.application.clone(), name, NodeRole::Source)
}

pub fn entity(entity_type: &str, props: Value) -> Entity {
    Entity::from_json(EntityId::generate(entity_type), Version::now(), &props).unwrap()
}

/// Index each entity under `edge` in one batch and wait until it is written.
pub async fn index_all(index: &EntityIndex, edge: &IndexEdge, entities: &[Entity]) {
    let mut batch = index.create_batch();
    for entity in entities {
        batch.index(edge, entity).unwrap();
    }
    batch.execute().await.unwrap().wait().await.unwrap();
}
