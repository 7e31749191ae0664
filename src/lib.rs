//! # edgeindex
//!
//! The indexing and query-translation layer of a multi-tenant entity store.
//! Entity mutations are flattened into deterministic, idempotent search
//! documents and written through a buffered, batched pipeline; queries in a
//! small boolean/range/geo language are translated into backend searches
//! that page with opaque cursors.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use edgeindex::types::{ApplicationScope, Entity, EntityId, IndexEdge, NodeRole, SearchTypes, Version};
//! use edgeindex::{EntityIndexManager, IndexConfig, MemoryBackend};
//! use std::sync::Arc;
//!
//! # async fn run() -> edgeindex::Result<()> {
//! let manager = EntityIndexManager::new(IndexConfig::from_env(), Arc::new(MemoryBackend::new()))?;
//! manager.start();
//!
//! let app = ApplicationScope::new(EntityId::generate("application"));
//! let index = manager.entity_index(&app);
//! index.initialize().await?;
//!
//! let owner = EntityId::generate("user");
//! let edge = IndexEdge::new(owner, "pets", NodeRole::Source, 1);
//! let pet = Entity::new(EntityId::generate("pet"), Version::now()).with_property("name", "Rex");
//!
//! let mut batch = index.create_batch();
//! batch.index(&edge, &pet)?;
//! batch.execute().await?.wait().await?;
//!
//! let page = index
//!     .search_ql(&edge.search_edge(), &SearchTypes::all(), "select * where name = 'rex'", None)
//!     .await?;
//! assert_eq!(page.len(), 1);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! The remote backend client lives in the `edgeindex-http` crate; any type
//! implementing [`SearchBackend`] can be plugged in.

pub mod backend;
pub mod config;
pub mod error;
pub mod index;
pub mod query;
pub mod telemetry;
pub mod types;

pub use backend::{MemoryBackend, SearchBackend};
pub use config::{BufferBackend, IndexConfig};
pub use error::{IndexError, Result};
pub use index::{
    CompletionHandle, EntityIndex, EntityIndexBatch, EntityIndexManager, IndexBufferConsumer,
};
pub use query::{parse_query, ParsedQuery};
pub use types::*;
