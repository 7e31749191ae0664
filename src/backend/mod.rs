//! The search backend boundary.
//!
//! Everything past [`SearchBackend`] is a black box: a cluster that takes bulk
//! writes, answers searches with continuation tokens, and manages indices and
//! aliases. [`memory::MemoryBackend`] implements it in-process; the
//! `edgeindex-http` crate implements it over the REST API.

mod eval;
pub mod memory;
pub mod model;

pub use memory::MemoryBackend;
pub use model::{
    AliasAction, BoolQuery, BulkItem, BulkItemResponse, BulkRequest, BulkResponse,
    CreateIndexOutcome, Health, IndexSettings, QueryNode, SearchHit, SearchRequest,
    SearchResponse, SortClause, SortOrder,
};

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse>;

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse>;

    /// Next page of a scroll started by [`SearchBackend::search`].
    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse>;

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;

    /// Returns the number of deleted documents.
    async fn delete_by_query(&self, indices: &[String], query: QueryNode) -> Result<u64>;

    async fn create_index(&self, name: &str, settings: IndexSettings) -> Result<CreateIndexOutcome>;

    /// Apply all actions atomically.
    async fn update_aliases(&self, actions: Vec<AliasAction>) -> Result<()>;

    /// Indices an alias points at. Empty when the alias does not exist.
    async fn get_alias_indices(&self, alias: &str) -> Result<Vec<String>>;

    async fn refresh(&self, indices: &[String]) -> Result<()>;

    /// Cluster health, or one index's health when `index` is given.
    async fn health(&self, index: Option<&str>) -> Result<Health>;

    /// Drop and rebuild the underlying connection.
    async fn reset(&self) -> Result<()>;
}
