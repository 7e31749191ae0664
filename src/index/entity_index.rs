//! Per-application facade over the index: lifecycle, writes, search and
//! paging.

use crate::backend::{
    AliasAction, BoolQuery, CreateIndexOutcome, Health, IndexSettings, QueryNode, SearchBackend,
    SearchRequest, SearchResponse, SortClause, SortOrder,
};
use crate::config::IndexConfig;
use crate::error::Result;
use crate::index::alias::{AliasCache, AliasType, IndexAlias, IndexLocationStrategy};
use crate::index::batch::EntityIndexBatch;
use crate::index::buffer::BufferQueue;
use crate::index::document::{
    application_id, context_name, parse_index_doc_id, APPLICATION_ID_FIELDNAME,
    EDGE_SEARCH_FIELDNAME, ENTITY_ID_FIELDNAME, ENTITY_VERSION_FIELDNAME,
};
use crate::index::failure::FailureMonitor;
use crate::index::fields::FieldValue;
use crate::query::ast::ParsedQuery;
use crate::query::cursor::CursorManager;
use crate::query::parser::parse_query;
use crate::query::request::SearchRequestBuilder;
use crate::types::{
    ApplicationScope, CandidateResult, CandidateResults, EntityId, SearchEdge, SearchTypes,
    Version,
};
use std::sync::Arc;

/// Page size for internal scans that collect every match.
const SCAN_PAGE_SIZE: usize = 100;

/// Shared collaborators every [`EntityIndex`] of one manager uses.
#[derive(Clone)]
pub struct IndexServices {
    pub config: IndexConfig,
    pub backend: Arc<dyn SearchBackend>,
    pub queue: Arc<dyn BufferQueue>,
    pub alias_cache: AliasCache,
    pub failure_monitor: Arc<FailureMonitor>,
    pub cursors: CursorManager,
}

pub struct EntityIndex {
    services: IndexServices,
    strategy: IndexLocationStrategy,
    alias: IndexAlias,
    requests: SearchRequestBuilder,
}

impl EntityIndex {
    pub fn new(services: IndexServices, scope: ApplicationScope) -> Self {
        let strategy = IndexLocationStrategy::new(&services.config, scope.clone());
        let alias = strategy.alias();
        let requests =
            SearchRequestBuilder::from_config(&services.config, scope, alias.read_alias.clone());
        EntityIndex {
            services,
            strategy,
            alias,
            requests,
        }
    }

    pub fn application_scope(&self) -> &ApplicationScope {
        self.strategy.application_scope()
    }

    pub fn alias(&self) -> &IndexAlias {
        &self.alias
    }

    /// Create the physical index and aliases unless both aliases already
    /// resolve to something.
    pub async fn initialize(&self) -> Result<()> {
        let backend = &self.services.backend;
        let read = backend.get_alias_indices(&self.alias.read_alias).await?;
        let write = backend.get_alias_indices(&self.alias.write_alias).await?;
        if !read.is_empty() && !write.is_empty() {
            tracing::debug!(
                "[ALIAS] {} already initialized on {:?}",
                self.alias.read_alias,
                read
            );
            return Ok(());
        }
        self.add_index(
            None,
            self.strategy.number_of_shards(),
            self.strategy.number_of_replicas(),
        )
        .await
    }

    /// Create an index (existing is fine) and point the aliases at it.
    pub async fn add_index(&self, suffix: Option<&str>, shards: u32, replicas: u32) -> Result<()> {
        let name = self.strategy.index_name(suffix);
        let outcome = self
            .services
            .backend
            .create_index(
                &name,
                IndexSettings {
                    number_of_shards: shards,
                    number_of_replicas: replicas,
                },
            )
            .await?;
        match outcome {
            CreateIndexOutcome::Created => tracing::info!(
                "[ALIAS] created index {} (shards={}, replicas={})",
                name,
                shards,
                replicas
            ),
            CreateIndexOutcome::AlreadyExists => {
                tracing::debug!("[ALIAS] index {} already exists", name)
            }
        }
        self.add_alias(&name).await
    }

    /// Move the write alias to `index` and add the read alias to it. Older
    /// indices stay readable.
    pub async fn add_alias(&self, index: &str) -> Result<()> {
        let backend = &self.services.backend;
        let mut actions: Vec<AliasAction> = backend
            .get_alias_indices(&self.alias.write_alias)
            .await?
            .into_iter()
            .filter(|existing| existing != index)
            .map(|existing| AliasAction::Remove {
                index: existing,
                alias: self.alias.write_alias.clone(),
            })
            .collect();
        actions.push(AliasAction::Add {
            index: index.to_string(),
            alias: self.alias.read_alias.clone(),
        });
        actions.push(AliasAction::Add {
            index: index.to_string(),
            alias: self.alias.write_alias.clone(),
        });
        backend.update_aliases(actions).await?;
        self.services.alias_cache.invalidate(&self.alias);
        tracing::info!(
            "[ALIAS] {} and {} now point at {}",
            self.alias.read_alias,
            self.alias.write_alias,
            index
        );
        Ok(())
    }

    pub async fn get_indexes(&self, alias_type: AliasType) -> Result<Vec<String>> {
        self.services.alias_cache.get_indexes(&self.alias, alias_type).await
    }

    pub async fn unique_indexes(&self) -> Result<Vec<String>> {
        self.services.alias_cache.unique_indexes(&self.alias).await
    }

    /// Make every write so far visible to search.
    pub async fn refresh(&self) -> Result<()> {
        let indices = self.unique_indexes().await?;
        if indices.is_empty() {
            return Ok(());
        }
        let result = self.services.backend.refresh(&indices).await;
        self.observe("refresh", result).await
    }

    pub fn create_batch(&self) -> EntityIndexBatch {
        EntityIndexBatch::new(
            self.application_scope().clone(),
            self.alias.clone(),
            self.services.alias_cache.clone(),
            Arc::clone(&self.services.queue),
        )
    }

    /// One page of candidates under `edge`. A full page carries a cursor
    /// for [`EntityIndex::next_page`].
    pub async fn search(
        &self,
        edge: &SearchEdge,
        types: &SearchTypes,
        query: &ParsedQuery,
        limit: usize,
        offset: usize,
    ) -> Result<CandidateResults> {
        let request = self.requests.build(edge, types, query, limit, offset)?;
        tracing::debug!(
            "[SEARCH] {} limit={} offset={} sort={:?}",
            context_name(self.application_scope(), edge),
            limit,
            offset,
            request.sort
        );
        let result = self.services.backend.search(request).await;
        let response = self.observe("search", result).await?;
        self.page(response, limit, offset).await
    }

    /// Parse and run a query string. The page size is `limit`, else the
    /// query's own `limit` clause, else the configured default.
    pub async fn search_ql(
        &self,
        edge: &SearchEdge,
        types: &SearchTypes,
        ql: &str,
        limit: Option<usize>,
    ) -> Result<CandidateResults> {
        let query = parse_query(ql)?;
        let limit = self.services.config.page_size(limit.or(query.limit));
        self.search(edge, types, &query, limit, 0).await
    }

    /// The page after the one `cursor` was issued with.
    pub async fn next_page(&self, cursor: &str) -> Result<CandidateResults> {
        let record = self.services.cursors.resolve(cursor).await?;
        let result = self
            .services
            .backend
            .scroll(&record.token, self.services.cursors.ttl())
            .await;
        let response = self.observe("scroll", result).await?;
        self.page(response, record.page_size, 0).await
    }

    async fn page(
        &self,
        response: SearchResponse,
        page_size: usize,
        offset: usize,
    ) -> Result<CandidateResults> {
        let candidates = candidates(&response);
        let cursor = self
            .services
            .cursors
            .mint(response.scroll_id.as_deref(), response.hits.len(), page_size)
            .await?;
        if cursor.is_none() {
            if let Some(scroll_id) = &response.scroll_id {
                self.clear_scroll(scroll_id).await;
            }
        }
        Ok(CandidateResults::new(candidates, cursor, offset))
    }

    /// Every document indexed for `entity_id` under the edge's context.
    pub async fn get_all_edge_documents(
        &self,
        edge: &SearchEdge,
        entity_id: &EntityId,
    ) -> Result<CandidateResults> {
        edge.validate()?;
        entity_id.validate()?;
        let query = QueryNode::filter(vec![
            QueryNode::term(
                EDGE_SEARCH_FIELDNAME,
                FieldValue::String(context_name(self.application_scope(), edge)),
            ),
            QueryNode::term(ENTITY_ID_FIELDNAME, FieldValue::String(entity_id.to_string())),
        ]);
        let found = self.scan(query).await?;
        Ok(CandidateResults::new(found, None, 0))
    }

    /// Every indexed version of `entity_id` at or before `marked`, across
    /// all edges.
    pub async fn get_all_entity_versions_before_marked_version(
        &self,
        entity_id: &EntityId,
        marked: Version,
    ) -> Result<CandidateResults> {
        entity_id.validate()?;
        let query = QueryNode::Bool(BoolQuery {
            filter: vec![
                QueryNode::term(
                    APPLICATION_ID_FIELDNAME,
                    FieldValue::String(application_id(self.application_scope())),
                ),
                QueryNode::term(ENTITY_ID_FIELDNAME, FieldValue::String(entity_id.to_string())),
                QueryNode::Range {
                    field: ENTITY_VERSION_FIELDNAME.to_string(),
                    gt: None,
                    gte: None,
                    lt: None,
                    lte: Some(FieldValue::String(marked.to_string())),
                },
            ],
            ..BoolQuery::default()
        });
        let found = self.scan(query).await?;
        Ok(CandidateResults::new(found, None, 0))
    }

    /// Delete every document of this application from every index behind
    /// the aliases.
    pub async fn delete_application(&self) -> Result<u64> {
        let indices = self.unique_indexes().await?;
        if indices.is_empty() {
            return Ok(0);
        }
        let app = application_id(self.application_scope());
        let result = self
            .services
            .backend
            .delete_by_query(
                &indices,
                QueryNode::term(APPLICATION_ID_FIELDNAME, FieldValue::String(app.clone())),
            )
            .await;
        match self.observe("delete application", result).await {
            Ok(deleted) => {
                tracing::info!("[SEARCH] deleted {} documents of {} from {:?}", deleted, app, indices);
                Ok(deleted)
            }
            Err(e) => {
                tracing::error!("[SEARCH] failed to delete application {}: {}", app, e);
                Err(e)
            }
        }
    }

    pub async fn cluster_health(&self) -> Health {
        match self.services.backend.health(None).await {
            Ok(health) => health,
            Err(e) => {
                tracing::error!("[SEARCH] cluster health unavailable: {}", e);
                Health::Red
            }
        }
    }

    pub async fn index_health(&self) -> Health {
        match self
            .services
            .backend
            .health(Some(&self.alias.read_alias))
            .await
        {
            Ok(health) => health,
            Err(e) => {
                tracing::error!(
                    "[SEARCH] health of {} unavailable: {}",
                    self.alias.read_alias,
                    e
                );
                Health::Red
            }
        }
    }

    /// Scroll through every match and collect it.
    async fn scan(&self, query: QueryNode) -> Result<Vec<CandidateResult>> {
        let keep_alive = self.services.config.scroll_keep_alive();
        let mut request = SearchRequest::new(vec![self.alias.read_alias.clone()], query);
        request.size = SCAN_PAGE_SIZE;
        request.scroll = Some(keep_alive);
        request.timeout = Some(self.services.config.query_timeout());
        request.sort = vec![SortClause::Field {
            field: ENTITY_VERSION_FIELDNAME.to_string(),
            order: SortOrder::Desc,
        }];

        let result = self.services.backend.search(request).await;
        let mut response = self.observe("scan", result).await?;
        let mut found = Vec::new();
        let mut last_scroll = None;
        loop {
            let page_len = response.hits.len();
            found.extend(candidates(&response));
            last_scroll = response.scroll_id.take().or(last_scroll);
            let Some(scroll_id) = last_scroll.as_deref() else {
                break;
            };
            if page_len < SCAN_PAGE_SIZE {
                break;
            }
            let result = self.services.backend.scroll(scroll_id, keep_alive).await;
            response = self.observe("scan", result).await?;
        }
        if let Some(scroll_id) = last_scroll {
            self.clear_scroll(&scroll_id).await;
        }
        Ok(found)
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        if let Err(e) = self.services.backend.clear_scroll(scroll_id).await {
            tracing::debug!("[SEARCH] could not clear scroll {}: {}", scroll_id, e);
        }
    }

    /// Report a backend call to the failure monitor.
    async fn observe<T>(&self, what: &str, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.services.failure_monitor.success();
                Ok(value)
            }
            Err(e) => {
                tracing::error!("[SEARCH] {} on {} failed: {}", what, self.alias.read_alias, e);
                self.services.failure_monitor.fail(what, &e).await;
                Err(e)
            }
        }
    }
}

fn candidates(response: &SearchResponse) -> Vec<CandidateResult> {
    response
        .hits
        .iter()
        .filter_map(|hit| match parse_index_doc_id(&hit.id) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                tracing::warn!("[SEARCH] skipping hit {} from {}: {}", hit.id, hit.index, e);
                None
            }
        })
        .collect()
}
