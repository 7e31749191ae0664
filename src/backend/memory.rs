//! In-process [`SearchBackend`] with fault injection, used by tests and by
//! embedders that do not run a search cluster.

use super::eval;
use super::model::*;
use super::SearchBackend;
use crate::error::{IndexError, Result};
use crate::index::document::IndexDocument;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

type Documents = Arc<RwLock<BTreeMap<String, IndexDocument>>>;

struct ScrollContext {
    remaining: VecDeque<SearchHit>,
    size: usize,
    expires_at: Instant,
}

#[derive(Default)]
struct Faults {
    /// Errors returned, in order, by the next calls to any operation.
    next_errors: VecDeque<IndexError>,
    /// Bulk calls that should answer every item with 429.
    overloaded_bulks: usize,
    /// Document ids whose index items are rejected with 400.
    rejected_ids: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryBackend {
    indices: DashMap<String, Documents>,
    aliases: DashMap<String, BTreeSet<String>>,
    scrolls: DashMap<String, ScrollContext>,
    faults: Mutex<Faults>,
    resets: AtomicUsize,
    bulk_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Fail the next call (of any kind) with `error`.
    pub fn fail_next(&self, error: IndexError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.next_errors.push_back(error);
        }
    }

    /// Answer every item of the next `count` bulk calls with 429.
    pub fn overload_next_bulk(&self, count: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.overloaded_bulks += count;
        }
    }

    /// Reject index items for this document id with a 400.
    pub fn reject_document(&self, id: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.rejected_ids.insert(id.into());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Documents stored in one physical index.
    pub fn document_count(&self, index: &str) -> usize {
        self.indices
            .get(index)
            .and_then(|docs| docs.read().ok().map(|d| d.len()))
            .unwrap_or(0)
    }

    pub fn get_document(&self, index: &str, id: &str) -> Option<IndexDocument> {
        let docs = self.indices.get(index)?;
        let guard = docs.read().ok()?;
        guard.get(id).cloned()
    }

    fn injected_error(&self) -> Result<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| IndexError::Backend("fault state poisoned".to_string()))?;
        match faults.next_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Physical indices a name refers to: the alias targets, or the index itself.
    fn resolve(&self, name: &str) -> Vec<String> {
        if let Some(targets) = self.aliases.get(name) {
            return targets.iter().cloned().collect();
        }
        if self.indices.contains_key(name) {
            return vec![name.to_string()];
        }
        Vec::new()
    }

    fn resolve_all(&self, names: &[String]) -> Result<Vec<String>> {
        let mut resolved = BTreeSet::new();
        for name in names {
            let targets = self.resolve(name);
            if targets.is_empty() {
                return Err(IndexError::Backend(format!("no such index [{}]", name)));
            }
            resolved.extend(targets);
        }
        Ok(resolved.into_iter().collect())
    }

    fn documents(&self, index: &str) -> Option<Documents> {
        self.indices.get(index).map(|d| Arc::clone(d.value()))
    }

    fn apply_item(&self, item: BulkItem, rejected: &HashSet<String>) -> BulkItemResponse {
        let name = item.index_name().to_string();
        let id = item.id().to_string();
        let targets = self.resolve(&name);
        match item {
            BulkItem::Index { document, .. } => {
                if rejected.contains(&id) {
                    return BulkItemResponse::failed(name, id, 400, "mapper_parsing_exception");
                }
                let index = match targets.as_slice() {
                    [] => {
                        // Writes to an unknown name auto-create the index.
                        self.indices
                            .entry(name.clone())
                            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())));
                        name.clone()
                    }
                    [one] => one.clone(),
                    _ => {
                        return BulkItemResponse::failed(
                            name,
                            id,
                            400,
                            "alias has more than one write index",
                        )
                    }
                };
                match self.documents(&index) {
                    Some(docs) => match docs.write() {
                        Ok(mut guard) => {
                            let status = if guard.insert(id.clone(), document).is_some() {
                                200
                            } else {
                                201
                            };
                            BulkItemResponse::ok(index, id, status)
                        }
                        Err(_) => BulkItemResponse::failed(index, id, 500, "index lock poisoned"),
                    },
                    None => BulkItemResponse::failed(index, id, 404, "index_not_found_exception"),
                }
            }
            BulkItem::Delete { .. } => {
                let mut found = false;
                for index in &targets {
                    if let Some(docs) = self.documents(index) {
                        if let Ok(mut guard) = docs.write() {
                            found |= guard.remove(&id).is_some();
                        }
                    }
                }
                BulkItemResponse::ok(name, id, if found { 200 } else { 404 })
            }
        }
    }

    fn collect_matches(&self, request: &SearchRequest) -> Result<Vec<(String, IndexDocument)>> {
        let mut matched = Vec::new();
        for index in self.resolve_all(&request.indices)? {
            let Some(docs) = self.documents(&index) else {
                continue;
            };
            let guard = docs
                .read()
                .map_err(|_| IndexError::Backend("index lock poisoned".to_string()))?;
            for doc in guard.values() {
                let post = request
                    .post_filter
                    .as_ref()
                    .map(|f| eval::matches(f, doc))
                    .unwrap_or(true);
                if post && eval::matches(&request.query, doc) {
                    matched.push((index.clone(), doc.clone()));
                }
            }
        }
        Ok(matched)
    }

    fn purge_expired_scrolls(&self) {
        let now = Instant::now();
        self.scrolls.retain(|_, ctx| ctx.expires_at > now);
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_error()?;
        let started = std::time::Instant::now();

        let (overloaded, rejected) = {
            let mut faults = self
                .faults
                .lock()
                .map_err(|_| IndexError::Backend("fault state poisoned".to_string()))?;
            let overloaded = faults.overloaded_bulks > 0;
            if overloaded {
                faults.overloaded_bulks -= 1;
            }
            (overloaded, faults.rejected_ids.clone())
        };

        let items = request
            .items
            .into_iter()
            .map(|item| {
                if overloaded {
                    BulkItemResponse::failed(
                        item.index_name(),
                        item.id(),
                        429,
                        "es_rejected_execution_exception",
                    )
                } else {
                    self.apply_item(item, &rejected)
                }
            })
            .collect();

        Ok(BulkResponse {
            items,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_error()?;
        self.purge_expired_scrolls();

        let mut matched = self.collect_matches(&request)?;
        eval::sort_documents(&mut matched, &request.sort);
        let total = matched.len() as u64;

        let mut all: VecDeque<SearchHit> = matched
            .into_iter()
            .skip(request.from)
            .map(|(index, doc)| SearchHit { id: doc.id, index })
            .collect();
        let size = request.size.max(1);
        let n = size.min(all.len());
        let page: Vec<SearchHit> = all.drain(..n).collect();

        let scroll_id = request.scroll.map(|keep_alive| {
            let id = uuid::Uuid::new_v4().to_string();
            self.scrolls.insert(
                id.clone(),
                ScrollContext {
                    remaining: all,
                    size,
                    expires_at: Instant::now() + keep_alive,
                },
            );
            id
        });

        Ok(SearchResponse {
            hits: page,
            total,
            scroll_id,
        })
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse> {
        self.injected_error()?;
        self.purge_expired_scrolls();
        let mut ctx = self
            .scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| IndexError::CursorNotFound(format!("no search context {}", scroll_id)))?;
        let n = ctx.size.min(ctx.remaining.len());
        let hits: Vec<SearchHit> = ctx.remaining.drain(..n).collect();
        ctx.expires_at = Instant::now() + keep_alive;
        Ok(SearchResponse {
            total: hits.len() as u64,
            hits,
            scroll_id: Some(scroll_id.to_string()),
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.scrolls.remove(scroll_id);
        Ok(())
    }

    async fn delete_by_query(&self, indices: &[String], query: QueryNode) -> Result<u64> {
        self.injected_error()?;
        let mut deleted = 0u64;
        for index in self.resolve_all(indices)? {
            if let Some(docs) = self.documents(&index) {
                let mut guard = docs
                    .write()
                    .map_err(|_| IndexError::Backend("index lock poisoned".to_string()))?;
                let before = guard.len();
                guard.retain(|_, doc| !eval::matches(&query, doc));
                deleted += (before - guard.len()) as u64;
            }
        }
        Ok(deleted)
    }

    async fn create_index(&self, name: &str, _settings: IndexSettings) -> Result<CreateIndexOutcome> {
        self.injected_error()?;
        if self.aliases.contains_key(name) {
            return Err(IndexError::Backend(format!(
                "invalid index name [{}], an alias with the same name exists",
                name
            )));
        }
        let mut created = false;
        self.indices.entry(name.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(RwLock::new(BTreeMap::new()))
        });
        Ok(if created {
            CreateIndexOutcome::Created
        } else {
            CreateIndexOutcome::AlreadyExists
        })
    }

    async fn update_aliases(&self, actions: Vec<AliasAction>) -> Result<()> {
        self.injected_error()?;
        for action in &actions {
            if let AliasAction::Add { index, .. } = action {
                if !self.indices.contains_key(index) {
                    return Err(IndexError::Backend(format!("no such index [{}]", index)));
                }
            }
        }
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    self.aliases.entry(alias).or_default().insert(index);
                }
                AliasAction::Remove { index, alias } => {
                    let empty = match self.aliases.get_mut(&alias) {
                        Some(mut targets) => {
                            targets.remove(&index);
                            targets.is_empty()
                        }
                        None => false,
                    };
                    if empty {
                        self.aliases.remove(&alias);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get_alias_indices(&self, alias: &str) -> Result<Vec<String>> {
        self.injected_error()?;
        Ok(self
            .aliases
            .get(alias)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn refresh(&self, _indices: &[String]) -> Result<()> {
        // Writes are visible immediately.
        self.injected_error()
    }

    async fn health(&self, index: Option<&str>) -> Result<Health> {
        self.injected_error()?;
        match index {
            Some(name) if self.resolve(name).is_empty() => Ok(Health::Red),
            _ => Ok(Health::Green),
        }
    }

    async fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        tracing::info!("[MEMORY] backend client reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::fields::{EntityField, FieldValue};
    use crate::types::NodeRole;

    fn doc(id: &str, ts: i64) -> IndexDocument {
        IndexDocument {
            id: id.to_string(),
            application_id: "app".into(),
            entity_id: id.into(),
            entity_version: "v".into(),
            entity_type: "user".into(),
            node_id: "n".into(),
            edge_name: "users".into(),
            node_role: NodeRole::Source,
            edge_timestamp: ts,
            edge_search: "ctx".into(),
            fields: vec![EntityField::new("n", FieldValue::Long(ts))],
        }
    }

    fn index_item(index: &str, d: IndexDocument) -> BulkItem {
        BulkItem::Index {
            index: index.into(),
            id: d.id.clone(),
            document: d,
        }
    }

    #[tokio::test]
    async fn writes_through_alias() {
        let backend = MemoryBackend::new();
        let settings = IndexSettings {
            number_of_shards: 1,
            number_of_replicas: 0,
        };
        assert_eq!(
            backend.create_index("idx", settings).await.unwrap(),
            CreateIndexOutcome::Created
        );
        assert_eq!(
            backend.create_index("idx", settings).await.unwrap(),
            CreateIndexOutcome::AlreadyExists
        );
        backend
            .update_aliases(vec![AliasAction::Add {
                index: "idx".into(),
                alias: "w".into(),
            }])
            .await
            .unwrap();
        let resp = backend
            .bulk(BulkRequest {
                items: vec![index_item("w", doc("a", 1))],
                refresh: true,
            })
            .await
            .unwrap();
        assert!(!resp.has_failures());
        assert_eq!(backend.document_count("idx"), 1);
    }

    #[tokio::test]
    async fn scroll_pages_until_empty() {
        let backend = MemoryBackend::new();
        let items = (0..5).map(|i| index_item("idx", doc(&format!("d{}", i), i))).collect();
        backend
            .bulk(BulkRequest { items, refresh: true })
            .await
            .unwrap();

        let mut req = SearchRequest::new(vec!["idx".into()], QueryNode::MatchAll);
        req.size = 2;
        req.scroll = Some(Duration::from_secs(60));
        req.sort = vec![SortClause::Field {
            field: "edgeTimestamp".into(),
            order: SortOrder::Desc,
        }];
        let first = backend.search(req).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.hits[0].id, "d4");
        let sid = first.scroll_id.unwrap();

        let second = backend.scroll(&sid, Duration::from_secs(60)).await.unwrap();
        assert_eq!(second.hits.len(), 2);
        let third = backend.scroll(&sid, Duration::from_secs(60)).await.unwrap();
        assert_eq!(third.hits.len(), 1);
        assert_eq!(third.hits[0].id, "d0");
    }

    #[tokio::test]
    async fn unknown_scroll_is_cursor_error() {
        let backend = MemoryBackend::new();
        let err = backend
            .scroll("nope", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::CursorNotFound(_)));
    }

    #[tokio::test]
    async fn injected_faults() {
        let backend = MemoryBackend::new();
        backend.fail_next(IndexError::NoNodeAvailable("down".into()));
        assert!(backend.bulk(BulkRequest::default()).await.is_err());
        assert!(backend.bulk(BulkRequest::default()).await.is_ok());

        backend.overload_next_bulk(1);
        let resp = backend
            .bulk(BulkRequest {
                items: vec![index_item("idx", doc("a", 1))],
                refresh: false,
            })
            .await
            .unwrap();
        assert!(resp.items[0].is_overloaded());
        assert_eq!(backend.document_count("idx"), 0);
    }

    #[tokio::test]
    async fn deleting_missing_document_is_not_a_failure() {
        let backend = MemoryBackend::new();
        backend
            .create_index(
                "idx",
                IndexSettings {
                    number_of_shards: 1,
                    number_of_replicas: 0,
                },
            )
            .await
            .unwrap();
        let resp = backend
            .bulk(BulkRequest {
                items: vec![BulkItem::Delete {
                    index: "idx".into(),
                    id: "ghost".into(),
                }],
                refresh: false,
            })
            .await
            .unwrap();
        assert_eq!(resp.items[0].status, 404);
        assert!(!resp.has_failures());
    }
}
