//! Backend-neutral request and response model.
//!
//! Queries are built as [`QueryNode`] trees mirroring the backend's query DSL
//! so that a wire client can serialize them one-to-one and the in-memory
//! backend can evaluate them directly.

use crate::index::document::IndexDocument;
use crate::index::fields::{FieldType, FieldValue};
use crate::types::GeoPoint;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    MatchAll,
    /// Exact value match.
    Term { field: String, value: FieldValue },
    /// String starts with `value`.
    Prefix { field: String, value: String },
    /// Every analyzed token of `text` is present.
    Match { field: String, text: String },
    Range {
        field: String,
        gt: Option<FieldValue>,
        gte: Option<FieldValue>,
        lt: Option<FieldValue>,
        lte: Option<FieldValue>,
    },
    Bool(BoolQuery),
    /// Some entry of the nested list at `path` satisfies `query`.
    Nested { path: String, query: Box<QueryNode> },
    GeoDistance {
        field: String,
        center: GeoPoint,
        distance_m: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub must: Vec<QueryNode>,
    pub should: Vec<QueryNode>,
    pub must_not: Vec<QueryNode>,
    pub filter: Vec<QueryNode>,
}

impl QueryNode {
    pub fn term(field: impl Into<String>, value: FieldValue) -> Self {
        QueryNode::Term {
            field: field.into(),
            value,
        }
    }

    pub fn must(clauses: Vec<QueryNode>) -> Self {
        QueryNode::Bool(BoolQuery {
            must: clauses,
            ..BoolQuery::default()
        })
    }

    pub fn should(clauses: Vec<QueryNode>) -> Self {
        QueryNode::Bool(BoolQuery {
            should: clauses,
            ..BoolQuery::default()
        })
    }

    pub fn must_not(clauses: Vec<QueryNode>) -> Self {
        QueryNode::Bool(BoolQuery {
            must_not: clauses,
            ..BoolQuery::default()
        })
    }

    pub fn filter(clauses: Vec<QueryNode>) -> Self {
        QueryNode::Bool(BoolQuery {
            filter: clauses,
            ..BoolQuery::default()
        })
    }

    pub fn nested(path: impl Into<String>, query: QueryNode) -> Self {
        QueryNode::Nested {
            path: path.into(),
            query: Box::new(query),
        }
    }

    /// Total number of nodes in the tree.
    pub fn clause_count(&self) -> usize {
        match self {
            QueryNode::Bool(b) => {
                1 + b
                    .must
                    .iter()
                    .chain(&b.should)
                    .chain(&b.must_not)
                    .chain(&b.filter)
                    .map(QueryNode::clause_count)
                    .sum::<usize>()
            }
            QueryNode::Nested { query, .. } => 1 + query.clause_count(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortClause {
    /// A root document field.
    Field { field: String, order: SortOrder },
    /// A typed projection of the nested entries named `name`.
    Nested {
        path: String,
        field: String,
        name: String,
        order: SortOrder,
        unmapped_type: FieldType,
    },
    /// Distance from `origin` to the nested location entries named `name`.
    GeoDistance {
        path: String,
        field: String,
        name: String,
        origin: GeoPoint,
        order: SortOrder,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub indices: Vec<String>,
    pub query: QueryNode,
    pub post_filter: Option<QueryNode>,
    pub sort: Vec<SortClause>,
    pub from: usize,
    pub size: usize,
    /// Keep-alive for a scroll context. `None` means no continuation.
    pub scroll: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    pub fn new(indices: Vec<String>, query: QueryNode) -> Self {
        SearchRequest {
            indices,
            query,
            post_filter: None,
            sort: Vec::new(),
            from: 0,
            size: 10,
            scroll: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: String,
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total: u64,
    pub scroll_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkItem {
    Index {
        index: String,
        id: String,
        document: IndexDocument,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkItem {
    pub fn index_name(&self) -> &str {
        match self {
            BulkItem::Index { index, .. } | BulkItem::Delete { index, .. } => index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BulkItem::Index { id, .. } | BulkItem::Delete { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkRequest {
    pub items: Vec<BulkItem>,
    /// Make the writes visible to search before returning.
    pub refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResponse {
    pub index: String,
    pub id: String,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItemResponse {
    pub fn ok(index: impl Into<String>, id: impl Into<String>, status: u16) -> Self {
        BulkItemResponse {
            index: index.into(),
            id: id.into(),
            status,
            error: None,
        }
    }

    pub fn failed(
        index: impl Into<String>,
        id: impl Into<String>,
        status: u16,
        error: impl Into<String>,
    ) -> Self {
        BulkItemResponse {
            index: index.into(),
            id: id.into(),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_overloaded(&self) -> bool {
        self.status == 429
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResponse>,
    pub took_ms: u64,
}

impl BulkResponse {
    pub fn failures(&self) -> Vec<&BulkItemResponse> {
        self.items.iter().filter(|i| i.is_failed()).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(BulkItemResponse::is_failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateIndexOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Health {
    Green,
    Yellow,
    Red,
}

impl Health {
    pub fn parse(status: &str) -> Health {
        match status.to_ascii_lowercase().as_str() {
            "green" => Health::Green,
            "yellow" => Health::Yellow,
            _ => Health::Red,
        }
    }
}
