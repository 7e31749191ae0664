//! Assembles the physical search request for one edge-scoped query.

use super::ast::{ParsedQuery, SortDirection, SortPredicate};
use super::visitor::{translate, TranslatedQuery};
use crate::backend::{BoolQuery, QueryNode, SearchRequest, SortClause, SortOrder};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::document::{
    context_name, EDGE_SEARCH_FIELDNAME, EDGE_TIMESTAMP_FIELDNAME, ENTITY_ID_FIELDNAME,
    ENTITY_TYPE_FIELDNAME,
};
use crate::index::fields::{FieldType, FieldValue, ENTITY_FIELDS, FIELD_LOCATION};
use crate::types::{ApplicationScope, SearchEdge, SearchTypes};
use std::time::Duration;

/// Types a user sort predicate is expanded into. The stored type of a
/// property is not known up front, so each gets its own nested sort.
const SORT_TYPES: [FieldType; 4] = [
    FieldType::String,
    FieldType::Long,
    FieldType::Double,
    FieldType::Boolean,
];

#[derive(Debug, Clone)]
pub struct SearchRequestBuilder {
    scope: ApplicationScope,
    read_alias: String,
    query_timeout: Duration,
    keep_alive: Duration,
}

impl SearchRequestBuilder {
    /// `keep_alive` is how long the backend holds the continuation context
    /// behind a cursor.
    pub fn new(
        scope: ApplicationScope,
        read_alias: impl Into<String>,
        query_timeout: Duration,
        keep_alive: Duration,
    ) -> Self {
        SearchRequestBuilder {
            scope,
            read_alias: read_alias.into(),
            query_timeout,
            keep_alive,
        }
    }

    pub fn from_config(config: &IndexConfig, scope: ApplicationScope, read_alias: impl Into<String>) -> Self {
        SearchRequestBuilder::new(scope, read_alias, config.query_timeout(), config.cursor_ttl())
    }

    pub fn build(
        &self,
        edge: &SearchEdge,
        types: &SearchTypes,
        query: &ParsedQuery,
        limit: usize,
        offset: usize,
    ) -> Result<SearchRequest> {
        if limit == 0 {
            return Err(IndexError::InvalidQuery("limit must be positive".to_string()));
        }
        let translated = translate(query.root.as_ref())?;

        let mut request = SearchRequest::new(vec![self.read_alias.clone()], self.scoped_query(edge, types, &translated));
        if !translated.filters.is_empty() {
            request.post_filter = Some(QueryNode::filter(translated.filters.clone()));
        }
        request.sort = sort_clauses(&query.sort, &translated);
        request.from = offset;
        request.size = limit;
        request.scroll = Some(self.keep_alive);
        request.timeout = Some(self.query_timeout);
        Ok(request)
    }

    fn scoped_query(&self, edge: &SearchEdge, types: &SearchTypes, translated: &TranslatedQuery) -> QueryNode {
        let mut filter = vec![QueryNode::term(
            EDGE_SEARCH_FIELDNAME,
            FieldValue::String(context_name(&self.scope, edge)),
        )];
        if !types.is_empty() {
            filter.push(QueryNode::should(
                types
                    .type_names()
                    .iter()
                    .map(|t| QueryNode::term(ENTITY_TYPE_FIELDNAME, FieldValue::String(t.clone())))
                    .collect(),
            ));
        }
        QueryNode::Bool(BoolQuery {
            must: vec![translated.query.clone().unwrap_or(QueryNode::MatchAll)],
            filter,
            ..BoolQuery::default()
        })
    }
}

fn order(direction: SortDirection) -> SortOrder {
    match direction {
        SortDirection::Asc => SortOrder::Asc,
        SortDirection::Desc => SortOrder::Desc,
    }
}

fn geo_sort(property: &str, origin: crate::types::GeoPoint) -> SortClause {
    SortClause::GeoDistance {
        path: ENTITY_FIELDS.to_string(),
        field: FIELD_LOCATION.to_string(),
        name: property.to_string(),
        origin,
        order: SortOrder::Asc,
    }
}

/// Geo-distance sorts first, nearest first, for every `within` property.
/// Then the user's predicates, or edge timestamp desc / entity id asc when
/// there are none.
fn sort_clauses(predicates: &[SortPredicate], translated: &TranslatedQuery) -> Vec<SortClause> {
    let mut sort = Vec::new();
    let mut geo_sorted: Vec<&str> = Vec::new();
    for (property, origin) in &translated.geo_points {
        if !geo_sorted.contains(&property.as_str()) {
            geo_sorted.push(property);
            sort.push(geo_sort(property, *origin));
        }
    }

    if predicates.is_empty() {
        sort.push(SortClause::Field {
            field: EDGE_TIMESTAMP_FIELDNAME.to_string(),
            order: SortOrder::Desc,
        });
        sort.push(SortClause::Field {
            field: ENTITY_ID_FIELDNAME.to_string(),
            order: SortOrder::Asc,
        });
        return sort;
    }

    for predicate in predicates {
        let name = predicate.property.to_lowercase();
        if geo_sorted.contains(&name.as_str()) {
            continue;
        }
        for field_type in SORT_TYPES {
            sort.push(SortClause::Nested {
                path: ENTITY_FIELDS.to_string(),
                field: field_type.projection().to_string(),
                name: name.clone(),
                order: order(predicate.direction),
                unmapped_type: field_type,
            });
        }
    }
    sort
}
