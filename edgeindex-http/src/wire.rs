//! JSON bodies for the REST API and parsing of its responses.

use edgeindex::backend::{
    BulkItem, BulkItemResponse, BulkRequest, BulkResponse, QueryNode, SearchHit, SearchRequest,
    SearchResponse, SortClause,
};
use edgeindex::index::document::{
    APPLICATION_ID_FIELDNAME, EDGE_NAME_FIELDNAME, EDGE_NODE_ID_FIELDNAME,
    EDGE_NODE_TYPE_FIELDNAME, EDGE_SEARCH_FIELDNAME, EDGE_TIMESTAMP_FIELDNAME,
    ENTITY_ID_FIELDNAME, ENTITY_TYPE_FIELDNAME, ENTITY_VERSION_FIELDNAME,
};
use edgeindex::index::fields::{ENTITY_FIELDS, FIELD_NAME};
use edgeindex::types::GeoPoint;
use edgeindex::{IndexError, Result};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// `6000ms`
pub fn duration_param(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn geo_json(p: &GeoPoint) -> Value {
    json!({"lat": p.lat, "lon": p.lon})
}

pub fn query_json(query: &QueryNode) -> Value {
    match query {
        QueryNode::MatchAll => json!({"match_all": {}}),
        QueryNode::Term { field, value } => json!({"term": single(field, value.to_json())}),
        QueryNode::Prefix { field, value } => json!({"prefix": single(field, json!(value))}),
        QueryNode::Match { field, text } => json!({
            "match": single(field, json!({"query": text, "operator": "and"}))
        }),
        QueryNode::Range {
            field,
            gt,
            gte,
            lt,
            lte,
        } => {
            let mut bounds = Map::new();
            for (key, bound) in [("gt", gt), ("gte", gte), ("lt", lt), ("lte", lte)] {
                if let Some(v) = bound {
                    bounds.insert(key.to_string(), v.to_json());
                }
            }
            json!({"range": single(field, Value::Object(bounds))})
        }
        QueryNode::Bool(b) => {
            let mut clauses = Map::new();
            for (key, list) in [
                ("must", &b.must),
                ("should", &b.should),
                ("must_not", &b.must_not),
                ("filter", &b.filter),
            ] {
                if !list.is_empty() {
                    clauses.insert(
                        key.to_string(),
                        Value::Array(list.iter().map(query_json).collect()),
                    );
                }
            }
            if !b.should.is_empty() && (!b.must.is_empty() || !b.filter.is_empty()) {
                clauses.insert("minimum_should_match".to_string(), json!(1));
            }
            json!({"bool": clauses})
        }
        QueryNode::Nested { path, query } => json!({
            "nested": {"path": path, "query": query_json(query)}
        }),
        QueryNode::GeoDistance {
            field,
            center,
            distance_m,
        } => {
            let mut body = Map::new();
            body.insert("distance".to_string(), json!(format!("{}m", distance_m)));
            body.insert(field.clone(), geo_json(center));
            json!({"geo_distance": body})
        }
    }
}

fn nested_sort_filter(path: &str, name: &str) -> Value {
    json!({
        "path": path,
        "filter": {"term": single(FIELD_NAME, json!(name))}
    })
}

pub fn sort_json(clause: &SortClause) -> Value {
    match clause {
        SortClause::Field { field, order } => single(field, json!({"order": order.as_str()})),
        SortClause::Nested {
            path,
            field,
            name,
            order,
            unmapped_type,
        } => single(
            field,
            json!({
                "order": order.as_str(),
                "unmapped_type": unmapped_type.unmapped_type(),
                "nested": nested_sort_filter(path, name),
            }),
        ),
        SortClause::GeoDistance {
            path,
            field,
            name,
            origin,
            order,
        } => {
            let mut body = Map::new();
            body.insert(field.clone(), geo_json(origin));
            body.insert("order".to_string(), json!(order.as_str()));
            body.insert("unit".to_string(), json!("m"));
            body.insert("nested".to_string(), nested_sort_filter(path, name));
            json!({"_geo_distance": body})
        }
    }
}

/// Body of `_search`. The scroll keep-alive travels as a URL parameter.
pub fn search_body(request: &SearchRequest) -> Value {
    let mut body = Map::new();
    body.insert("query".to_string(), query_json(&request.query));
    if let Some(filter) = &request.post_filter {
        body.insert("post_filter".to_string(), query_json(filter));
    }
    if !request.sort.is_empty() {
        body.insert(
            "sort".to_string(),
            Value::Array(request.sort.iter().map(sort_json).collect()),
        );
    }
    if request.from > 0 {
        body.insert("from".to_string(), json!(request.from));
    }
    body.insert("size".to_string(), json!(request.size));
    if let Some(timeout) = request.timeout {
        body.insert("timeout".to_string(), json!(duration_param(timeout)));
    }
    body.insert("_source".to_string(), json!(false));
    Value::Object(body)
}

/// Newline-delimited `_bulk` body.
pub fn bulk_body(request: &BulkRequest) -> Result<String> {
    let mut out = String::new();
    for item in &request.items {
        match item {
            BulkItem::Index {
                index,
                id,
                document,
            } => {
                out.push_str(&serde_json::to_string(
                    &json!({"index": {"_index": index, "_id": id}}),
                )?);
                out.push('\n');
                out.push_str(&serde_json::to_string(&document.to_json())?);
                out.push('\n');
            }
            BulkItem::Delete { index, id } => {
                out.push_str(&serde_json::to_string(
                    &json!({"delete": {"_index": index, "_id": id}}),
                )?);
                out.push('\n');
            }
        }
    }
    Ok(out)
}

fn error_text(error: &Value) -> String {
    let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
    match error.get("reason").and_then(Value::as_str) {
        Some(reason) => format!("{}: {}", kind, reason),
        None => kind.to_string(),
    }
}

pub fn parse_bulk_response(body: &Value) -> Result<BulkResponse> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::Backend("bulk response has no items".to_string()))?;
    let mut parsed = Vec::with_capacity(items.len());
    for item in items {
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            return Err(IndexError::Backend(format!("malformed bulk item: {}", item)));
        };
        let index = result.get("_index").and_then(Value::as_str).unwrap_or_default();
        let id = result.get("_id").and_then(Value::as_str).unwrap_or_default();
        let status = result
            .get("status")
            .and_then(Value::as_u64)
            .unwrap_or(500) as u16;
        parsed.push(match result.get("error") {
            Some(error) => BulkItemResponse::failed(index, id, status, error_text(error)),
            None => BulkItemResponse::ok(index, id, status),
        });
    }
    Ok(BulkResponse {
        items: parsed,
        took_ms: body.get("took").and_then(Value::as_u64).unwrap_or(0),
    })
}

pub fn parse_search_response(body: &Value) -> Result<SearchResponse> {
    let hits = body
        .get("hits")
        .ok_or_else(|| IndexError::Backend("search response has no hits".to_string()))?;
    // `total` is an object on newer clusters and a number on older ones.
    let total = match hits.get("total") {
        Some(Value::Object(t)) => t.get("value").and_then(Value::as_u64).unwrap_or(0),
        Some(v) => v.as_u64().unwrap_or(0),
        None => 0,
    };
    let hits = hits
        .get("hits")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|h| {
                    Some(SearchHit {
                        id: h.get("_id")?.as_str()?.to_string(),
                        index: h
                            .get("_index")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(SearchResponse {
        hits,
        total,
        scroll_id: body
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Index mapping: keyword root fields plus the nested typed field list.
pub fn index_mapping() -> Value {
    let keyword = json!({"type": "keyword"});
    let mut root = Map::new();
    for name in [
        APPLICATION_ID_FIELDNAME,
        ENTITY_ID_FIELDNAME,
        ENTITY_VERSION_FIELDNAME,
        ENTITY_TYPE_FIELDNAME,
        EDGE_NODE_ID_FIELDNAME,
        EDGE_NAME_FIELDNAME,
        EDGE_NODE_TYPE_FIELDNAME,
        EDGE_SEARCH_FIELDNAME,
    ] {
        root.insert(name.to_string(), keyword.clone());
    }
    root.insert(EDGE_TIMESTAMP_FIELDNAME.to_string(), json!({"type": "long"}));
    root.insert(
        ENTITY_FIELDS.to_string(),
        json!({
            "type": "nested",
            "properties": {
                "name": {"type": "keyword"},
                "string": {
                    "type": "keyword",
                    "fields": {"analyzed": {"type": "text"}}
                },
                "long": {"type": "long"},
                "double": {"type": "double"},
                "boolean": {"type": "boolean"},
                "uuid": {"type": "keyword"},
                "location": {"type": "geo_point"}
            }
        }),
    );
    json!({"dynamic": false, "properties": root})
}
