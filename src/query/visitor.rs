//! Operand tree → backend query translation.
//!
//! Every leaf addresses one entry of the nested `fields` list: the entry's
//! name must equal the (lower-cased) property and its typed projection must
//! satisfy the comparison. `within` never lands in the main query; it is
//! collected as a post-filter that applies to the whole result set, wherever
//! it sits in the boolean tree.

use super::ast::{Comparison, Literal, Operand, WithinOperand};
use crate::backend::QueryNode;
use crate::error::{IndexError, Result};
use crate::index::fields::{
    FieldValue, ENTITY_FIELDS, FIELD_LOCATION, FIELD_NAME, FIELD_STRING, FIELD_STRING_ANALYZED,
};
use crate::types::GeoPoint;

/// Upper bound on nodes in one translated query.
pub const MAX_CLAUSES: usize = 1024;

const WILDCARD: char = '*';

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslatedQuery {
    /// Main query; `None` means match everything.
    pub query: Option<QueryNode>,
    /// Geo post-filters, all of which must hold.
    pub filters: Vec<QueryNode>,
    /// Property and origin of every `within`, in visit order.
    pub geo_points: Vec<(String, GeoPoint)>,
}

impl TranslatedQuery {
    /// Origin of the first `within` on `property`, if any.
    pub fn geo_origin(&self, property: &str) -> Option<GeoPoint> {
        let property = property.to_lowercase();
        self.geo_points
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, g)| *g)
    }
}

/// Translate an operand tree. `None` translates to match-all.
pub fn translate(root: Option<&Operand>) -> Result<TranslatedQuery> {
    let mut out = TranslatedQuery::default();
    if let Some(root) = root {
        out.query = visit(root, &mut out)?;
    }
    if let Some(query) = &out.query {
        let clauses = query.clause_count();
        if clauses > MAX_CLAUSES {
            return Err(IndexError::InvalidQuery(format!(
                "query has {} clauses, limit is {}",
                clauses, MAX_CLAUSES
            )));
        }
    }
    Ok(out)
}

fn visit(op: &Operand, out: &mut TranslatedQuery) -> Result<Option<QueryNode>> {
    let node = match op {
        Operand::And(left, right) => {
            combine(visit(left, out)?, visit(right, out)?, QueryNode::must)
        }
        Operand::Or(left, right) => {
            combine(visit(left, out)?, visit(right, out)?, QueryNode::should)
        }
        Operand::Not(inner) => visit(inner, out)?.map(|q| QueryNode::must_not(vec![q])),
        Operand::Equal(c) => Some(field_clause(&c.property, equal_fragment(c))),
        Operand::LessThan(c) => Some(field_clause(&c.property, range_fragment(c, Bound::Lt))),
        Operand::LessThanEqual(c) => {
            Some(field_clause(&c.property, range_fragment(c, Bound::Lte)))
        }
        Operand::GreaterThan(c) => Some(field_clause(&c.property, range_fragment(c, Bound::Gt))),
        Operand::GreaterThanEqual(c) => {
            Some(field_clause(&c.property, range_fragment(c, Bound::Gte)))
        }
        Operand::Contains(c) => Some(field_clause(&c.property, contains_fragment(c)?)),
        Operand::Within(w) => {
            add_geo_filter(w, out);
            None
        }
    };
    Ok(node)
}

/// A side that produced nothing (a bare `within`) drops out of the
/// combination.
fn combine(
    left: Option<QueryNode>,
    right: Option<QueryNode>,
    wrap: fn(Vec<QueryNode>) -> QueryNode,
) -> Option<QueryNode> {
    match (left, right) {
        (Some(l), Some(r)) => Some(wrap(vec![l, r])),
        (Some(q), None) | (None, Some(q)) => Some(q),
        (None, None) => None,
    }
}

fn field_clause(property: &str, fragment: QueryNode) -> QueryNode {
    QueryNode::nested(
        ENTITY_FIELDS,
        QueryNode::must(vec![
            QueryNode::term(FIELD_NAME, FieldValue::String(property.to_lowercase())),
            fragment,
        ]),
    )
}

fn wildcard_prefix(value: &str) -> Option<&str> {
    value.strip_suffix(WILDCARD)
}

fn equal_fragment(c: &Comparison) -> QueryNode {
    match &c.value {
        Literal::String(s) => {
            let lowered = s.to_lowercase();
            match wildcard_prefix(&lowered) {
                Some(prefix) => QueryNode::Prefix {
                    field: FIELD_STRING.to_string(),
                    value: prefix.to_string(),
                },
                None => QueryNode::term(FIELD_STRING, FieldValue::String(lowered)),
            }
        }
        other => {
            let value = other.to_field_value();
            QueryNode::term(value.field_type().projection(), value)
        }
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Lt,
    Lte,
    Gt,
    Gte,
}

fn range_fragment(c: &Comparison, bound: Bound) -> QueryNode {
    let value = c.value.to_field_value();
    let field = match value {
        FieldValue::String(_) => FIELD_STRING_ANALYZED,
        ref v => v.field_type().projection(),
    };
    let (mut gt, mut gte, mut lt, mut lte) = (None, None, None, None);
    match bound {
        Bound::Lt => lt = Some(value),
        Bound::Lte => lte = Some(value),
        Bound::Gt => gt = Some(value),
        Bound::Gte => gte = Some(value),
    }
    QueryNode::Range {
        field: field.to_string(),
        gt,
        gte,
        lt,
        lte,
    }
}

fn contains_fragment(c: &Comparison) -> Result<QueryNode> {
    let Literal::String(s) = &c.value else {
        return Err(IndexError::UnsupportedField {
            field: c.property.clone(),
            reason: format!(
                "contains needs a string, got {} {}",
                c.value.type_name(),
                c.value
            ),
        });
    };
    let lowered = s.to_lowercase();
    Ok(match wildcard_prefix(&lowered) {
        Some(prefix) => QueryNode::Prefix {
            field: FIELD_STRING_ANALYZED.to_string(),
            value: prefix.to_string(),
        },
        None => QueryNode::Match {
            field: FIELD_STRING_ANALYZED.to_string(),
            text: lowered,
        },
    })
}

fn add_geo_filter(w: &WithinOperand, out: &mut TranslatedQuery) {
    let property = w.property.to_lowercase();
    out.filters.push(field_clause(
        &property,
        QueryNode::GeoDistance {
            field: FIELD_LOCATION.to_string(),
            center: w.center,
            distance_m: w.distance_m,
        },
    ));
    out.geo_points.push((property, w.center));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoolQuery;

    fn name_term(name: &str) -> QueryNode {
        QueryNode::term(FIELD_NAME, FieldValue::String(name.into()))
    }

    fn unwrap_nested(node: &QueryNode) -> &[QueryNode] {
        match node {
            QueryNode::Nested { path, query } => {
                assert_eq!(path, ENTITY_FIELDS);
                match query.as_ref() {
                    QueryNode::Bool(BoolQuery { must, .. }) => must,
                    other => panic!("expected bool, got {:?}", other),
                }
            }
            other => panic!("expected nested, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_tree_is_match_all() {
        let t = translate(None).unwrap();
        assert!(t.query.is_none());
        assert!(t.filters.is_empty());
    }

    #[test]
    fn test_equal_lowercases_string() {
        let t = translate(Some(&Operand::eq("Name", "MoRGan"))).unwrap();
        let must = unwrap_nested(t.query.as_ref().unwrap()).to_vec();
        assert_eq!(must[0], name_term("name"));
        assert_eq!(
            must[1],
            QueryNode::term(FIELD_STRING, FieldValue::String("morgan".into()))
        );
    }

    #[test]
    fn test_equal_wildcard_becomes_prefix() {
        let t = translate(Some(&Operand::eq("name", "Mor*"))).unwrap();
        let must = unwrap_nested(t.query.as_ref().unwrap()).to_vec();
        assert_eq!(
            must[1],
            QueryNode::Prefix {
                field: FIELD_STRING.into(),
                value: "mor".into()
            }
        );
    }

    #[test]
    fn test_typed_equal_uses_typed_projection() {
        let t = translate(Some(&Operand::eq("age", 41i64))).unwrap();
        let must = unwrap_nested(t.query.as_ref().unwrap()).to_vec();
        assert_eq!(must[1], QueryNode::term("fields.long", FieldValue::Long(41)));
    }

    #[test]
    fn test_string_range_goes_through_analyzed() {
        let t = translate(Some(&Operand::gte("name", "m"))).unwrap();
        let must = unwrap_nested(t.query.as_ref().unwrap()).to_vec();
        match &must[1] {
            QueryNode::Range { field, gte, .. } => {
                assert_eq!(field, FIELD_STRING_ANALYZED);
                assert_eq!(gte, &Some(FieldValue::String("m".into())));
            }
            other => panic!("expected range, got {:?}", other),
        }
        let t = translate(Some(&Operand::lt("score", 1.5))).unwrap();
        let must = unwrap_nested(t.query.as_ref().unwrap()).to_vec();
        assert!(matches!(&must[1], QueryNode::Range { field, .. } if field == "fields.double"));
    }

    #[test]
    fn test_contains_requires_string() {
        let err = translate(Some(&Operand::contains("age", 4i64))).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedField { ref field, .. } if field == "age"));
        let t = translate(Some(&Operand::contains("title", "Rust Book"))).unwrap();
        let must = unwrap_nested(t.query.as_ref().unwrap()).to_vec();
        assert_eq!(
            must[1],
            QueryNode::Match {
                field: FIELD_STRING_ANALYZED.into(),
                text: "rust book".into()
            }
        );
    }

    #[test]
    fn test_boolean_structure() {
        let op = Operand::eq("a", 1i64)
            .and(Operand::eq("b", 2i64))
            .or(Operand::eq("c", 3i64).negate());
        let t = translate(Some(&op)).unwrap();
        match t.query.unwrap() {
            QueryNode::Bool(b) => {
                assert_eq!(b.should.len(), 2);
                assert!(matches!(&b.should[0], QueryNode::Bool(inner) if inner.must.len() == 2));
                assert!(matches!(&b.should[1], QueryNode::Bool(inner) if inner.must_not.len() == 1));
            }
            other => panic!("expected bool, got {:?}", other),
        }
    }

    #[test]
    fn test_within_is_hoisted_out_of_or() {
        let center = GeoPoint::new(37.0, -122.0);
        let op = Operand::eq("a", 1i64).or(Operand::within("Location", 500.0, center));
        let t = translate(Some(&op)).unwrap();
        // The OR collapses to its only query-producing side.
        let must = unwrap_nested(t.query.as_ref().unwrap()).to_vec();
        assert_eq!(must[0], name_term("a"));
        assert_eq!(t.filters.len(), 1);
        assert_eq!(t.geo_origin("location"), Some(center));
    }

    #[test]
    fn test_lone_within_has_no_query() {
        let op = Operand::within("loc", 10.0, GeoPoint::new(0.0, 0.0));
        let t = translate(Some(&op)).unwrap();
        assert!(t.query.is_none());
        assert_eq!(t.filters.len(), 1);
    }

    #[test]
    fn test_clause_limit() {
        let mut op = Operand::eq("p", 0i64);
        for i in 1..300i64 {
            op = op.or(Operand::eq("p", i));
        }
        assert!(matches!(
            translate(Some(&op)),
            Err(IndexError::InvalidQuery(_))
        ));
    }
}
