//! Query evaluation and sorting over in-memory documents, following the
//! backend's semantics for nested queries, multi-valued sorts and missing
//! values.

use super::model::{QueryNode, SortClause, SortOrder};
use crate::index::document::IndexDocument;
use crate::index::fields::{analyze, EntityField, FieldValue, FIELD_STRING_ANALYZED};
use crate::query::geo;
use std::cmp::Ordering;

#[derive(Clone, Copy)]
enum Target<'a> {
    Doc(&'a IndexDocument),
    Field(&'a EntityField),
}

impl<'a> Target<'a> {
    fn value(&self, field: &str) -> Option<FieldValue> {
        match self {
            Target::Doc(doc) => doc.root_field(field),
            Target::Field(entry) => entry.projection(field),
        }
    }
}

pub(crate) fn matches(query: &QueryNode, doc: &IndexDocument) -> bool {
    eval(query, Target::Doc(doc))
}

fn eval(query: &QueryNode, target: Target<'_>) -> bool {
    match query {
        QueryNode::MatchAll => true,
        QueryNode::Term { field, value } => term_matches(target, field, value),
        QueryNode::Prefix { field, value } => {
            let Some(FieldValue::String(s)) = target.value(field) else {
                return false;
            };
            if field == FIELD_STRING_ANALYZED {
                analyze(&s).iter().any(|t| t.starts_with(value.as_str()))
            } else {
                s.starts_with(value.as_str())
            }
        }
        QueryNode::Match { field, text } => {
            let Some(FieldValue::String(s)) = target.value(field) else {
                return false;
            };
            let wanted = analyze(text);
            if wanted.is_empty() {
                return false;
            }
            let tokens = analyze(&s);
            wanted.iter().all(|w| tokens.contains(w))
        }
        QueryNode::Range {
            field,
            gt,
            gte,
            lt,
            lte,
        } => {
            let Some(actual) = target.value(field) else {
                return false;
            };
            // Analyzed strings match a range when any of their tokens does.
            let candidates = match (&actual, field.as_str()) {
                (FieldValue::String(s), FIELD_STRING_ANALYZED) => {
                    analyze(s).into_iter().map(FieldValue::String).collect()
                }
                _ => vec![actual],
            };
            candidates.iter().any(|v| in_range(v, gt, gte, lt, lte))
        }
        QueryNode::Bool(b) => {
            b.must.iter().all(|q| eval(q, target))
                && b.filter.iter().all(|q| eval(q, target))
                && !b.must_not.iter().any(|q| eval(q, target))
                && (b.should.is_empty() || b.should.iter().any(|q| eval(q, target)))
        }
        QueryNode::Nested { path, query } => match target {
            Target::Doc(doc) if path == crate::index::fields::ENTITY_FIELDS => doc
                .fields
                .iter()
                .any(|entry| eval(query, Target::Field(entry))),
            _ => false,
        },
        QueryNode::GeoDistance {
            field,
            center,
            distance_m,
        } => match target.value(field) {
            Some(FieldValue::Location(p)) => geo::within(&p, center, *distance_m),
            _ => false,
        },
    }
}

fn term_matches(target: Target<'_>, field: &str, value: &FieldValue) -> bool {
    let Some(actual) = target.value(field) else {
        return false;
    };
    if field == FIELD_STRING_ANALYZED {
        if let (FieldValue::String(s), FieldValue::String(v)) = (&actual, value) {
            return analyze(s).iter().any(|t| t == v);
        }
    }
    match (&actual, value) {
        (FieldValue::Long(_), FieldValue::Double(_)) | (FieldValue::Double(_), FieldValue::Long(_)) => {
            actual.compare(value) == Some(Ordering::Equal)
        }
        _ => &actual == value,
    }
}

fn in_range(
    v: &FieldValue,
    gt: &Option<FieldValue>,
    gte: &Option<FieldValue>,
    lt: &Option<FieldValue>,
    lte: &Option<FieldValue>,
) -> bool {
    let check = |bound: &Option<FieldValue>, ok: fn(Ordering) -> bool| match bound {
        None => true,
        Some(b) => v.compare(b).map(ok).unwrap_or(false),
    };
    check(gt, |o| o == Ordering::Greater)
        && check(gte, |o| o != Ordering::Less)
        && check(lt, |o| o == Ordering::Less)
        && check(lte, |o| o != Ordering::Greater)
}

/// One resolved sort key. `None` sorts last in either direction.
#[derive(Debug, Clone)]
pub(crate) enum SortKey {
    Value(FieldValue),
    Distance(f64),
}

fn compare_keys(a: &Option<SortKey>, b: &Option<SortKey>, order: SortOrder) -> Ordering {
    let ord = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(SortKey::Distance(x)), Some(SortKey::Distance(y))) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Some(SortKey::Value(x)), Some(SortKey::Value(y))) => {
            x.compare(y).unwrap_or(Ordering::Equal)
        }
        _ => Ordering::Equal,
    };
    match order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    }
}

fn clause_order(clause: &SortClause) -> SortOrder {
    match clause {
        SortClause::Field { order, .. }
        | SortClause::Nested { order, .. }
        | SortClause::GeoDistance { order, .. } => *order,
    }
}

/// Pick the min (ascending) or max (descending) of a multi-valued field.
fn pick(values: impl Iterator<Item = SortKey>, order: SortOrder) -> Option<SortKey> {
    values.fold(None, |best, v| match best {
        None => Some(v),
        Some(b) => {
            let keep_new = compare_keys(&Some(v.clone()), &Some(b.clone()), order) == Ordering::Less;
            Some(if keep_new { v } else { b })
        }
    })
}

pub(crate) fn sort_key(doc: &IndexDocument, clause: &SortClause) -> Option<SortKey> {
    match clause {
        SortClause::Field { field, .. } => doc.root_field(field).map(SortKey::Value),
        SortClause::Nested {
            field, name, order, ..
        } => pick(
            doc.fields_named(name)
                .filter_map(|f| f.projection(field))
                .map(SortKey::Value),
            *order,
        ),
        SortClause::GeoDistance {
            field,
            name,
            origin,
            order,
            ..
        } => pick(
            doc.fields_named(name)
                .filter_map(|f| match f.projection(field) {
                    Some(FieldValue::Location(p)) => Some(SortKey::Distance(geo::distance(&p, origin))),
                    _ => None,
                }),
            *order,
        ),
    }
}

/// Order documents by the sort clauses, falling back to document id so the
/// order is total.
pub(crate) fn sort_documents(docs: &mut [(String, IndexDocument)], sort: &[SortClause]) {
    let mut keyed: Vec<(Vec<Option<SortKey>>, usize)> = docs
        .iter()
        .enumerate()
        .map(|(i, (_, doc))| (sort.iter().map(|c| sort_key(doc, c)).collect(), i))
        .collect();

    keyed.sort_by(|(ka, ia), (kb, ib)| {
        for (clause, (a, b)) in sort.iter().zip(ka.iter().zip(kb.iter())) {
            let ord = compare_keys(a, b, clause_order(clause));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        docs[*ia].1.id.cmp(&docs[*ib].1.id)
    });

    let order: Vec<usize> = keyed.into_iter().map(|(_, i)| i).collect();
    let sorted: Vec<(String, IndexDocument)> = order.iter().map(|&i| docs[i].clone()).collect();
    for (slot, item) in docs.iter_mut().zip(sorted) {
        *slot = item;
    }
}
