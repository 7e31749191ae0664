//! Deterministic document identity and entity flattening.
//!
//! A physical document is keyed by (application, entity, version, edge
//! context), so re-sending the same logical write overwrites rather than
//! duplicates. Its body carries a handful of root fields used for scoping and
//! ordering plus a nested list of typed [`EntityField`]s.

use crate::error::{IndexError, Result};
use crate::index::fields::{EntityField, FieldValue, ENTITY_FIELDS};
use crate::types::{
    ApplicationScope, CandidateResult, Entity, EntityId, GeoPoint, IndexEdge, NodeRole,
    PropertyValue, SearchEdge, Version,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const APPLICATION_ID_FIELDNAME: &str = "applicationId";
pub const ENTITY_ID_FIELDNAME: &str = "entityId";
pub const ENTITY_VERSION_FIELDNAME: &str = "entityVersion";
pub const ENTITY_TYPE_FIELDNAME: &str = "entityType";
pub const EDGE_NODE_ID_FIELDNAME: &str = "nodeId";
pub const EDGE_NAME_FIELDNAME: &str = "edgeName";
pub const EDGE_NODE_TYPE_FIELDNAME: &str = "entityNodeType";
pub const EDGE_TIMESTAMP_FIELDNAME: &str = "edgeTimestamp";
pub const EDGE_SEARCH_FIELDNAME: &str = "edgeSearch";

/// Separator between the parts of a document id or context name.
pub const SEPARATOR: &str = "__";

const GEO_LATITUDE: &str = "latitude";
const GEO_LONGITUDE: &str = "longitude";

/// A flattened entity ready to be written to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub application_id: String,
    pub entity_id: String,
    pub entity_version: String,
    pub entity_type: String,
    pub node_id: String,
    pub edge_name: String,
    pub node_role: NodeRole,
    pub edge_timestamp: i64,
    pub edge_search: String,
    pub fields: Vec<EntityField>,
}

impl IndexDocument {
    /// Backend source body. The id travels separately.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            APPLICATION_ID_FIELDNAME.to_string(),
            Value::String(self.application_id.clone()),
        );
        map.insert(ENTITY_ID_FIELDNAME.to_string(), Value::String(self.entity_id.clone()));
        map.insert(
            ENTITY_VERSION_FIELDNAME.to_string(),
            Value::String(self.entity_version.clone()),
        );
        map.insert(
            ENTITY_TYPE_FIELDNAME.to_string(),
            Value::String(self.entity_type.clone()),
        );
        map.insert(EDGE_NODE_ID_FIELDNAME.to_string(), Value::String(self.node_id.clone()));
        map.insert(EDGE_NAME_FIELDNAME.to_string(), Value::String(self.edge_name.clone()));
        map.insert(
            EDGE_NODE_TYPE_FIELDNAME.to_string(),
            Value::String(self.node_role.as_str().to_string()),
        );
        map.insert(
            EDGE_TIMESTAMP_FIELDNAME.to_string(),
            Value::from(self.edge_timestamp),
        );
        map.insert(
            EDGE_SEARCH_FIELDNAME.to_string(),
            Value::String(self.edge_search.clone()),
        );
        map.insert(
            ENTITY_FIELDS.to_string(),
            Value::Array(self.fields.iter().map(EntityField::to_json).collect()),
        );
        Value::Object(map)
    }

    /// Value of a root (non-nested) field, for evaluating scope filters and
    /// root sorts.
    pub fn root_field(&self, name: &str) -> Option<FieldValue> {
        let s = |v: &String| Some(FieldValue::String(v.clone()));
        match name {
            APPLICATION_ID_FIELDNAME => s(&self.application_id),
            ENTITY_ID_FIELDNAME => s(&self.entity_id),
            ENTITY_VERSION_FIELDNAME => s(&self.entity_version),
            ENTITY_TYPE_FIELDNAME => s(&self.entity_type),
            EDGE_NODE_ID_FIELDNAME => s(&self.node_id),
            EDGE_NAME_FIELDNAME => s(&self.edge_name),
            EDGE_NODE_TYPE_FIELDNAME => Some(FieldValue::String(self.node_role.as_str().to_string())),
            EDGE_TIMESTAMP_FIELDNAME => Some(FieldValue::Long(self.edge_timestamp)),
            EDGE_SEARCH_FIELDNAME => s(&self.edge_search),
            _ => None,
        }
    }

    /// All entries of the nested field list with the given name.
    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EntityField> + 'a {
        self.fields.iter().filter(move |f| f.name == name)
    }
}

pub fn application_id(scope: &ApplicationScope) -> String {
    scope.application.to_string()
}

/// `{app}__{node}__{edgeName}__{role}`: the scope string every search filters on.
pub fn context_name(scope: &ApplicationScope, edge: &SearchEdge) -> String {
    [
        application_id(scope),
        edge.node_id.to_string(),
        edge.edge_name.clone(),
        edge.role.as_str().to_string(),
    ]
    .join(SEPARATOR)
}

/// `{app}__{entity}__{version}__{node}__{edgeName}__{role}`
pub fn create_index_doc_id(
    scope: &ApplicationScope,
    entity_id: &EntityId,
    version: &Version,
    edge: &SearchEdge,
) -> String {
    [
        application_id(scope),
        entity_id.to_string(),
        version.to_string(),
        edge.node_id.to_string(),
        edge.edge_name.clone(),
        edge.role.as_str().to_string(),
    ]
    .join(SEPARATOR)
}

/// Recover the entity id and version a document id was built from.
pub fn parse_index_doc_id(doc_id: &str) -> Result<CandidateResult> {
    let parts: Vec<&str> = doc_id.split(SEPARATOR).collect();
    if parts.len() < 6 {
        return Err(IndexError::Backend(format!(
            "unexpected document id format: {}",
            doc_id
        )));
    }
    let id: EntityId = parts[1].parse()?;
    let version: Version = parts[2].parse()?;
    Ok(CandidateResult {
        id,
        version,
        doc_id: doc_id.to_string(),
    })
}

/// Project an entity into the document stored for one edge context.
pub fn flatten(scope: &ApplicationScope, edge: &IndexEdge, entity: &Entity) -> Result<IndexDocument> {
    scope.application.validate()?;
    let entity_id = entity
        .id
        .as_ref()
        .ok_or_else(|| IndexError::InvalidEntity("entity id cannot be null".to_string()))?;
    entity_id.validate()?;
    let version = entity.version.ok_or_else(|| {
        IndexError::InvalidEntity(format!("entity {} has no version", entity_id))
    })?;
    let search_edge = edge.search_edge();
    search_edge.validate()?;

    Ok(IndexDocument {
        id: create_index_doc_id(scope, entity_id, &version, &search_edge),
        application_id: application_id(scope),
        entity_id: entity_id.to_string(),
        entity_version: version.to_string(),
        entity_type: entity_id.entity_type.to_lowercase(),
        node_id: edge.node_id.to_string(),
        edge_name: edge.edge_name.clone(),
        node_role: edge.role,
        edge_timestamp: edge.timestamp,
        edge_search: context_name(scope, &search_edge),
        fields: flatten_properties(&entity.properties),
    })
}

/// Flatten a property map into typed field entries.
///
/// Nested objects produce dotted names, array elements repeat the array's
/// name, and nested arrays are skipped with a warning.
pub fn flatten_properties(properties: &IndexMap<String, PropertyValue>) -> Vec<EntityField> {
    let mut collector = FieldCollector::default();
    for (name, value) in properties {
        collector.visit(&name.to_lowercase(), value, false);
    }
    collector.fields
}

#[derive(Default)]
struct FieldCollector {
    fields: Vec<EntityField>,
}

impl FieldCollector {
    fn push(&mut self, name: &str, value: FieldValue) {
        self.fields.push(EntityField::new(name, value));
    }

    fn visit(&mut self, name: &str, value: &PropertyValue, in_array: bool) {
        match value {
            PropertyValue::Null => {}
            PropertyValue::String(s) => self.push(name, FieldValue::String(s.to_lowercase())),
            PropertyValue::Boolean(b) => self.push(name, FieldValue::Boolean(*b)),
            PropertyValue::Integer(i) => self.push(name, FieldValue::Long(i64::from(*i))),
            PropertyValue::Long(i) => self.push(name, FieldValue::Long(*i)),
            PropertyValue::Float(f) => self.push(name, FieldValue::Double(f64::from(*f))),
            PropertyValue::Double(f) => self.push(name, FieldValue::Double(*f)),
            PropertyValue::Uuid(u) => self.push(name, FieldValue::Uuid(*u)),
            PropertyValue::Location(p) => self.push(name, FieldValue::Location(*p)),
            PropertyValue::Object(map) => {
                if let Some(point) = geo_point(map) {
                    self.push(name, FieldValue::Location(point));
                    return;
                }
                for (child, child_value) in map {
                    let path = format!("{}.{}", name, child.to_lowercase());
                    self.visit(&path, child_value, false);
                }
            }
            PropertyValue::Array(items) => {
                if in_array {
                    tracing::warn!(
                        "[FLATTEN] skipping field '{}': nested arrays cannot be indexed",
                        name
                    );
                    return;
                }
                for item in items {
                    self.visit(name, item, true);
                }
            }
        }
    }
}

fn number(value: &PropertyValue) -> Option<f64> {
    match value {
        PropertyValue::Integer(i) => Some(f64::from(*i)),
        PropertyValue::Long(i) => Some(*i as f64),
        PropertyValue::Float(f) => Some(f64::from(*f)),
        PropertyValue::Double(f) => Some(*f),
        _ => None,
    }
}

/// An object made of exactly numeric `latitude` and `longitude` keys is a
/// point. Anything with extra keys is an ordinary nested object.
fn geo_point(map: &IndexMap<String, PropertyValue>) -> Option<GeoPoint> {
    if map.len() != 2 {
        return None;
    }
    let mut lat = None;
    let mut lon = None;
    for (key, value) in map {
        if key.eq_ignore_ascii_case(GEO_LATITUDE) {
            lat = number(value);
        } else if key.eq_ignore_ascii_case(GEO_LONGITUDE) {
            lon = number(value);
        }
    }
    Some(GeoPoint::new(lat?, lon?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn scope() -> ApplicationScope {
        ApplicationScope::new(EntityId::new(Uuid::new_v4(), "application"))
    }

    fn edge() -> IndexEdge {
        IndexEdge::new(EntityId::generate("application"), "users", NodeRole::Source, 1000)
    }

    fn entity(json: Value) -> Entity {
        Entity::from_json(EntityId::generate("user"), Version::now(), &json).unwrap()
    }

    #[test]
    fn doc_id_parses_back() {
        let scope = scope();
        let e = entity(json!({}));
        let doc = flatten(&scope, &edge(), &e).unwrap();
        let parsed = parse_index_doc_id(&doc.id).unwrap();
        assert_eq!(Some(parsed.id), e.id);
        assert_eq!(Some(parsed.version), e.version);
    }

    #[test]
    fn doc_id_keeps_edge_names_with_separators() {
        let scope = scope();
        let edge = IndexEdge::new(EntityId::generate("user"), "likes__a_lot", NodeRole::Target, 5);
        let e = entity(json!({}));
        let doc = flatten(&scope, &edge, &e).unwrap();
        let parsed = parse_index_doc_id(&doc.id).unwrap();
        assert_eq!(Some(parsed.id), e.id);
    }

    #[test]
    fn context_name_differs_per_role() {
        let scope = scope();
        let node = EntityId::generate("user");
        let a = context_name(&scope, &SearchEdge::new(node.clone(), "likes", NodeRole::Source));
        let b = context_name(&scope, &SearchEdge::new(node, "likes", NodeRole::Target));
        assert_ne!(a, b);
    }

    #[test]
    fn missing_id_or_version_rejected() {
        let mut e = entity(json!({"a": 1}));
        e.version = None;
        assert!(matches!(
            flatten(&scope(), &edge(), &e),
            Err(IndexError::InvalidEntity(_))
        ));
        e.version = Some(Version::now());
        e.id = None;
        assert!(matches!(
            flatten(&scope(), &edge(), &e),
            Err(IndexError::InvalidEntity(_))
        ));
    }

    #[test]
    fn empty_type_rejected() {
        let e = Entity::new(EntityId::new(Uuid::new_v4(), ""), Version::now());
        assert!(flatten(&scope(), &edge(), &e).is_err());
    }

    #[test]
    fn nested_paths_use_dots() {
        let fields = flatten_properties(
            &entity(json!({"Address": {"City": "Austin", "zip": {"code": 78701}}})).properties,
        );
        assert_eq!(
            fields,
            vec![
                EntityField::new("address.city", FieldValue::String("austin".into())),
                EntityField::new("address.zip.code", FieldValue::Long(78701)),
            ]
        );
    }

    #[test]
    fn numeric_widening() {
        let e = Entity::new(EntityId::generate("thing"), Version::now())
            .with_property("small", 7i32)
            .with_property("ratio", PropertyValue::Float(0.5));
        let fields = flatten_properties(&e.properties);
        assert_eq!(fields[0].value, FieldValue::Long(7));
        assert_eq!(fields[1].value, FieldValue::Double(0.5));
    }

    #[test]
    fn geo_shape_becomes_location_at_any_depth() {
        let fields = flatten_properties(
            &entity(json!({
                "location": {"latitude": 37.77, "longitude": -122.41},
                "meta": {"origin": {"latitude": 1, "longitude": 2}}
            }))
            .properties,
        );
        assert_eq!(
            fields,
            vec![
                EntityField::new("location", FieldValue::Location(GeoPoint::new(37.77, -122.41))),
                EntityField::new("meta.origin", FieldValue::Location(GeoPoint::new(1.0, 2.0))),
            ]
        );
    }

    #[test]
    fn half_a_geo_point_is_an_ordinary_object() {
        let fields = flatten_properties(&entity(json!({"pos": {"latitude": 3.0}})).properties);
        assert_eq!(
            fields,
            vec![EntityField::new("pos.latitude", FieldValue::Double(3.0))]
        );
    }

    #[test]
    fn array_objects_share_paths() {
        let fields = flatten_properties(
            &entity(json!({"array": [{"nested1": {"nested2": {"name": "A"}}}, {"nested1": {"nested2": {"name": "b"}}}]}))
                .properties,
        );
        assert_eq!(fields.len(), 2);
        assert!(fields.iter().all(|f| f.name == "array.nested1.nested2.name"));
    }

    #[test]
    fn nested_array_inside_object_in_array_is_still_visited() {
        let fields = flatten_properties(
            &entity(json!({"a": [{"b": [1, 2]}, [3, 4]]})).properties,
        );
        assert_eq!(
            fields,
            vec![
                EntityField::new("a.b", FieldValue::Long(1)),
                EntityField::new("a.b", FieldValue::Long(2)),
            ]
        );
    }
}
