use crate::error::{IndexError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of an entity: a UUID plus its type name (`"user"`, `"car"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub uuid: Uuid,
    pub entity_type: String,
}

impl EntityId {
    pub fn new(uuid: Uuid, entity_type: impl Into<String>) -> Self {
        EntityId {
            uuid,
            entity_type: entity_type.into(),
        }
    }

    /// Fresh time-ordered id of the given type.
    pub fn generate(entity_type: impl Into<String>) -> Self {
        EntityId::new(Uuid::now_v7(), entity_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(IndexError::InvalidEntity(format!(
                "entity {} has an empty type",
                self.uuid
            )));
        }
        if self.uuid.is_nil() {
            return Err(IndexError::InvalidEntity(format!(
                "entity of type {} has a nil uuid",
                self.entity_type
            )));
        }
        Ok(())
    }
}

/// `{uuid}_{type}`, the form used inside document ids and context names.
impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.uuid, self.entity_type)
    }
}

impl FromStr for EntityId {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        let (uuid, entity_type) = s
            .split_once('_')
            .ok_or_else(|| IndexError::InvalidEntity(format!("malformed entity id '{}'", s)))?;
        let uuid = Uuid::parse_str(uuid)
            .map_err(|e| IndexError::InvalidEntity(format!("malformed entity id '{}': {}", s, e)))?;
        Ok(EntityId::new(uuid, entity_type))
    }
}

/// Time-ordered version identifier. Backed by a v7 UUID so the canonical
/// string form sorts in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(Uuid);

impl Version {
    pub fn now() -> Self {
        Version(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Version(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Version)
            .map_err(|e| IndexError::InvalidEntity(format!("malformed version '{}': {}", s, e)))
    }
}

/// The tenant boundary: every document and query is scoped to one application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationScope {
    pub application: EntityId,
}

impl ApplicationScope {
    pub fn new(application: EntityId) -> Self {
        ApplicationScope { application }
    }

    pub fn application_id(&self) -> &EntityId {
        &self.application
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Source,
    Target,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Source => "SOURCE",
            NodeRole::Target => "TARGET",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search context: the node at one end of a named edge, seen from `role`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchEdge {
    pub node_id: EntityId,
    pub edge_name: String,
    pub role: NodeRole,
}

impl SearchEdge {
    pub fn new(node_id: EntityId, edge_name: impl Into<String>, role: NodeRole) -> Self {
        SearchEdge {
            node_id,
            edge_name: edge_name.into(),
            role,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.node_id.validate()?;
        if self.edge_name.trim().is_empty() {
            return Err(IndexError::InvalidEntity("edge name cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// A [`SearchEdge`] plus the timestamp the edge was written at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEdge {
    pub node_id: EntityId,
    pub edge_name: String,
    pub role: NodeRole,
    pub timestamp: i64,
}

impl IndexEdge {
    pub fn new(
        node_id: EntityId,
        edge_name: impl Into<String>,
        role: NodeRole,
        timestamp: i64,
    ) -> Self {
        IndexEdge {
            node_id,
            edge_name: edge_name.into(),
            role,
            timestamp,
        }
    }

    pub fn search_edge(&self) -> SearchEdge {
        SearchEdge::new(self.node_id.clone(), self.edge_name.clone(), self.role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint { lat, lon }
    }
}

/// A property value as stored on an entity, before flattening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    String(String),
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Uuid(Uuid),
    Location(GeoPoint),
    Object(IndexMap<String, PropertyValue>),
    Array(Vec<PropertyValue>),
}

impl From<&serde_json::Value> for PropertyValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropertyValue::Null,
            serde_json::Value::Bool(b) => PropertyValue::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropertyValue::Long(i)
                } else {
                    n.as_f64()
                        .map(PropertyValue::Double)
                        .unwrap_or(PropertyValue::Null)
                }
            }
            serde_json::Value::String(s) => PropertyValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                PropertyValue::Array(items.iter().map(PropertyValue::from).collect())
            }
            serde_json::Value::Object(obj) => PropertyValue::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), PropertyValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Long(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Double(f)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(u: Uuid) -> Self {
        PropertyValue::Uuid(u)
    }
}

impl From<GeoPoint> for PropertyValue {
    fn from(p: GeoPoint) -> Self {
        PropertyValue::Location(p)
    }
}

/// An entity to be indexed. Id and version are optional on construction so
/// that half-built entities are rejected at flatten time rather than panicking.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entity {
    pub id: Option<EntityId>,
    pub version: Option<Version>,
    pub properties: IndexMap<String, PropertyValue>,
}

impl Entity {
    pub fn new(id: EntityId, version: Version) -> Self {
        Entity {
            id: Some(id),
            version: Some(version),
            properties: IndexMap::new(),
        }
    }

    /// Build an entity whose properties come from a JSON object.
    pub fn from_json(id: EntityId, version: Version, json: &serde_json::Value) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| IndexError::InvalidEntity("Expected JSON object".to_string()))?;
        let mut entity = Entity::new(id, version);
        for (key, value) in obj {
            entity
                .properties
                .insert(key.clone(), PropertyValue::from(value));
        }
        Ok(entity)
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }
}

/// Entity types a search is restricted to. Empty means all types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTypes(Vec<String>);

impl SearchTypes {
    pub fn all() -> Self {
        SearchTypes(Vec::new())
    }

    pub fn from_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = types
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        names.sort();
        names.dedup();
        SearchTypes(names)
    }

    pub fn type_names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One search hit: the entity and version a stored document points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateResult {
    pub id: EntityId,
    pub version: Version,
    pub doc_id: String,
}

/// A page of candidates plus an optional continuation cursor.
#[derive(Debug, Clone, Default)]
pub struct CandidateResults {
    pub candidates: Vec<CandidateResult>,
    pub cursor: Option<String>,
    pub offset: usize,
}

impl CandidateResults {
    pub fn new(candidates: Vec<CandidateResult>, cursor: Option<String>, offset: usize) -> Self {
        CandidateResults {
            candidates,
            cursor,
            offset,
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn has_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateResult> {
        self.candidates.iter()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.candidates.iter().map(|c| c.id.clone()).collect()
    }
}

impl IntoIterator for CandidateResults {
    type Item = CandidateResult;
    type IntoIter = std::vec::IntoIter<CandidateResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}
