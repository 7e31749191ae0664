//! Typed field entries carried in the nested `fields` list of every document,
//! and the projection names queries address them by.

use crate::types::GeoPoint;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Path of the nested field list inside a document.
pub const ENTITY_FIELDS: &str = "fields";

pub const FIELD_NAME: &str = "fields.name";
/// Exact (keyword) string projection, lower-cased at index time.
pub const FIELD_STRING: &str = "fields.string";
/// Tokenized string projection used for ranges and `contains`.
pub const FIELD_STRING_ANALYZED: &str = "fields.string.analyzed";
pub const FIELD_LONG: &str = "fields.long";
pub const FIELD_DOUBLE: &str = "fields.double";
pub const FIELD_BOOLEAN: &str = "fields.boolean";
pub const FIELD_UUID: &str = "fields.uuid";
pub const FIELD_LOCATION: &str = "fields.location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Boolean,
    Long,
    Double,
    Uuid,
    Location,
}

impl FieldType {
    /// Key of this type inside a serialized field entry.
    pub fn key(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Long => "long",
            FieldType::Double => "double",
            FieldType::Uuid => "uuid",
            FieldType::Location => "location",
        }
    }

    /// Projection a sort on this type addresses.
    pub fn projection(&self) -> &'static str {
        match self {
            FieldType::String => FIELD_STRING,
            FieldType::Boolean => FIELD_BOOLEAN,
            FieldType::Long => FIELD_LONG,
            FieldType::Double => FIELD_DOUBLE,
            FieldType::Uuid => FIELD_UUID,
            FieldType::Location => FIELD_LOCATION,
        }
    }

    /// Mapping type name the backend uses when a sort hits an unmapped field.
    pub fn unmapped_type(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::Uuid => "keyword",
            FieldType::Boolean => "boolean",
            FieldType::Long => "long",
            FieldType::Double => "double",
            FieldType::Location => "geo_point",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    String(String),
    Boolean(bool),
    Long(i64),
    Double(f64),
    Uuid(Uuid),
    Location(GeoPoint),
}

// Doubles compare by bit pattern so operations carrying them can live in
// hash sets.
impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::String(a), FieldValue::String(b)) => a == b,
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a == b,
            (FieldValue::Long(a), FieldValue::Long(b)) => a == b,
            (FieldValue::Double(a), FieldValue::Double(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Uuid(a), FieldValue::Uuid(b)) => a == b,
            (FieldValue::Location(a), FieldValue::Location(b)) => {
                a.lat.to_bits() == b.lat.to_bits() && a.lon.to_bits() == b.lon.to_bits()
            }
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FieldValue::String(s) => s.hash(state),
            FieldValue::Boolean(b) => b.hash(state),
            FieldValue::Long(i) => i.hash(state),
            FieldValue::Double(f) => f.to_bits().hash(state),
            FieldValue::Uuid(u) => u.hash(state),
            FieldValue::Location(p) => {
                p.lat.to_bits().hash(state);
                p.lon.to_bits().hash(state);
            }
        }
    }
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::String(_) => FieldType::String,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Uuid(_) => FieldType::Uuid,
            FieldValue::Location(_) => FieldType::Location,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Long(i) => Some(*i as f64),
            FieldValue::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Long(i) => json!(i),
            FieldValue::Double(f) => json!(f),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::Location(p) => json!({"lat": p.lat, "lon": p.lon}),
        }
    }

    /// Ordering between values of compatible types. Longs and doubles compare
    /// numerically with each other; anything else across types is unordered.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::String(a), FieldValue::String(b)) => Some(a.cmp(b)),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => Some(a.cmp(b)),
            (FieldValue::Long(a), FieldValue::Long(b)) => Some(a.cmp(b)),
            (FieldValue::Uuid(a), FieldValue::Uuid(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

/// One `{name, typed value}` entry of a document's field list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityField {
    pub name: String,
    pub value: FieldValue,
}

impl EntityField {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        EntityField {
            name: name.into(),
            value,
        }
    }

    /// `{"name": ..., "<type>": value}`
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        map.insert(self.value.field_type().key().to_string(), self.value.to_json());
        Value::Object(map)
    }

    /// Value of this entry under a projection name, if the projection applies.
    pub fn projection(&self, projection: &str) -> Option<FieldValue> {
        match projection {
            FIELD_NAME => Some(FieldValue::String(self.name.clone())),
            FIELD_STRING | FIELD_STRING_ANALYZED => match self.value {
                FieldValue::String(_) => Some(self.value.clone()),
                _ => None,
            },
            _ if projection == self.value.field_type().projection() => Some(self.value.clone()),
            _ => None,
        }
    }
}

/// Standard analysis applied to the tokenized projection: split on anything
/// that is not alphanumeric, lower-case, drop empties.
pub fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn field_json_uses_type_key() {
        let f = EntityField::new("age", FieldValue::Long(41));
        assert_eq!(f.to_json(), json!({"name": "age", "long": 41}));
        let g = EntityField::new("home", FieldValue::Location(GeoPoint::new(37.0, -122.0)));
        assert_eq!(
            g.to_json(),
            json!({"name": "home", "location": {"lat": 37.0, "lon": -122.0}})
        );
    }

    #[test]
    fn doubles_hash_by_bits() {
        let mut set = HashSet::new();
        set.insert(EntityField::new("x", FieldValue::Double(1.5)));
        set.insert(EntityField::new("x", FieldValue::Double(1.5)));
        set.insert(EntityField::new("x", FieldValue::Long(1)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn numeric_compare_crosses_long_and_double() {
        assert_eq!(
            FieldValue::Long(2).compare(&FieldValue::Double(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(FieldValue::Boolean(true).compare(&FieldValue::Long(1)), None);
    }

    #[test]
    fn analyzer_splits_and_lowercases() {
        assert_eq!(analyze("Morgan Pierce-Smith"), vec!["morgan", "pierce", "smith"]);
        assert!(analyze("  ,, ").is_empty());
    }

    #[test]
    fn projections() {
        let f = EntityField::new("name", FieldValue::String("bob".into()));
        assert!(f.projection(FIELD_STRING).is_some());
        assert!(f.projection(FIELD_STRING_ANALYZED).is_some());
        assert!(f.projection(FIELD_LONG).is_none());
        assert_eq!(
            f.projection(FIELD_NAME),
            Some(FieldValue::String("name".into()))
        );
    }
}
