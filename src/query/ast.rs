use crate::index::fields::FieldValue;
use crate::types::GeoPoint;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Uuid(Uuid),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::String(_) => "string",
            Literal::Long(_) => "long",
            Literal::Double(_) => "double",
            Literal::Boolean(_) => "boolean",
            Literal::Uuid(_) => "uuid",
        }
    }

    /// Value as stored in the index. Strings are lower-cased like indexed text.
    pub fn to_field_value(&self) -> FieldValue {
        match self {
            Literal::String(s) => FieldValue::String(s.to_lowercase()),
            Literal::Long(i) => FieldValue::Long(*i),
            Literal::Double(f) => FieldValue::Double(*f),
            Literal::Boolean(b) => FieldValue::Boolean(*b),
            Literal::Uuid(u) => FieldValue::Uuid(*u),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::String(s)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Long(i)
    }
}

impl From<i32> for Literal {
    fn from(i: i32) -> Self {
        Literal::Long(i64::from(i))
    }
}

impl From<f64> for Literal {
    fn from(f: f64) -> Self {
        Literal::Double(f)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Boolean(b)
    }
}

impl From<Uuid> for Literal {
    fn from(u: Uuid) -> Self {
        Literal::Uuid(u)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Literal::Long(i) => write!(f, "{}", i),
            Literal::Double(d) => write!(f, "{}", d),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Uuid(u) => write!(f, "{}", u),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub property: String,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithinOperand {
    pub property: String,
    pub distance_m: f64,
    pub center: GeoPoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    And(Box<Operand>, Box<Operand>),
    Or(Box<Operand>, Box<Operand>),
    Not(Box<Operand>),
    Equal(Comparison),
    LessThan(Comparison),
    LessThanEqual(Comparison),
    GreaterThan(Comparison),
    GreaterThanEqual(Comparison),
    Contains(Comparison),
    Within(WithinOperand),
}

fn cmp(property: impl Into<String>, value: impl Into<Literal>) -> Comparison {
    Comparison {
        property: property.into(),
        value: value.into(),
    }
}

impl Operand {
    pub fn eq(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Operand::Equal(cmp(property, value))
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Operand::LessThan(cmp(property, value))
    }

    pub fn lte(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Operand::LessThanEqual(cmp(property, value))
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Operand::GreaterThan(cmp(property, value))
    }

    pub fn gte(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Operand::GreaterThanEqual(cmp(property, value))
    }

    pub fn contains(property: impl Into<String>, value: impl Into<Literal>) -> Self {
        Operand::Contains(cmp(property, value))
    }

    pub fn within(property: impl Into<String>, distance_m: f64, center: GeoPoint) -> Self {
        Operand::Within(WithinOperand {
            property: property.into(),
            distance_m,
            center,
        })
    }

    pub fn and(self, other: Operand) -> Self {
        Operand::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Operand) -> Self {
        Operand::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Operand::Not(Box::new(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPredicate {
    pub property: String,
    pub direction: SortDirection,
}

impl SortPredicate {
    pub fn new(property: impl Into<String>, direction: SortDirection) -> Self {
        SortPredicate {
            property: property.into(),
            direction,
        }
    }
}

/// A parsed query: optional condition tree, sort predicates, optional limit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedQuery {
    pub root: Option<Operand>,
    pub sort: Vec<SortPredicate>,
    pub limit: Option<usize>,
}

impl ParsedQuery {
    pub fn all() -> Self {
        ParsedQuery::default()
    }

    pub fn with_root(root: Operand) -> Self {
        ParsedQuery {
            root: Some(root),
            ..ParsedQuery::default()
        }
    }

    pub fn order_by(mut self, property: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortPredicate::new(property, direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
