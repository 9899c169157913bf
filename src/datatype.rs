// used for persistence
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// used for date attributes
use chrono::{NaiveDate, NaiveDateTime};

// used to expose values in the binary's output
use serde::{Serialize, Serializer};

use std::fmt;
use std::str::FromStr;

use crate::error::{RepositoryError, Result};

/// Textual form of dates, both when binding parameters and when storing rows.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ------------- Content Identity -------------
/// Composite key `"{objectType}.{objectId}"` of one entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    object_type: i64,
    object_id: i64,
}

impl ContentId {
    pub fn new(object_type: i64, object_id: i64) -> Self {
        Self {
            object_type,
            object_id,
        }
    }
    pub fn object_type(&self) -> i64 {
        self.object_type
    }
    pub fn object_id(&self) -> i64 {
        self.object_id
    }
}
impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.object_type, self.object_id)
    }
}
impl FromStr for ContentId {
    type Err = RepositoryError;
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RepositoryError::Parse {
            message: format!("'{s}' is not a content id of the form <type>.<id>"),
            line: None,
            col: None,
        };
        let (object_type, object_id) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            object_type: object_type.trim().parse().map_err(|_| invalid())?,
            object_id: object_id.trim().parse().map_err(|_| invalid())?,
        })
    }
}
impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ------------- Attribute Types -------------
/// Logical attribute types with the codes used in `contentattributetype.attributetype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Text,
    LinkObject,
    Integer,
    LongText,
    Binary,
    ForeignLinkObject,
    Long,
    Double,
    Date,
    Blob,
}

impl AttributeType {
    pub fn code(&self) -> i64 {
        match self {
            AttributeType::Text => 1,
            AttributeType::LinkObject => 2,
            AttributeType::Integer => 3,
            AttributeType::LongText => 5,
            AttributeType::Binary => 6,
            AttributeType::ForeignLinkObject => 7,
            AttributeType::Long => 8,
            AttributeType::Double => 9,
            AttributeType::Date => 10,
            AttributeType::Blob => 11,
        }
    }
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(AttributeType::Text),
            2 => Some(AttributeType::LinkObject),
            3 => Some(AttributeType::Integer),
            5 => Some(AttributeType::LongText),
            6 => Some(AttributeType::Binary),
            7 => Some(AttributeType::ForeignLinkObject),
            8 => Some(AttributeType::Long),
            9 => Some(AttributeType::Double),
            10 => Some(AttributeType::Date),
            11 => Some(AttributeType::Blob),
            _ => None,
        }
    }
    /// The typed value column of `contentattribute` that holds this type.
    /// Foreign links are virtual and have none.
    pub fn value_column(&self) -> Option<&'static str> {
        match self {
            AttributeType::Text | AttributeType::LinkObject => Some("value_text"),
            AttributeType::Integer => Some("value_int"),
            AttributeType::LongText => Some("value_clob"),
            AttributeType::Binary | AttributeType::Blob => Some("value_blob"),
            AttributeType::Long => Some("value_long"),
            AttributeType::Double => Some("value_double"),
            AttributeType::Date => Some("value_date"),
            AttributeType::ForeignLinkObject => None,
        }
    }
    pub fn is_link(&self) -> bool {
        matches!(self, AttributeType::LinkObject | AttributeType::ForeignLinkObject)
    }
    pub fn is_binary(&self) -> bool {
        matches!(self, AttributeType::Binary | AttributeType::Blob)
    }
    /// Column type used when a quick column is added for this type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            AttributeType::Text | AttributeType::LinkObject | AttributeType::LongText => "text",
            AttributeType::Integer | AttributeType::Long => "integer",
            AttributeType::Double => "real",
            AttributeType::Date => "text",
            AttributeType::Binary | AttributeType::Blob => "blob",
            AttributeType::ForeignLinkObject => "text",
        }
    }
}

// ------------- Values -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Double(f64),
    Date(NaiveDateTime),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn is_empty_string(&self) -> bool {
        matches!(self, Value::Text(s) if s.is_empty())
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
    /// Converts a literal to the representation stored for `attribute_type`
    /// when that can be done without loss. Empty strings are left alone.
    pub fn coerce(self, attribute_type: AttributeType) -> Value {
        if self.is_empty_string() {
            return self;
        }
        match (attribute_type, self) {
            (
                AttributeType::Text | AttributeType::LongText | AttributeType::LinkObject,
                Value::Integer(i),
            ) => Value::Text(i.to_string()),
            (
                AttributeType::Text | AttributeType::LongText | AttributeType::LinkObject,
                Value::Double(d),
            ) => Value::Text(d.to_string()),
            (AttributeType::Integer | AttributeType::Long, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::Text(s),
            },
            (AttributeType::Double, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(d) => Value::Double(d),
                Err(_) => Value::Text(s),
            },
            (AttributeType::Double, Value::Integer(i)) => Value::Double(i as f64),
            (AttributeType::Date, Value::Text(s)) => match parse_date(&s) {
                Some(date) => Value::Date(date),
                None => Value::Text(s),
            },
            (_, value) => value,
        }
    }
    /// Stable textual form used in cache keys; distinguishes the variants.
    pub fn cache_repr(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Text(s) => format!("t:{s}"),
            Value::Integer(i) => format!("i:{i}"),
            Value::Double(d) => format!("d:{}", d.to_bits()),
            Value::Date(d) => format!("D:{}", d.format(DATE_FORMAT)),
            Value::Blob(b) => format!("b:{}", seahash::hash(b)),
        }
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and plain `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Date(d) => write!(f, "'{}'", d.format(DATE_FORMAT)),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}
impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}
impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Double(d) => ToSqlOutput::from(*d),
            Value::Date(d) => ToSqlOutput::from(d.format(DATE_FORMAT).to_string()),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}
impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(d) => Value::Double(d),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::Date(d) => serializer.collect_str(&d.format(DATE_FORMAT)),
            Value::Blob(b) => serializer.serialize_bytes(b),
        }
    }
}
