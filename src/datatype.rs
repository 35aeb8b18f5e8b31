// used for persistence
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};

// used for the datetime value variant
use chrono::NaiveDateTime;

// used when parsing a stored string back into a NaiveDateTime
use std::str::FromStr;
// used to print out readable forms of a value
use std::fmt;

use crate::error::{Result, StowageError};

/// Canonical text form for stored datetimes. The `T` separator keeps the
/// stored form parseable by `NaiveDateTime::from_str` on restore.
const MOMENT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// The typed payload of an attribute.
///
/// Exactly one of five shapes: text, integer, floating point, datetime, or a
/// relation to another entity (held by name). A relation value creates a
/// directed edge from the owning entity to the referenced entity; the
/// referenced entity must exist when the attribute is added.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Real(f64),
    Moment(NaiveDateTime),
    Relation(String),
}

impl Value {
    pub fn relation(name: impl Into<String>) -> Self {
        Value::Relation(name.into())
    }
    /// Stable identifier stored alongside the value so the right variant
    /// can be reconstructed on restore.
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Text(_) => 1,
            Value::Int(_) => 2,
            Value::Real(_) => 3,
            Value::Moment(_) => 4,
            Value::Relation(_) => 5,
        }
    }
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Int(_) => "integer",
            Value::Real(_) => "real",
            Value::Moment(_) => "datetime",
            Value::Relation(_) => "relation",
        }
    }
    pub fn as_relation(&self) -> Option<&str> {
        match self {
            Value::Relation(name) => Some(name),
            _ => None,
        }
    }
    /// Rebuild a value from its persisted parts: the type tag, the stored
    /// column and (for relations) the relation column.
    pub fn restore(tag: u8, stored: ValueRef<'_>, relation: Option<String>) -> Result<Value> {
        match tag {
            1 => Ok(Value::Text(
                stored
                    .as_str()
                    .map_err(|e| StowageError::Type(e.to_string()))?
                    .to_owned(),
            )),
            2 => Ok(Value::Int(
                stored.as_i64().map_err(|e| StowageError::Type(e.to_string()))?,
            )),
            3 => Ok(Value::Real(
                stored.as_f64().map_err(|e| StowageError::Type(e.to_string()))?,
            )),
            4 => {
                let text = stored
                    .as_str()
                    .map_err(|e| StowageError::Type(e.to_string()))?;
                let moment = NaiveDateTime::from_str(text)
                    .map_err(|e| StowageError::Type(format!("bad stored datetime '{text}': {e}")))?;
                Ok(Value::Moment(moment))
            }
            5 => relation
                .map(Value::Relation)
                .ok_or_else(|| StowageError::Type("relation value without a relation target".into())),
            other => Err(StowageError::Type(format!("unknown value type tag {other}"))),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            Value::Int(i) => Ok(ToSqlOutput::from(*i)),
            Value::Real(r) => Ok(ToSqlOutput::from(*r)),
            Value::Moment(m) => Ok(ToSqlOutput::from(m.format(MOMENT_FORMAT).to_string())),
            // relations live in their own column so the pushdown can filter on them
            Value::Relation(_) => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Null)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Moment(m) => write!(f, "{}", m.format(MOMENT_FORMAT)),
            Value::Relation(name) => write!(f, "->{}", name),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_owned()) }
}
impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}
impl From<f64> for Value {
    fn from(r: f64) -> Self { Value::Real(r) }
}
impl From<NaiveDateTime> for Value {
    fn from(m: NaiveDateTime) -> Self { Value::Moment(m) }
}
