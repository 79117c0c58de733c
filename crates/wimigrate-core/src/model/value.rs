//! Field values carried by revisions and drafts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an entity in either store.
///
/// Source and target ids share the numeric space of the tracker API, so a
/// plain integer alias is used rather than separate newtypes.
pub type EntityId = i64;

/// Value of a single work item field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// No value.
    #[default]
    Null,
    /// Free-form or enumerated text.
    String(String),
    /// Integer value (also used for node ids).
    Integer(i64),
    /// Floating point value.
    Double(f64),
    /// Boolean value.
    Boolean(bool),
    /// Timestamp value.
    DateTime(DateTime<Utc>),
}

impl FieldValue {
    /// Check whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Borrow the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a timestamp, if it is one.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::DateTime(value)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert!(FieldValue::Null.is_null());
        assert_eq!(FieldValue::from("Active").as_str(), Some("Active"));
        assert_eq!(FieldValue::from(42).as_integer(), Some(42));
        assert_eq!(FieldValue::from(42).as_str(), None);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&FieldValue::from("Bug")).unwrap();
        assert_eq!(json, r#"{"string":"Bug"}"#);

        let null: FieldValue = serde_json::from_str(r#""null""#).unwrap();
        assert!(null.is_null());
    }
}
