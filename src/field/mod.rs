//! Field schemas, kinds and coerced values.
//!
//! A [`FieldSchema`] declares the [`FieldKind`] of one request parameter.
//! Raw request values arrive as [`serde_json::Value`] and are coerced per kind
//! into a [`FieldValue`] by the rules in [`coerce`]. [`FieldData`] binds a raw
//! request map to a schema for the lifetime of one request.

pub mod coerce;
mod data;

pub use coerce::{canonical_header_key, CoerceError};
pub use data::FieldData;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field schemas keyed by field name.
pub type FieldMap = BTreeMap<String, FieldSchema>;

/// HTTP-style header map with canonicalized keys.
pub type Header = BTreeMap<String, Vec<String>>;

/// The kind of a field, which decides how raw input is coerced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FieldKind {
    #[default]
    Invalid,
    String,
    /// String, lowercased.
    LowerCaseString,
    /// String matching `^\w([\w\-.]*\w)?$`.
    NameString,
    Int,
    Int64,
    Float,
    Bool,
    /// Mapping from string to any value.
    Map,
    /// Mapping from string to string.
    KvPairs,
    /// Non-negative whole seconds.
    DurationSecond,
    /// Whole seconds, sign permitted.
    SignedDurationSecond,
    Slice,
    StringSlice,
    /// Accepts a comma-delimited string or a sequence.
    CommaStringSlice,
    CommaIntSlice,
    Header,
    /// Absolute time, normalized to UTC.
    Time,
}

/// Seconds from the Unix epoch to 0001-01-01T00:00:00Z.
const ZERO_TIME_SECS: i64 = -62_135_596_800;

/// The zero time, 0001-01-01T00:00:00Z.
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIME_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl FieldKind {
    /// The value `Get` returns for an absent field without a default.
    ///
    /// `Invalid` has no meaningful zero; an empty string is returned.
    pub fn zero(&self) -> FieldValue {
        match self {
            FieldKind::Invalid
            | FieldKind::String
            | FieldKind::LowerCaseString
            | FieldKind::NameString => FieldValue::String(String::new()),
            FieldKind::Int | FieldKind::Int64 => FieldValue::Int(0),
            FieldKind::Float => FieldValue::Float(0.0),
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Map => FieldValue::Map(Map::new()),
            FieldKind::KvPairs => FieldValue::KvPairs(BTreeMap::new()),
            FieldKind::DurationSecond | FieldKind::SignedDurationSecond => {
                FieldValue::Duration(0)
            }
            FieldKind::Slice => FieldValue::Slice(Vec::new()),
            FieldKind::StringSlice | FieldKind::CommaStringSlice => {
                FieldValue::StringSlice(Vec::new())
            }
            FieldKind::CommaIntSlice => FieldValue::IntSlice(Vec::new()),
            FieldKind::Header => FieldValue::Header(Header::new()),
            FieldKind::Time => FieldValue::Time(zero_time()),
        }
    }

    /// Name used in help output.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::LowerCaseString => "lowercase string",
            FieldKind::NameString => "name string",
            FieldKind::Int => "int",
            FieldKind::Int64 => "int64",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Map => "map",
            FieldKind::KvPairs => "keypair",
            FieldKind::DurationSecond | FieldKind::SignedDurationSecond => "duration (sec)",
            FieldKind::Slice
            | FieldKind::StringSlice
            | FieldKind::CommaStringSlice
            | FieldKind::CommaIntSlice => "slice",
            FieldKind::Header => "header",
            FieldKind::Time => "time",
            FieldKind::Invalid => "unknown type",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UI hints attached to fields, paths and operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayAttributes {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Example value shown in forms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub navigation: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edit_type: String,
}

impl DisplayAttributes {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// Declaration of one field.
///
/// # Example
///
/// ```
/// use vaultframe::field::{FieldKind, FieldSchema, FieldValue};
/// use serde_json::json;
///
/// let ttl = FieldSchema::new(FieldKind::DurationSecond)
///     .with_default(json!("1h"))
///     .with_description("Lease TTL");
///
/// assert_eq!(ttl.default_or_zero(), FieldValue::Duration(3600));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSchema {
    pub kind: FieldKind,
    /// Raw default, coerced through `kind` on use.
    pub default: Option<Value>,
    pub description: String,
    pub required: bool,
    pub deprecated: bool,
    /// Documented as a query parameter rather than a body parameter.
    pub query: bool,
    pub allowed_values: Vec<Value>,
    pub display_attrs: Option<DisplayAttributes>,
}

impl FieldSchema {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = if default.is_null() { None } else { Some(default) };
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn query(mut self) -> Self {
        self.query = true;
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = values;
        self
    }

    pub fn with_display_attrs(mut self, attrs: DisplayAttributes) -> Self {
        self.display_attrs = Some(attrs);
        self
    }

    /// The coerced default, or the kind's zero value.
    ///
    /// A default that does not coerce to the kind yields the zero value;
    /// [`FieldSchema::check_default`] reports that case at backend start.
    pub fn default_or_zero(&self) -> FieldValue {
        self.default
            .as_ref()
            .and_then(|raw| coerce::coerce(self.kind, raw).ok().flatten())
            .unwrap_or_else(|| self.kind.zero())
    }

    /// Verifies the kind is valid and the default coerces to it.
    pub fn check_default(&self) -> std::result::Result<(), CoerceError> {
        if self.kind == FieldKind::Invalid {
            return Err(CoerceError::new("invalid field type"));
        }
        if let Some(raw) = &self.default {
            coerce::coerce(self.kind, raw)?;
        }
        Ok(())
    }
}

/// A coerced field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Map(Map<String, Value>),
    KvPairs(BTreeMap<String, String>),
    /// Whole seconds.
    Duration(i64),
    Slice(Vec<Value>),
    StringSlice(Vec<String>),
    IntSlice(Vec<i64>),
    Header(Header),
    Time(DateTime<Utc>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value; durations yield their seconds.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) | FieldValue::Duration(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_kv_pairs(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            FieldValue::KvPairs(m) => Some(m),
            _ => None,
        }
    }

    /// Duration seconds as a [`Duration`]; `None` for negative values.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            FieldValue::Duration(secs) => u64::try_from(*secs).ok().map(Duration::from_secs),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            FieldValue::Slice(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string_slice(&self) -> Option<&[String]> {
        match self {
            FieldValue::StringSlice(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_slice(&self) -> Option<&[i64]> {
        match self {
            FieldValue::IntSlice(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_header(&self) -> Option<&Header> {
        match self {
            FieldValue::Header(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// JSON form, as stored or echoed back to clients.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Int(i) | FieldValue::Duration(i) => Value::from(*i),
            FieldValue::Float(f) => Value::from(*f),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Map(m) => Value::Object(m.clone()),
            FieldValue::KvPairs(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            FieldValue::Slice(v) => Value::Array(v.clone()),
            FieldValue::StringSlice(v) => {
                Value::Array(v.iter().cloned().map(Value::String).collect())
            }
            FieldValue::IntSlice(v) => Value::Array(v.iter().map(|i| Value::from(*i)).collect()),
            FieldValue::Header(h) => Value::Object(
                h.iter()
                    .map(|(k, vs)| {
                        let values = vs.iter().cloned().map(Value::String).collect();
                        (k.clone(), Value::Array(values))
                    })
                    .collect(),
            ),
            FieldValue::Time(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_values() {
        assert_eq!(FieldKind::String.zero(), FieldValue::String(String::new()));
        assert_eq!(FieldKind::Int64.zero(), FieldValue::Int(0));
        assert_eq!(FieldKind::Bool.zero(), FieldValue::Bool(false));
        assert_eq!(FieldKind::DurationSecond.zero(), FieldValue::Duration(0));
        assert_eq!(
            FieldKind::CommaStringSlice.zero(),
            FieldValue::StringSlice(vec![])
        );
        assert_eq!(FieldKind::Header.zero(), FieldValue::Header(Header::new()));
    }

    #[test]
    fn test_zero_time_is_year_one() {
        let FieldValue::Time(t) = FieldKind::Time.zero() else {
            panic!("expected a time value");
        };
        assert_eq!(t, zero_time());
        assert_eq!(t.to_rfc3339_opts(SecondsFormat::AutoSi, true), "0001-01-01T00:00:00Z");
        assert_eq!(FieldKind::Time.zero().to_json(), json!("0001-01-01T00:00:00Z"));
        assert_ne!(t, DateTime::<Utc>::default());
    }

    #[test]
    fn test_default_or_zero() {
        let schema = FieldSchema::new(FieldKind::NameString).with_default(json!("Larry"));
        assert_eq!(schema.default_or_zero(), FieldValue::String("Larry".into()));

        let schema = FieldSchema::new(FieldKind::DurationSecond).with_default(json!("24h"));
        assert_eq!(schema.default_or_zero(), FieldValue::Duration(86400));

        let schema = FieldSchema::new(FieldKind::DurationSecond).with_default(json!("nope"));
        assert_eq!(schema.default_or_zero(), FieldValue::Duration(0));
        assert!(schema.check_default().is_err());

        let schema = FieldSchema::new(FieldKind::Int);
        assert_eq!(schema.default_or_zero(), FieldValue::Int(0));
        assert!(schema.check_default().is_ok());
    }

    #[test]
    fn test_invalid_kind_rejected() {
        assert!(FieldSchema::default().check_default().is_err());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(FieldKind::KvPairs.to_string(), "keypair");
        assert_eq!(FieldKind::SignedDurationSecond.to_string(), "duration (sec)");
        assert_eq!(FieldKind::CommaIntSlice.to_string(), "slice");
    }

    #[test]
    fn test_to_json() {
        let header: Header = [("X-Foo".to_string(), vec!["a".to_string()])].into();
        assert_eq!(FieldValue::Header(header).to_json(), json!({"X-Foo": ["a"]}));
        assert_eq!(FieldValue::Duration(30).to_json(), json!(30));
        assert_eq!(
            FieldValue::StringSlice(vec!["a".into()]).to_json(),
            json!(["a"])
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(FieldValue::Duration(60).as_duration(), Some(Duration::from_secs(60)));
        assert_eq!(FieldValue::Duration(-1).as_duration(), None);
        assert_eq!(FieldValue::Duration(60).as_i64(), Some(60));
        assert_eq!(FieldValue::Int(1).as_str(), None);
    }
}
