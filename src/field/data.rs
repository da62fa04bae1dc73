use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::coerce::{coerce, display_value};
use super::{FieldMap, FieldSchema, FieldValue};
use crate::error::{FrameworkError, Result};

/// Raw request data bound to a field schema for one request.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vaultframe::field::{FieldData, FieldKind, FieldMap, FieldSchema};
/// use serde_json::json;
///
/// let mut schema = FieldMap::new();
/// schema.insert("ttl".into(), FieldSchema::new(FieldKind::DurationSecond));
/// schema.insert("name".into(), FieldSchema::new(FieldKind::String));
///
/// let raw = json!({"ttl": "5m"}).as_object().cloned().unwrap();
/// let data = FieldData::new(raw, Arc::new(schema));
///
/// assert!(data.validate().is_ok());
/// assert_eq!(data.get("ttl").as_i64(), Some(300));
/// assert!(data.get_ok("name").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldData {
    raw: Map<String, Value>,
    schema: Arc<FieldMap>,
}

impl FieldData {
    pub fn new(raw: Map<String, Value>, schema: Arc<FieldMap>) -> Self {
        Self { raw, schema }
    }

    /// Raw, uncoerced input.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn schema(&self) -> &FieldMap {
        &self.schema
    }

    /// Coerces every raw key declared in the schema.
    ///
    /// Undeclared keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first [`FrameworkError::FieldConversion`] in key order.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in &self.raw {
            let Some(schema) = self.schema.get(field) else {
                continue;
            };
            coerce(schema.kind, value).map_err(|e| conversion_error(field, value, e))?;
        }
        Ok(())
    }

    fn schema_for(&self, key: &str) -> Option<&FieldSchema> {
        self.schema.get(key)
    }

    /// The coerced value, or the default/zero value when absent or invalid.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not declared in the schema; that is a bug in the
    /// backend definition.
    pub fn get(&self, key: &str) -> FieldValue {
        let Some(schema) = self.schema_for(key) else {
            panic!("field {key} not in the schema");
        };
        self.get_ok(key).unwrap_or_else(|| schema.default_or_zero())
    }

    /// The coerced value when present and valid.
    pub fn get_ok(&self, key: &str) -> Option<FieldValue> {
        self.get_ok_err(key).ok().flatten()
    }

    /// Like [`FieldData::get_ok`] but surfaces coercion failures.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::UnknownField`] for undeclared keys and
    /// [`FrameworkError::FieldConversion`] when the value does not coerce.
    pub fn get_ok_err(&self, key: &str) -> Result<Option<FieldValue>> {
        let schema = self
            .schema_for(key)
            .ok_or_else(|| FrameworkError::UnknownField(key.to_string()))?;
        let Some(raw) = self.raw.get(key) else {
            return Ok(None);
        };
        coerce(schema.kind, raw).map_err(|e| conversion_error(key, raw, e))
    }

    /// The first of `keys` that is present and valid.
    ///
    /// Supports deprecated aliases: list the current name first.
    pub fn get_first(&self, keys: &[&str]) -> Option<FieldValue> {
        keys.iter().find_map(|k| self.get_ok(k))
    }

    /// The schema default or zero value, ignoring raw input.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not declared in the schema.
    pub fn get_default_or_zero(&self, key: &str) -> FieldValue {
        match self.schema_for(key) {
            Some(schema) => schema.default_or_zero(),
            None => panic!("field {key} not in the schema"),
        }
    }

    /// String value of `key`, empty when absent.
    pub fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            FieldValue::String(s) => s,
            other => match other.to_json() {
                Value::String(s) => s,
                json => json.to_string(),
            },
        }
    }

    /// Integer or duration seconds of `key`.
    pub fn get_i64(&self, key: &str) -> i64 {
        self.get(key).as_i64().unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).as_bool().unwrap_or_default()
    }

    pub fn get_string_slice(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            FieldValue::StringSlice(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn get_kv_pairs(&self, key: &str) -> BTreeMap<String, String> {
        match self.get(key) {
            FieldValue::KvPairs(m) => m,
            _ => BTreeMap::new(),
        }
    }
}

fn conversion_error(field: &str, raw: &Value, err: super::CoerceError) -> FrameworkError {
    FrameworkError::FieldConversion {
        field: field.to_string(),
        value: display_value(raw),
        reason: err.to_string(),
    }
}
