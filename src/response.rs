//! Outbound response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::request::{Auth, SecretInstance};

/// Response wrapping parameters requested by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WrapInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default)]
    pub ttl_seconds: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
}

/// The result of handling a request.
///
/// A response whose data carries an `"error"` key is a user-facing failure
/// that still counts as a successful dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub redirect: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_info: Option<WrapInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
}

impl Response {
    /// A response carrying only `data`.
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// A user-facing error response.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultframe::Response;
    ///
    /// let resp = Response::error("missing role");
    /// assert!(resp.is_error());
    /// assert_eq!(resp.error_message(), Some("missing role"));
    /// ```
    pub fn error(message: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("error".to_string(), Value::String(message.into()));
        Self::with_data(data)
    }

    /// A help response with rendered text and an optional OpenAPI document.
    pub fn help(text: impl Into<String>, see_also: Vec<String>, openapi: Option<Value>) -> Self {
        let mut data = Map::new();
        data.insert("help".to_string(), Value::String(text.into()));
        data.insert(
            "see_also".to_string(),
            Value::Array(see_also.into_iter().map(Value::String).collect()),
        );
        if let Some(doc) = openapi {
            data.insert("openapi".to_string(), doc);
        }
        Self::with_data(data)
    }

    /// A response listing `keys`, as returned by list operations.
    pub fn list(keys: Vec<String>) -> Self {
        let mut data = Map::new();
        data.insert(
            "keys".to_string(),
            Value::Array(keys.into_iter().map(Value::String).collect()),
        );
        Self::with_data(data)
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn is_error(&self) -> bool {
        self.data.contains_key("error")
    }

    pub fn error_message(&self) -> Option<&str> {
        self.data.get("error").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_fields_skipped() {
        let resp = Response::default();
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({}));

        let mut resp = Response::list(vec!["a".into()]);
        resp.add_warning("careful");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"data": {"keys": ["a"]}, "warnings": ["careful"]})
        );
    }

    #[test]
    fn test_help_response() {
        let resp = Response::help("text", vec![], Some(json!({"openapi": "3.0.2"})));
        assert_eq!(resp.data["help"], "text");
        assert_eq!(resp.data["openapi"]["openapi"], "3.0.2");
        assert!(!resp.is_error());
    }
}
