//! OpenAPI 3.0 documents generated from a backend's paths.
//!
//! [`document_paths`] walks the paths of a backend and fills in an
//! [`OasDocument`]; [`OasDocument::create_operation_ids`] then assigns
//! stable, unique operation ids. Documents serialize to JSON with empty
//! members omitted and reload with [`OasDocument::from_value`].

mod document;
mod pattern;

pub use document::{
    clean_response, clean_string, construct_request_identifier, convert_type, document_path,
    document_paths, special_path_match, split_fields, DocumentOptions, OasType, PathMappings,
};
pub use pattern::expand_pattern;

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::field::DisplayAttributes;

/// Version of the OpenAPI specification emitted.
pub const OPENAPI_VERSION: &str = "3.0.2";

/// Name of the shared list-response component.
pub const STANDARD_LIST_RESPONSE: &str = "StandardListResponse";

/// Failures while generating or loading documents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenApiError {
    /// The pattern matches variable text outside a named capture and has no
    /// OpenAPI path equivalent.
    #[error("unsupported regex in path pattern {pattern:?}: only named captures may match variable text")]
    UnsupportedRegex { pattern: String },

    #[error("invalid path pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid OpenAPI document: {0}")]
    Decode(String),
}

fn is_false(b: &bool) -> bool {
    !b
}

/// A complete OpenAPI document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OasDocument {
    #[serde(rename = "openapi")]
    pub version: String,
    pub info: OasInfo,
    #[serde(default)]
    pub paths: BTreeMap<String, OasPathItem>,
    #[serde(default)]
    pub components: OasComponents,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasInfo {
    pub title: String,
    pub description: String,
    pub version: String,
    pub license: OasLicense,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasLicense {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasComponents {
    #[serde(default)]
    pub schemas: BTreeMap<String, OasSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasPathItem {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<OasParameter>,
    #[serde(rename = "x-vault-sudo", default, skip_serializing_if = "is_false")]
    pub sudo: bool,
    #[serde(rename = "x-vault-unauthenticated", default, skip_serializing_if = "is_false")]
    pub unauthenticated: bool,
    #[serde(rename = "x-vault-createSupported", default, skip_serializing_if = "is_false")]
    pub create_supported: bool,
    #[serde(rename = "x-vault-displayAttrs", default, skip_serializing_if = "Option::is_none")]
    pub display_attrs: Option<DisplayAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<OasOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<OasOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<OasOperation>,
}

impl OasPathItem {
    /// True if the item carries at least one operation.
    pub fn has_operations(&self) -> bool {
        self.get.is_some() || self.post.is_some() || self.delete.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// `path` or `query`.
    #[serde(rename = "in")]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<OasSchema>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasOperation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "operationId", default, skip_serializing_if = "String::is_empty")]
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<OasParameter>,
    #[serde(rename = "requestBody", default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<OasRequestBody>,
    #[serde(deserialize_with = "deserialize_responses")]
    pub responses: BTreeMap<u16, OasResponse>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,
}

/// Media type to schema.
pub type OasContent = BTreeMap<String, OasMediaType>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasRequestBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub content: OasContent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasMediaType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<OasSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasResponse {
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub content: OasContent,
}

/// A JSON schema, restricted to what generated documents use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OasSchema {
    #[serde(rename = "$ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, OasSchema>,
    /// Keys of `properties` that must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<OasSchema>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,
    /// Set for request bodies that accept keys beyond `properties`.
    #[serde(rename = "additionalProperties", default, skip_serializing_if = "is_false")]
    pub additional_properties: bool,
    #[serde(rename = "x-vault-displayAttrs", default, skip_serializing_if = "Option::is_none")]
    pub display_attrs: Option<DisplayAttributes>,
}

impl OasSchema {
    /// A schema of the given type.
    pub fn of(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// A `$ref` to a component schema.
    pub fn reference(component: &str) -> Self {
        Self {
            reference: format!("#/components/schemas/{component}"),
            ..Self::default()
        }
    }
}

/// Response codes arrive as JSON object keys; only `[100, 600)` is accepted.
fn deserialize_responses<'de, D>(deserializer: D) -> Result<BTreeMap<u16, OasResponse>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, OasResponse>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(code, response)| match code.parse::<u16>() {
            Ok(c) if (100..600).contains(&c) => Ok((c, response)),
            _ => Err(D::Error::custom(format!("invalid response code {code:?}"))),
        })
        .collect()
}

/// `application/json` content referencing a component schema.
pub(crate) fn json_ref_content(component: &str) -> OasContent {
    BTreeMap::from([(
        "application/json".to_string(),
        OasMediaType {
            schema: Some(OasSchema::reference(component)),
        },
    )])
}

impl OasDocument {
    /// An empty document for an API of the given version.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: OPENAPI_VERSION.to_string(),
            info: OasInfo {
                title: "Secrets Engine API".to_string(),
                description: "HTTP API of a mounted secrets backend. All routes are relative to the backend's mount path.".to_string(),
                version: version.into(),
                license: OasLicense {
                    name: "MIT OR Apache-2.0".to_string(),
                    url: "https://spdx.org/licenses/MIT.html".to_string(),
                },
            },
            paths: BTreeMap::new(),
            components: OasComponents::default(),
        }
    }

    /// Reloads a document from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiError::Decode`] when the value does not have the
    /// document's shape or a response code is outside `[100, 600)`.
    pub fn from_value(value: Value) -> Result<Self, OpenApiError> {
        serde_json::from_value(value).map_err(|e| OpenApiError::Decode(e.to_string()))
    }

    /// JSON form of the document.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Assigns operation ids to every operation that lacks one.
    ///
    /// Ids are the HTTP method followed by the title-cased words of the path,
    /// with `_mount_path` parameters shortened. Collisions get `_2`, `_3`,
    /// ... in path order; a non-empty `context` is appended to every id.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultframe::openapi::{OasDocument, OasOperation, OasPathItem};
    ///
    /// let mut doc = OasDocument::new("1.0.0");
    /// doc.paths.insert(
    ///     "/roles/{name}".to_string(),
    ///     OasPathItem { get: Some(OasOperation::default()), ..OasPathItem::default() },
    /// );
    /// doc.create_operation_ids("");
    ///
    /// let op = doc.paths["/roles/{name}"].get.as_ref().unwrap();
    /// assert_eq!(op.operation_id, "getRolesName");
    /// ```
    pub fn create_operation_ids(&mut self, context: &str) {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();

        for (path, item) in self.paths.iter_mut() {
            let base = title_words(&path.replacen("_mount_path", "", 1).to_lowercase());
            for (method, operation) in [
                ("get", item.get.as_mut()),
                ("post", item.post.as_mut()),
                ("delete", item.delete.as_mut()),
            ] {
                let Some(operation) = operation else {
                    continue;
                };
                if !operation.operation_id.is_empty() {
                    continue;
                }

                let mut id = format!("{method}{base}");
                let count = seen.entry(id.clone()).or_insert(0);
                *count += 1;
                if *count > 1 {
                    id = format!("{id}_{count}");
                }
                if !context.is_empty() {
                    id = format!("{id}_{context}");
                }
                operation.operation_id = id;
            }
        }
    }
}

/// Splits on non-word characters and capitalizes each word.
fn title_words(s: &str) -> String {
    s.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The shared schema for list responses: `{"keys": [string]}`.
pub fn standard_list_response() -> OasSchema {
    OasSchema {
        kind: "object".to_string(),
        properties: BTreeMap::from([(
            "keys".to_string(),
            OasSchema {
                kind: "array".to_string(),
                items: Some(Box::new(OasSchema::of("string"))),
                ..OasSchema::default()
            },
        )]),
        ..OasSchema::default()
    }
}
