use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::pattern::expand_pattern;
use super::{
    json_ref_content, standard_list_response, OasDocument, OasMediaType, OasOperation,
    OasParameter, OasPathItem, OasRequestBody, OasResponse, OasSchema, OpenApiError,
    STANDARD_LIST_RESPONSE,
};
use crate::backend::{BackendType, SpecialPaths};
use crate::field::{FieldKind, FieldMap, FieldSchema};
use crate::path::{OperationProperties, Path};
use crate::request::Operation;
use crate::response::Response;
use crate::validation::NAME_STRING_PATTERN;

/// Operation-id fragments keyed by `(prefix, path)`, replacing the fragment
/// derived from the path's words.
pub type PathMappings = BTreeMap<(String, String), String>;

/// Inputs to document generation besides the paths themselves.
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    pub special_paths: SpecialPaths,
    /// Prefix for the mount-path parameter and component names, e.g. `aws`.
    pub request_response_prefix: String,
    pub backend_type: BackendType,
    pub path_mappings: PathMappings,
}

/// OpenAPI rendering of a [`FieldKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OasType {
    pub base_type: &'static str,
    pub format: &'static str,
    pub pattern: &'static str,
    /// Element type for arrays.
    pub items: Option<&'static str>,
}

/// Maps a field kind to its OpenAPI type.
pub fn convert_type(kind: FieldKind) -> OasType {
    let (base_type, format, pattern, items) = match kind {
        FieldKind::String | FieldKind::Header => ("string", "", "", None),
        FieldKind::NameString => ("string", "", NAME_STRING_PATTERN, None),
        FieldKind::LowerCaseString => ("string", "lowercase", "", None),
        FieldKind::Int => ("integer", "", "", None),
        FieldKind::Int64 => ("integer", "int64", "", None),
        FieldKind::DurationSecond | FieldKind::SignedDurationSecond => {
            ("integer", "seconds", "", None)
        }
        FieldKind::Bool => ("boolean", "", "", None),
        FieldKind::Map => ("object", "map", "", None),
        FieldKind::KvPairs => ("object", "kvpairs", "", None),
        FieldKind::Slice => ("array", "", "", Some("object")),
        FieldKind::StringSlice | FieldKind::CommaStringSlice => ("array", "", "", Some("string")),
        FieldKind::CommaIntSlice => ("array", "", "", Some("integer")),
        FieldKind::Time => ("string", "date-time", "", None),
        FieldKind::Float => ("number", "float", "", None),
        FieldKind::Invalid => ("unknown", "", "", None),
    };
    OasType {
        base_type,
        format,
        pattern,
        items,
    }
}

/// Trims and collapses whitespace runs to single spaces.
pub fn clean_string(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// JSON form of an example response with empty members dropped.
pub fn clean_response(resp: &Response) -> Value {
    serde_json::to_value(resp).unwrap_or_default()
}

/// True if `path` is covered by one of `special_paths`.
///
/// Entries match exactly, by prefix when they end in `*`, and segment-wise
/// when they contain `+`, which matches any single segment.
pub fn special_path_match(path: &str, special_paths: &[String]) -> bool {
    let path_parts: Vec<&str> = path.split('/').collect();

    special_paths.iter().any(|special| {
        if special == path {
            return true;
        }
        let (pattern, is_prefix) = match special.strip_suffix('*') {
            Some(stripped) => (stripped, true),
            None => (special.as_str(), false),
        };
        if !pattern.contains('+') {
            return is_prefix && path.starts_with(pattern);
        }
        matches_by_parts(&path_parts, &pattern.split('/').collect::<Vec<_>>(), is_prefix)
    })
}

fn matches_by_parts(path_parts: &[&str], special_parts: &[&str], is_prefix: bool) -> bool {
    if path_parts.len() < special_parts.len() {
        return false;
    }
    for (i, pattern) in special_parts.iter().enumerate() {
        if *pattern == "+" {
            continue;
        }
        if is_prefix && i == special_parts.len() - 1 {
            return path_parts[i].starts_with(pattern);
        }
        if path_parts[i] != *pattern {
            return false;
        }
    }
    path_parts.len() == special_parts.len()
}

/// Partitions a path's fields for one expanded OpenAPI path.
///
/// Returns `(path, query, body)` fields. Captures of the pattern that do not
/// appear in this expansion are in none of them. Captures with no declared
/// schema are documented as strings.
pub fn split_fields(
    fields: &FieldMap,
    openapi_path: &str,
    captures: &BTreeSet<String>,
) -> (FieldMap, FieldMap, FieldMap) {
    let mut path_fields = FieldMap::new();
    let mut query_fields = FieldMap::new();
    let mut body_fields = FieldMap::new();

    for name in path_parameters(openapi_path) {
        let schema = fields
            .get(name)
            .cloned()
            .unwrap_or_else(|| FieldSchema::new(FieldKind::String));
        path_fields.insert(name.to_string(), schema);
    }

    for (name, field) in fields {
        if path_fields.contains_key(name) || captures.contains(name) {
            continue;
        }
        if field.query {
            query_fields.insert(name.clone(), field.clone());
        } else {
            body_fields.insert(name.clone(), field.clone());
        }
    }

    (path_fields, query_fields, body_fields)
}

/// Names of the `{param}` segments in an expanded path.
fn path_parameters(path: &str) -> impl Iterator<Item = &str> {
    path.split('{')
        .skip(1)
        .filter_map(|chunk| chunk.split_once('}').map(|(name, _)| name))
        .filter(|name| !name.is_empty())
}

fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

fn title(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Builds a component name such as `UpdateAwsRolesRequest`.
///
/// Words of the operation, then the mapped fragment for `(prefix, path)` or
/// else the words of the prefix and of the path without its `{param}`
/// segments, then the suffix; each title-cased and joined.
///
/// # Example
///
/// ```
/// use vaultframe::openapi::{construct_request_identifier, PathMappings};
/// use vaultframe::Operation;
///
/// let id = construct_request_identifier(
///     Operation::Update,
///     "roles/{name}",
///     "aws",
///     "Request",
///     &PathMappings::new(),
/// );
/// assert_eq!(id, "UpdateAwsRolesRequest");
/// ```
pub fn construct_request_identifier(
    operation: Operation,
    path: &str,
    prefix: &str,
    suffix: &str,
    mappings: &PathMappings,
) -> String {
    let mut tokens: Vec<&str> = words(operation.as_str()).collect();

    match mappings.get(&(prefix.to_string(), path.to_string())) {
        Some(fragment) => tokens.extend(words(fragment)),
        None => {
            tokens.extend(words(prefix));
            for segment in path.split('/').filter(|s| !s.contains('{')) {
                tokens.extend(words(segment));
            }
        }
    }
    tokens.extend(words(suffix));

    tokens.into_iter().map(title).collect()
}

fn field_schema(field: &FieldSchema) -> OasSchema {
    let oas = convert_type(field.kind);
    OasSchema {
        kind: oas.base_type.to_string(),
        description: clean_string(&field.description),
        format: oas.format.to_string(),
        pattern: oas.pattern.to_string(),
        items: oas.items.map(|t| Box::new(OasSchema::of(t))),
        enum_values: field.allowed_values.clone(),
        default: field.default.as_ref().map(|_| field.default_or_zero().to_json()),
        deprecated: field.deprecated,
        display_attrs: field.display_attrs.clone(),
        ..OasSchema::default()
    }
}

fn mount_path_parameter(prefix: &str) -> Option<OasParameter> {
    if prefix.is_empty() || prefix == "system" || prefix == "identity" {
        return None;
    }
    let default = if prefix == "kv" { "secret" } else { prefix };
    Some(OasParameter {
        name: format!("{prefix}_mount_path"),
        description: "Path that the backend was mounted at".to_string(),
        location: "path".to_string(),
        schema: Some(OasSchema {
            kind: "string".to_string(),
            default: Some(Value::String(default.to_string())),
            ..OasSchema::default()
        }),
        required: true,
        deprecated: false,
    })
}

fn list_parameter(required: bool) -> OasParameter {
    let (description, enum_values) = if required {
        ("Must be set to `true`", vec![Value::String("true".to_string())])
    } else {
        ("Return a list if `true`", Vec::new())
    };
    OasParameter {
        name: "list".to_string(),
        description: description.to_string(),
        location: "query".to_string(),
        schema: Some(OasSchema {
            kind: "string".to_string(),
            enum_values,
            ..OasSchema::default()
        }),
        required,
        deprecated: false,
    }
}

fn default_response(operation: Operation, doc: &mut OasDocument) -> OasResponse {
    match operation {
        Operation::Delete => OasResponse {
            description: "empty body".to_string(),
            ..OasResponse::default()
        },
        Operation::List => {
            doc.components
                .schemas
                .entry(STANDARD_LIST_RESPONSE.to_string())
                .or_insert_with(standard_list_response);
            OasResponse {
                description: "OK".to_string(),
                content: json_ref_content(STANDARD_LIST_RESPONSE),
            }
        }
        _ => OasResponse {
            description: "OK".to_string(),
            ..OasResponse::default()
        },
    }
}

struct OperationContext<'a> {
    operation: Operation,
    expanded: &'a str,
    options: &'a DocumentOptions,
}

impl OperationContext<'_> {
    fn identifier(&self, suffix: &str) -> String {
        construct_request_identifier(
            self.operation,
            self.expanded,
            &self.options.request_response_prefix,
            suffix,
            &self.options.path_mappings,
        )
    }
}

fn build_operation(
    cx: &OperationContext<'_>,
    path: &Path,
    props: &OperationProperties,
    query_fields: &FieldMap,
    body_fields: &FieldMap,
    read_lists: bool,
    doc: &mut OasDocument,
) -> OasOperation {
    let mut op = OasOperation {
        summary: props.summary.clone(),
        description: props.description.clone(),
        deprecated: props.deprecated || path.deprecated,
        ..OasOperation::default()
    };
    match cx.options.backend_type {
        BackendType::Logical => op.tags.push("secrets".to_string()),
        BackendType::Credential => op.tags.push("auth".to_string()),
        BackendType::Unknown => {}
    }

    let takes_body = matches!(cx.operation, Operation::Create | Operation::Update);
    if takes_body {
        // Query fields are body fields when the method carries a body.
        let mut schema = OasSchema::of("object");
        for (name, field) in body_fields.iter().chain(query_fields) {
            if field.required {
                schema.required.push(name.clone());
            }
            schema.properties.insert(name.clone(), field_schema(field));
        }
        schema.required.sort();
        if let Some(example) = props.examples.first() {
            schema.example = Some(Value::Object(example.data.clone()));
        }
        if path.takes_arbitrary_input {
            schema.additional_properties = true;
        }
        if !schema.properties.is_empty() {
            let name = cx.identifier("Request");
            doc.components.schemas.insert(name.clone(), schema);
            op.request_body = Some(OasRequestBody {
                required: true,
                content: json_ref_content(&name),
                ..OasRequestBody::default()
            });
        } else if path.takes_arbitrary_input {
            // A bare object schema is written inline.
            op.request_body = Some(OasRequestBody {
                required: true,
                content: BTreeMap::from([(
                    "application/json".to_string(),
                    OasMediaType {
                        schema: Some(schema),
                    },
                )]),
                ..OasRequestBody::default()
            });
        }
    }

    match cx.operation {
        Operation::List => op.parameters.push(list_parameter(true)),
        Operation::Read if read_lists => op.parameters.push(list_parameter(false)),
        _ => {}
    }
    if !takes_body {
        for (name, field) in query_fields {
            op.parameters.push(OasParameter {
                name: name.clone(),
                description: clean_string(&field.description),
                location: "query".to_string(),
                schema: Some(field_schema(field)),
                required: false,
                deprecated: field.deprecated,
            });
        }
    }

    if props.responses.is_empty() {
        let code = if cx.operation == Operation::Delete { 204 } else { 200 };
        op.responses.insert(code, default_response(cx.operation, doc));
    }
    for (code, docs) in &props.responses {
        let mut description = String::new();
        let mut content = BTreeMap::new();
        for (i, resp) in docs.iter().enumerate() {
            if i == 0 {
                description = resp.description.clone();
            }
            if let Some(example) = &resp.example {
                let media_type = if resp.media_type.is_empty() {
                    "application/json"
                } else {
                    resp.media_type.as_str()
                };
                // One example per media type; the first wins.
                content
                    .entry(media_type.to_string())
                    .or_insert_with(|| OasMediaType {
                        schema: Some(OasSchema {
                            example: Some(clean_response(example)),
                            ..OasSchema::default()
                        }),
                    });
            }
            if !resp.fields.is_empty() {
                let mut schema = OasSchema::of("object");
                for (name, field) in &resp.fields {
                    schema.properties.insert(name.clone(), field_schema(field));
                }
                let name = cx.identifier("Response");
                doc.components.schemas.insert(name.clone(), schema);
                content = json_ref_content(&name);
            }
        }
        op.responses.insert(*code, OasResponse { description, content });
    }

    op
}

/// Adds the OpenAPI paths and components of one [`Path`] to `doc`.
///
/// A pattern that cannot be expressed as OpenAPI paths is still listed under
/// its raw pattern, with no operations.
///
/// # Errors
///
/// Fails if the pattern does not parse.
pub fn document_path(
    path: &Path,
    options: &DocumentOptions,
    doc: &mut OasDocument,
) -> Result<(), OpenApiError> {
    let (expansions, captures, force_unpublished) = match expand_pattern(&path.pattern) {
        Ok((paths, captures)) => (paths, captures, false),
        Err(OpenApiError::UnsupportedRegex { .. }) => {
            tracing::debug!(
                pattern = %path.pattern,
                "pattern has no OpenAPI path equivalent; documenting it without operations"
            );
            (vec![path.pattern.clone()], BTreeSet::new(), true)
        }
        Err(e) => return Err(e),
    };

    let handlers = path.handlers();
    let mount_parameter = mount_path_parameter(&options.request_response_prefix);

    for expanded in &expansions {
        let mut item = OasPathItem {
            description: clean_string(&path.help_synopsis),
            sudo: special_path_match(expanded, &options.special_paths.root),
            unauthenticated: special_path_match(expanded, &options.special_paths.unauthenticated),
            display_attrs: path.display_attrs.clone(),
            ..OasPathItem::default()
        };

        let (path_fields, query_fields, body_fields) =
            split_fields(&path.fields, expanded, &captures);
        for (name, field) in &path_fields {
            item.parameters.push(OasParameter {
                name: name.clone(),
                description: clean_string(&field.description),
                location: "path".to_string(),
                schema: Some(OasSchema {
                    description: String::new(),
                    ..field_schema(field)
                }),
                required: true,
                deprecated: field.deprecated,
            });
        }
        item.parameters.extend(mount_parameter.clone());
        item.parameters.sort_by_key(|p| p.name.to_lowercase());

        for (operation, props) in &handlers {
            if props.unpublished || force_unpublished {
                continue;
            }
            let operation = *operation;
            if operation == Operation::Create {
                item.create_supported = true;
                if handlers.contains_key(&Operation::Update) {
                    continue;
                }
            }
            if operation == Operation::List && handlers.contains_key(&Operation::Read) {
                continue;
            }
            if !matches!(
                operation,
                Operation::Create
                    | Operation::Update
                    | Operation::Read
                    | Operation::List
                    | Operation::Delete
            ) {
                continue;
            }

            let cx = OperationContext {
                operation,
                expanded,
                options,
            };
            let read_lists = handlers.contains_key(&Operation::List);
            let op = build_operation(
                &cx,
                path,
                props,
                &query_fields,
                &body_fields,
                read_lists,
                doc,
            );
            match operation {
                Operation::Create | Operation::Update => item.post = Some(op),
                Operation::Read | Operation::List => item.get = Some(op),
                _ => item.delete = Some(op),
            }
        }

        let key = format!("/{expanded}");
        if doc.paths.contains_key(&key) {
            tracing::warn!(path = %key, "several paths generate the same OpenAPI path; last one wins");
        }
        doc.paths.insert(key, item);
    }

    Ok(())
}

/// Documents every path in order.
///
/// # Errors
///
/// Stops at the first path whose pattern does not parse.
pub fn document_paths(
    paths: &[Path],
    options: &DocumentOptions,
    doc: &mut OasDocument,
) -> Result<(), OpenApiError> {
    for path in paths {
        document_path(path, options, doc)?;
    }
    Ok(())
}
