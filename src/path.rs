//! Path definitions: a routing pattern, its field schema and its handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::Result;
use crate::field::{DisplayAttributes, FieldData, FieldMap, FieldSchema};
use crate::request::{Operation, Request};
use crate::response::Response;
use crate::system_view::Feature;

/// Handler invoked for one operation on a path.
pub type OperationFunc = Arc<
    dyn Fn(Context, Request, FieldData) -> BoxFuture<'static, Result<Option<Response>>>
        + Send
        + Sync,
>;

/// Decides whether the resource addressed by a request already exists.
pub type ExistenceFunc =
    Arc<dyn Fn(Context, Request, FieldData) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Wraps an async function or closure as an [`OperationFunc`].
///
/// # Example
///
/// ```
/// use vaultframe::path::operation_fn;
/// use vaultframe::{Context, FieldData, Request, Response, Result};
///
/// async fn read_config(_ctx: Context, _req: Request, _data: FieldData) -> Result<Option<Response>> {
///     Ok(Some(Response::default()))
/// }
///
/// let handler = operation_fn(read_config);
/// ```
pub fn operation_fn<F, Fut>(f: F) -> OperationFunc
where
    F: Fn(Context, Request, FieldData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Response>>> + Send + 'static,
{
    Arc::new(move |ctx, req, data| f(ctx, req, data).boxed())
}

/// Wraps an async function or closure as an [`ExistenceFunc`].
pub fn existence_fn<F, Fut>(f: F) -> ExistenceFunc
where
    F: Fn(Context, Request, FieldData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(move |ctx, req, data| f(ctx, req, data).boxed())
}

/// `(?P<name>...)` matching a name-string segment.
pub fn generic_name_regex(name: &str) -> String {
    format!(r"(?P<{name}>\w(([\w\-.]+)?\w)?)")
}

/// Like [`generic_name_regex`] but also allowing `@`.
pub fn generic_name_with_at_regex(name: &str) -> String {
    format!(r"(?P<{name}>\w(([\w\-@.]+)?\w)?)")
}

/// An optional trailing `/<name>` segment.
pub fn optional_param_regex(name: &str) -> String {
    format!("(/(?P<{name}>.+))?")
}

/// Captures everything, including slashes.
pub fn match_all_regex(name: &str) -> String {
    format!("(?P<{name}>.*)")
}

/// A request example used in generated documentation.
#[derive(Debug, Clone, Default)]
pub struct RequestExample {
    pub description: String,
    pub data: Map<String, Value>,
    pub response: Option<ResponseDoc>,
}

/// A documented response for one status code.
#[derive(Debug, Clone, Default)]
pub struct ResponseDoc {
    pub description: String,
    /// Defaults to `application/json` when empty.
    pub media_type: String,
    pub example: Option<Response>,
    pub fields: FieldMap,
}

impl ResponseDoc {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    pub fn with_example(mut self, example: Response) -> Self {
        self.example = Some(example);
        self
    }
}

/// Documentation and replication hints for one operation.
#[derive(Debug, Clone, Default)]
pub struct OperationProperties {
    pub summary: String,
    pub description: String,
    pub examples: Vec<RequestExample>,
    /// Documented responses keyed by status code.
    pub responses: BTreeMap<u16, Vec<ResponseDoc>>,
    /// Hidden from generated documentation.
    pub unpublished: bool,
    pub deprecated: bool,
    /// Must run on the active node; standbys answer with the forwarding signal.
    pub forward_performance_standby: bool,
    /// Must run on the primary cluster unless the mount is local.
    pub forward_performance_secondary: bool,
    pub display_attrs: Option<DisplayAttributes>,
}

/// A handler and its properties.
#[derive(Clone)]
pub struct OperationHandler {
    pub callback: OperationFunc,
    pub properties: OperationProperties,
}

impl OperationHandler {
    pub fn new(callback: OperationFunc) -> Self {
        Self {
            callback,
            properties: OperationProperties::default(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.properties.summary = summary.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.properties.description = description.into();
        self
    }

    pub fn with_example(mut self, example: RequestExample) -> Self {
        self.properties.examples.push(example);
        self
    }

    pub fn with_response(mut self, code: u16, doc: ResponseDoc) -> Self {
        self.properties.responses.entry(code).or_default().push(doc);
        self
    }

    pub fn with_display_attrs(mut self, attrs: DisplayAttributes) -> Self {
        self.properties.display_attrs = Some(attrs);
        self
    }

    pub fn forward_performance_standby(mut self) -> Self {
        self.properties.forward_performance_standby = true;
        self
    }

    pub fn forward_performance_secondary(mut self) -> Self {
        self.properties.forward_performance_secondary = true;
        self
    }

    pub fn unpublished(mut self) -> Self {
        self.properties.unpublished = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.properties.deprecated = true;
        self
    }
}

impl fmt::Debug for OperationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandler")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// A routing pattern with its fields and handlers.
///
/// Paths are immutable once handed to a [`crate::Backend`].
///
/// # Example
///
/// ```
/// use vaultframe::field::{FieldKind, FieldSchema};
/// use vaultframe::path::{generic_name_regex, operation_fn, OperationHandler, Path};
/// use vaultframe::{Operation, Response};
///
/// let path = Path::new(format!("roles/{}", generic_name_regex("name")))
///     .with_field("name", FieldSchema::new(FieldKind::String).with_description("Role name"))
///     .with_operation(
///         Operation::Read,
///         OperationHandler::new(operation_fn(|_ctx, _req, data| async move {
///             let mut resp = Response::default();
///             resp.data.insert("name".into(), data.get("name").to_json());
///             Ok(Some(resp))
///         }))
///         .with_summary("Read a role"),
///     )
///     .with_help("Manage roles", "Roles describe issued credentials.");
///
/// assert!(path.operations.contains_key(&Operation::Read));
/// ```
#[derive(Clone, Default)]
pub struct Path {
    /// Regular expression matched against the mount-relative request path.
    pub pattern: String,
    pub fields: Arc<FieldMap>,
    pub operations: BTreeMap<Operation, OperationHandler>,
    /// Older handler table; consulted only when `operations` has no entry.
    pub callbacks: BTreeMap<Operation, OperationFunc>,
    /// Required on paths that support `Create`.
    pub existence_check: Option<ExistenceFunc>,
    pub feature_required: Feature,
    pub deprecated: bool,
    pub help_synopsis: String,
    pub help_description: String,
    pub display_attrs: Option<DisplayAttributes>,
    /// Skip the unrecognized-parameter warning.
    pub takes_arbitrary_input: bool,
}

impl Path {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        Arc::make_mut(&mut self.fields).insert(name.into(), schema);
        self
    }

    pub fn with_operation(mut self, operation: Operation, handler: OperationHandler) -> Self {
        self.operations.insert(operation, handler);
        self
    }

    pub fn with_callback(mut self, operation: Operation, callback: OperationFunc) -> Self {
        self.callbacks.insert(operation, callback);
        self
    }

    pub fn with_existence_check(mut self, check: ExistenceFunc) -> Self {
        self.existence_check = Some(check);
        self
    }

    pub fn with_feature_required(mut self, feature: Feature) -> Self {
        self.feature_required = feature;
        self
    }

    pub fn with_help(
        mut self,
        synopsis: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.help_synopsis = synopsis.into();
        self.help_description = description.into();
        self
    }

    pub fn with_display_attrs(mut self, attrs: DisplayAttributes) -> Self {
        self.display_attrs = Some(attrs);
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn takes_arbitrary_input(mut self) -> Self {
        self.takes_arbitrary_input = true;
        self
    }

    /// True if `operation` has a handler in either table.
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains_key(&operation) || self.callbacks.contains_key(&operation)
    }

    /// True if the path documents itself.
    pub fn has_help(&self) -> bool {
        !self.help_synopsis.trim().is_empty() || !self.help_description.trim().is_empty()
    }

    /// Operations with handlers, with their properties where declared.
    pub(crate) fn handlers(&self) -> BTreeMap<Operation, OperationProperties> {
        let mut out: BTreeMap<Operation, OperationProperties> = self
            .callbacks
            .keys()
            .map(|op| (*op, OperationProperties::default()))
            .collect();
        for (op, handler) in &self.operations {
            out.insert(*op, handler.properties.clone());
        }
        out
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("pattern", &self.pattern)
            .field("fields", &self.fields)
            .field("operations", &self.operations)
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .field("existence_check", &self.existence_check.is_some())
            .field("feature_required", &self.feature_required)
            .finish_non_exhaustive()
    }
}
