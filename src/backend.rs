//! Backend trait and the framework backend that implements it.
//!
//! [`LogicalBackend`] is the surface a host drives: setup, request dispatch,
//! existence checks and lifecycle hooks. [`Backend`] implements it on top of
//! declared [`Path`]s and [`Secret`]s, handling routing, field validation,
//! lease renew/revoke routing, WAL rollback and help generation.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::config::BackendConfig;
use crate::context::Context;
use crate::error::{FrameworkError, MultiError, Result};
use crate::field::FieldData;
use crate::help;
use crate::openapi::{self, DocumentOptions, OasDocument, PathMappings};
use crate::path::{OperationFunc, Path};
use crate::request::{Operation, Request};
use crate::response::Response;
use crate::secret::{Secret, SECRET_TYPE_KEY};
use crate::storage::Storage;
use crate::system_view::{EntropySource, ReplicationState, SystemView};
use crate::validation::{anchor_pattern, compile_pattern};
use crate::wal;

/// Rollback age used when none is configured.
pub const DEFAULT_WAL_ROLLBACK_MIN_AGE: Duration = Duration::from_secs(10 * 60);

/// Request-data key that makes every WAL entry eligible for rollback.
pub const ROLLBACK_IMMEDIATE_KEY: &str = "immediate";

/// Whether a backend issues secrets or authenticates clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Unknown,
    /// Secrets engine
    Logical,
    /// Auth method
    Credential,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Logical => write!(f, "secret"),
            Self::Credential => write!(f, "auth"),
        }
    }
}

/// Paths the host treats specially. Entries may end in `*` for a prefix
/// match and may use `+` for a single segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialPaths {
    /// Require root (sudo) privileges.
    #[serde(default)]
    pub root: Vec<String>,
    /// Reachable without a token.
    #[serde(default)]
    pub unauthenticated: Vec<String>,
    /// Stored locally, never replicated.
    #[serde(default)]
    pub local_storage: Vec<String>,
    /// Seal-wrapped when stored.
    #[serde(default)]
    pub seal_wrap_storage: Vec<String>,
}

/// Arguments to [`LogicalBackend::initialize`].
#[derive(Clone, Default)]
pub struct InitializationRequest {
    pub storage: Option<Arc<dyn Storage>>,
}

impl fmt::Debug for InitializationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializationRequest")
            .field("storage", &self.storage.is_some())
            .finish()
    }
}

/// The protocol surface a host drives.
///
/// All implementations must be `Send + Sync`; hosts call
/// [`handle_request`](LogicalBackend::handle_request) from many tasks at once.
#[async_trait]
pub trait LogicalBackend: Send + Sync {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stores the host-supplied configuration. Called once before the first
    /// request.
    fn setup(&self, ctx: &Context, config: BackendConfig) -> Result<()>;

    /// One-time initialization after setup, e.g. upgrading stored data.
    async fn initialize(&self, ctx: &Context, req: InitializationRequest) -> Result<()>;

    /// Called before the backend is unloaded.
    async fn cleanup(&self, ctx: &Context);

    /// Called when `key` was changed in storage by another node; backends
    /// drop any cached copy.
    async fn invalidate_key(&self, ctx: &Context, key: &str);

    // ========================================================================
    // Requests
    // ========================================================================

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// - [`FrameworkError::UnsupportedPath`]: no path matched
    /// - [`FrameworkError::UnsupportedOperation`]: the path has no handler
    /// - [`FrameworkError::ReadOnly`]: read-only node, or the operation must
    ///   be forwarded to the active node
    ///
    /// Field validation failures are returned as an error [`Response`], not
    /// as an `Err`.
    async fn handle_request(&self, ctx: &Context, req: Request) -> Result<Option<Response>>;

    /// Decides create versus update for a write.
    ///
    /// Returns `(check_found, exists)`.
    async fn handle_existence_check(&self, ctx: &Context, req: Request) -> Result<(bool, bool)>;

    // ========================================================================
    // Metadata
    // ========================================================================

    fn special_paths(&self) -> SpecialPaths;

    /// The system view from setup, if set up.
    fn system(&self) -> Option<Arc<dyn SystemView>>;

    /// The span from setup.
    fn logger(&self) -> tracing::Span;

    fn backend_type(&self) -> BackendType;

    /// Version reported to the host; empty if unversioned.
    fn plugin_version(&self) -> String;
}

/// One-time initialization callback.
pub type InitializeFunc =
    Arc<dyn Fn(Context, InitializationRequest) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Periodic work, run on each rollback tick.
pub type PeriodicFunc = Arc<dyn Fn(Context, Request) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Undoes the work recorded by one WAL entry, given its kind and data.
pub type WalRollbackFunc =
    Arc<dyn Fn(Context, Request, String, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub type CleanupFunc = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;

pub type InvalidateFunc = Arc<dyn Fn(Context, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Compiled routing patterns, parallel to the backend's paths.
struct Router {
    patterns: Vec<Regex>,
}

impl Router {
    fn compile(paths: &[Path], secrets: &[Secret]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(paths.len());
        for path in paths {
            patterns.push(compile_pattern(&path.pattern)?);

            if path.supports(Operation::Create) && path.existence_check.is_none() {
                return Err(FrameworkError::InvalidBackend(format!(
                    "path {:?} supports create but has no existence check",
                    path.pattern
                )));
            }
            for (name, schema) in path.fields.iter() {
                schema.check_default().map_err(|e| {
                    FrameworkError::InvalidBackend(format!(
                        "field {name:?} of path {:?}: {e}",
                        path.pattern
                    ))
                })?;
            }
        }

        for (i, secret) in secrets.iter().enumerate() {
            if secrets[..i].iter().any(|s| s.secret_type == secret.secret_type) {
                return Err(FrameworkError::InvalidBackend(format!(
                    "duplicate secret type {:?}",
                    secret.secret_type
                )));
            }
        }

        Ok(Self { patterns })
    }

    /// Index of the first matching path and its named captures.
    fn resolve(&self, path: &str) -> Option<(usize, Map<String, Value>)> {
        self.patterns.iter().enumerate().find_map(|(index, re)| {
            let caps = re.captures(path)?;
            let captures = re
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), Value::String(m.as_str().to_string())))
                })
                .collect();
            Some((index, captures))
        })
    }
}

#[derive(Default)]
struct SetupState {
    system: Option<Arc<dyn SystemView>>,
    storage: Option<Arc<dyn Storage>>,
    logger: Option<tracing::Span>,
    backend_uuid: String,
}

/// Request data merged with path captures. Captures win.
struct MergedData {
    raw: Map<String, Value>,
    /// Keys the schema does not declare.
    ignored: Vec<String>,
    /// Keys whose request value was replaced by a capture.
    replaced: Vec<String>,
}

fn merge_captures(path: &Path, data: &Map<String, Value>, captures: Map<String, Value>) -> MergedData {
    let mut raw = data.clone();
    let mut ignored: Vec<String> = if path.takes_arbitrary_input {
        Vec::new()
    } else {
        data.keys()
            .filter(|k| !path.fields.contains_key(*k))
            .cloned()
            .collect()
    };
    let mut replaced = Vec::new();
    for (key, value) in captures {
        if raw.get(&key).is_some_and(|v| !v.is_null()) {
            replaced.push(key.clone());
        }
        raw.insert(key, value);
    }
    ignored.sort();
    replaced.sort();
    MergedData {
        raw,
        ignored,
        replaced,
    }
}

enum Handler {
    Callback(OperationFunc),
    Help,
}

/// A secrets backend assembled from paths and secrets.
///
/// Build it once, hand it to the host, and treat it as immutable afterwards.
/// Routing patterns are compiled on first use; mistakes in the definition
/// (a bad pattern, a `Create` handler without an existence check, a default
/// that does not fit its field) are reported as
/// [`FrameworkError::InvalidBackend`] on every request.
///
/// # Example
///
/// ```
/// use vaultframe::field::{FieldKind, FieldSchema};
/// use vaultframe::path::{generic_name_regex, operation_fn, OperationHandler, Path};
/// use vaultframe::{Backend, BackendConfig, BackendType, Context, LogicalBackend, Operation, Request, Response};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> vaultframe::Result<()> {
/// let backend = Backend::new(BackendType::Logical)
///     .with_help("Greets people.")
///     .with_path(
///         Path::new(format!("hello/{}", generic_name_regex("name")))
///             .with_field("name", FieldSchema::new(FieldKind::String))
///             .with_operation(
///                 Operation::Read,
///                 OperationHandler::new(operation_fn(|_ctx, _req, data| async move {
///                     let mut resp = Response::default();
///                     resp.data.insert("greeting".into(), format!("hello {}", data.get_string("name")).into());
///                     Ok(Some(resp))
///                 })),
///             ),
///     );
///
/// let ctx = Context::background();
/// backend.setup(&ctx, BackendConfig::new())?;
///
/// let resp = backend
///     .handle_request(&ctx, Request::new(Operation::Read, "hello/world"))
///     .await?
///     .unwrap();
/// assert_eq!(resp.data["greeting"], "hello world");
/// # Ok(())
/// # }
/// ```
pub struct Backend {
    help: String,
    paths: Vec<Path>,
    special_paths: SpecialPaths,
    secrets: Vec<Secret>,
    backend_type: BackendType,
    running_version: String,
    wal_rollback_min_age: Duration,
    path_mappings: PathMappings,

    initialize: Option<InitializeFunc>,
    periodic: Option<PeriodicFunc>,
    wal_rollback: Option<WalRollbackFunc>,
    clean: Option<CleanupFunc>,
    invalidate: Option<InvalidateFunc>,
    auth_renew: Option<OperationFunc>,

    router: OnceLock<std::result::Result<Router, String>>,
    state: RwLock<SetupState>,
}

impl Backend {
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            help: String::new(),
            paths: Vec::new(),
            special_paths: SpecialPaths::default(),
            secrets: Vec::new(),
            backend_type,
            running_version: String::new(),
            wal_rollback_min_age: Duration::ZERO,
            path_mappings: PathMappings::new(),
            initialize: None,
            periodic: None,
            wal_rollback: None,
            clean: None,
            invalidate: None,
            auth_renew: None,
            router: OnceLock::new(),
            state: RwLock::new(SetupState::default()),
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    /// Sets the root help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Appends a path. Earlier paths win when several match.
    pub fn with_path(mut self, path: Path) -> Self {
        self.paths.push(path);
        self
    }

    pub fn with_paths(mut self, paths: impl IntoIterator<Item = Path>) -> Self {
        self.paths.extend(paths);
        self
    }

    pub fn with_special_paths(mut self, special_paths: SpecialPaths) -> Self {
        self.special_paths = special_paths;
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secrets.push(secret);
        self
    }

    pub fn with_running_version(mut self, version: impl Into<String>) -> Self {
        self.running_version = version.into();
        self
    }

    /// Minimum age of a WAL entry before rollback; zero means
    /// [`DEFAULT_WAL_ROLLBACK_MIN_AGE`].
    pub fn with_wal_rollback_min_age(mut self, age: Duration) -> Self {
        self.wal_rollback_min_age = age;
        self
    }

    /// Operation-id fragments used in generated OpenAPI documents.
    pub fn with_path_mappings(mut self, mappings: PathMappings) -> Self {
        self.path_mappings = mappings;
        self
    }

    pub fn with_initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context, InitializationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.initialize = Some(Arc::new(move |ctx, req| f(ctx, req).boxed()));
        self
    }

    /// Work to run on every rollback tick.
    pub fn with_periodic<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.periodic = Some(Arc::new(move |ctx, req| f(ctx, req).boxed()));
        self
    }

    /// Callback that undoes the work of a WAL entry. It must be idempotent.
    pub fn with_wal_rollback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context, Request, String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.wal_rollback = Some(Arc::new(move |ctx, req, kind, data| {
            f(ctx, req, kind, data).boxed()
        }));
        self
    }

    pub fn with_cleanup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.clean = Some(Arc::new(move |ctx| f(ctx).boxed()));
        self
    }

    pub fn with_invalidate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.invalidate = Some(Arc::new(move |ctx, key| f(ctx, key).boxed()));
        self
    }

    /// Renew handler for credentials issued by an auth backend.
    pub fn with_auth_renew(mut self, renew: OperationFunc) -> Self {
        self.auth_renew = Some(renew);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// The registered secret of the given type.
    pub fn secret(&self, secret_type: &str) -> Option<&Secret> {
        self.secrets.iter().find(|s| s.secret_type == secret_type)
    }

    /// The first path whose pattern matches `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::InvalidBackend`] if the definition is invalid.
    pub fn route(&self, path: &str) -> Result<Option<&Path>> {
        Ok(self
            .router()?
            .resolve(path)
            .map(|(index, _)| &self.paths[index]))
    }

    /// The storage view from setup.
    pub fn storage(&self) -> Option<Arc<dyn Storage>> {
        self.read_state().storage.clone()
    }

    pub fn backend_uuid(&self) -> String {
        self.read_state().backend_uuid.clone()
    }

    /// Whether writes may happen on this node.
    ///
    /// False on performance standbys, DR secondaries, and performance
    /// secondaries for replicated mounts.
    ///
    /// # Errors
    ///
    /// Fails if the backend has not been set up.
    pub fn write_safe_replication_state(&self) -> Result<bool> {
        let system = self.system().ok_or_else(not_set_up)?;
        let state = system.replication_state();
        let unsafe_here = (!system.local_mount()
            && state.has_state(ReplicationState::PERFORMANCE_SECONDARY))
            || state.has_state(ReplicationState::DR_SECONDARY)
            || state.has_state(ReplicationState::PERFORMANCE_STANDBY);
        Ok(!unsafe_here)
    }

    /// A random source for key material.
    ///
    /// Uses the host's entropy source when it offers one, otherwise the
    /// operating system RNG.
    pub fn get_random_reader(&self) -> Box<dyn RngCore + Send> {
        match self.system().and_then(|s| s.entropy_source()) {
            Some(source) => Box::new(EntropyReader { source }),
            None => Box::new(OsRng),
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SetupState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn router(&self) -> Result<&Router> {
        self.router
            .get_or_init(|| {
                Router::compile(&self.paths, &self.secrets).map_err(|e| match e {
                    FrameworkError::InvalidBackend(msg) => msg,
                    other => other.to_string(),
                })
            })
            .as_ref()
            .map_err(|msg| FrameworkError::InvalidBackend(msg.clone()))
    }

    fn host_version(&self) -> String {
        self.system()
            .map(|s| s.host_version())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn document_options(&self, req: &Request) -> DocumentOptions {
        // The mount type is only known to the host, which passes it along.
        let prefix = req
            .data
            .get("requestResponsePrefix")
            .and_then(Value::as_str)
            .unwrap_or_default();
        DocumentOptions {
            special_paths: self.special_paths.clone(),
            request_response_prefix: prefix.to_string(),
            backend_type: self.backend_type,
            path_mappings: self.path_mappings.clone(),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    async fn dispatch(&self, ctx: &Context, mut req: Request) -> Result<Option<Response>> {
        let router = self.router()?;
        if req.storage.is_none() {
            req.storage = self.storage();
        }

        match req.operation {
            Operation::Renew | Operation::Revoke => return self.handle_revoke_renew(ctx, req).await,
            Operation::Rollback => return self.handle_rollback(ctx, req).await,
            Operation::Help if req.path.is_empty() => return Ok(Some(self.root_help(&req))),
            _ => {}
        }

        let (index, captures) = router.resolve(&req.path).ok_or(FrameworkError::UnsupportedPath)?;
        let path = &self.paths[index];
        tracing::debug!(operation = %req.operation, path = %req.path, pattern = %path.pattern, "routing request");

        if !path.feature_required.is_none() {
            let enabled = self
                .system()
                .is_some_and(|s| s.has_feature(path.feature_required));
            if !enabled {
                return Err(FrameworkError::coded(401, "Feature Not Enabled"));
            }
        }

        let merged = merge_captures(path, &req.data, captures);

        let handler = if let Some(op) = path.operations.get(&req.operation) {
            self.check_forwarding(op.properties.forward_performance_standby, op.properties.forward_performance_secondary)?;
            Handler::Callback(op.callback.clone())
        } else if let Some(callback) = path.callbacks.get(&req.operation) {
            Handler::Callback(callback.clone())
        } else if req.operation == Operation::Help && path.has_help() {
            Handler::Help
        } else {
            return Err(FrameworkError::UnsupportedOperation);
        };

        let data = FieldData::new(merged.raw, path.fields.clone());
        let resp = match handler {
            Handler::Help => Some(self.path_help(&req, path)),
            Handler::Callback(callback) => {
                if req.operation != Operation::Help {
                    if let Err(e) = data.validate() {
                        return Ok(Some(Response::error(format!("Field validation failed: {e}"))));
                    }
                }
                ctx.check()?;
                callback(ctx.clone(), req, data).await?
            }
        };

        Ok(resp.map(|mut resp| {
            if !merged.ignored.is_empty() {
                resp.add_warning(format!(
                    "Endpoint ignored these unrecognized parameters: [{}]",
                    merged.ignored.join(" ")
                ));
            }
            if !merged.replaced.is_empty() {
                resp.add_warning(format!(
                    "Endpoint replaced the value of these parameters with the values captured from the endpoint's path: [{}]",
                    merged.replaced.join(" ")
                ));
            }
            resp
        }))
    }

    /// Returns [`FrameworkError::ReadOnly`] when the operation must run on
    /// another node.
    fn check_forwarding(&self, standby: bool, secondary: bool) -> Result<()> {
        let Some(system) = self.system() else {
            return Ok(());
        };
        let state = system.replication_state();
        if standby && state.has_state(ReplicationState::PERFORMANCE_STANDBY) {
            tracing::debug!("forwarding request from performance standby");
            return Err(FrameworkError::ReadOnly);
        }
        if secondary
            && !system.local_mount()
            && state.has_state(ReplicationState::PERFORMANCE_SECONDARY)
        {
            tracing::debug!("forwarding request from performance secondary");
            return Err(FrameworkError::ReadOnly);
        }
        Ok(())
    }

    async fn handle_existence(&self, ctx: &Context, mut req: Request) -> Result<(bool, bool)> {
        if !matches!(req.operation, Operation::Create | Operation::Update) {
            return Err(FrameworkError::InvalidRequest(format!(
                "incorrect operation type {} for an existence check",
                req.operation
            )));
        }
        let router = self.router()?;
        let (index, captures) = router.resolve(&req.path).ok_or(FrameworkError::UnsupportedPath)?;
        let path = &self.paths[index];
        let Some(check) = &path.existence_check else {
            return Ok((false, false));
        };
        if req.storage.is_none() {
            req.storage = self.storage();
        }

        let merged = merge_captures(path, &req.data, captures);
        let data = FieldData::new(merged.raw, path.fields.clone());
        data.validate()
            .map_err(|e| FrameworkError::User(e.to_string()))?;

        let exists = check(ctx.clone(), req, data).await?;
        Ok((true, exists))
    }

    async fn handle_revoke_renew(&self, ctx: &Context, req: Request) -> Result<Option<Response>> {
        if req.operation == Operation::Renew && req.auth.is_some() {
            return match &self.auth_renew {
                Some(renew) => renew(ctx.clone(), req, FieldData::default()).await,
                None => Ok(Some(Response::error("this auth type doesn't support renew"))),
            };
        }

        let secret_instance = req
            .secret
            .as_ref()
            .ok_or_else(|| FrameworkError::InvalidRequest("request has no secret".to_string()))?;
        let secret_type = secret_instance
            .internal_data
            .get(SECRET_TYPE_KEY)
            .and_then(Value::as_str)
            .ok_or(FrameworkError::UnsupportedSecret)?;
        let secret = self.secret(secret_type).ok_or(FrameworkError::UnsupportedSecret)?;
        tracing::debug!(operation = %req.operation, secret_type, "dispatching lease operation");

        match req.operation {
            Operation::Renew => secret.handle_renew(ctx, req).await,
            _ => secret.handle_revoke(ctx, req).await,
        }
    }

    async fn handle_rollback(&self, ctx: &Context, req: Request) -> Result<Option<Response>> {
        let mut errors = MultiError::new();

        if let Some(periodic) = &self.periodic {
            ctx.check()?;
            if let Err(e) = periodic(ctx.clone(), req.clone()).await {
                tracing::warn!(error = %e, "periodic function failed");
                errors.push(e);
            }
        }

        if let Some(rollback) = &self.wal_rollback {
            match self.wal_sweep(ctx, &req, rollback, &mut errors).await {
                Ok(()) => {}
                Err(FrameworkError::Cancelled) => return Err(FrameworkError::Cancelled),
                Err(e) => errors.push(e),
            }
        }

        errors.into_result()?;
        Ok(None)
    }

    /// Rolls back every WAL entry older than the minimum age.
    ///
    /// Per-entry failures are collected into `errors`; the returned error is
    /// for failures that stop the sweep.
    async fn wal_sweep(
        &self,
        ctx: &Context,
        req: &Request,
        rollback: &WalRollbackFunc,
        errors: &mut MultiError,
    ) -> Result<()> {
        let storage = req
            .storage
            .clone()
            .ok_or_else(|| FrameworkError::InvalidRequest("no storage for WAL rollback".to_string()))?;

        let ids = wal::list(ctx, storage.as_ref()).await?;
        if ids.is_empty() {
            return Ok(());
        }

        let age = if self.wal_rollback_min_age.is_zero() {
            DEFAULT_WAL_ROLLBACK_MIN_AGE
        } else {
            self.wal_rollback_min_age
        };
        let age = i64::try_from(age.as_secs()).unwrap_or(i64::MAX);
        let mut min_age = Utc::now().timestamp().saturating_sub(age);
        if req.data.contains_key(ROLLBACK_IMMEDIATE_KEY) {
            min_age = min_age.saturating_add(1000 * 3600);
        }

        for id in ids {
            ctx.check()?;
            let entry = match wal::get(ctx, storage.as_ref(), &id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if entry.created_at >= min_age {
                tracing::debug!(wal_id = %id, kind = %entry.kind, "WAL entry too recent to roll back");
                continue;
            }

            let kind = entry.kind.clone();
            let result = match rollback(ctx.clone(), req.clone(), entry.kind, entry.data).await {
                Ok(()) => wal::delete(ctx, storage.as_ref(), &id).await,
                Err(e) => Err(FrameworkError::rollback(kind.clone(), e)),
            };
            match result {
                Ok(()) => tracing::debug!(wal_id = %id, kind = %kind, "rolled back WAL entry"),
                Err(e) => {
                    tracing::warn!(wal_id = %id, error = %e, "WAL rollback failed");
                    errors.push(e);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Help
    // ========================================================================

    fn root_help(&self, req: &Request) -> Response {
        let routes: Vec<(String, String)> = self
            .paths
            .iter()
            .map(|path| (anchor_pattern(&path.pattern), path.help_synopsis.trim().to_string()))
            .collect();
        let text = help::root_help_text(&self.help, &routes);

        let mut doc = OasDocument::new(self.host_version());
        if let Err(e) = openapi::document_paths(&self.paths, &self.document_options(req), &mut doc) {
            tracing::warn!(error = %e, "error generating OpenAPI");
        }
        doc.create_operation_ids("");
        Response::help(text, Vec::new(), Some(doc.to_value()))
    }

    fn path_help(&self, req: &Request, path: &Path) -> Response {
        let text = help::path_help_text(&req.path, path);

        let mut doc = OasDocument::new(self.host_version());
        if let Err(e) = openapi::document_path(path, &self.document_options(req), &mut doc) {
            tracing::warn!(error = %e, pattern = %path.pattern, "error generating OpenAPI");
        }
        Response::help(text, Vec::new(), Some(doc.to_value()))
    }
}

fn not_set_up() -> FrameworkError {
    FrameworkError::InvalidRequest("backend has not been set up".to_string())
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("backend_type", &self.backend_type)
            .field("paths", &self.paths.len())
            .field(
                "secrets",
                &self.secrets.iter().map(|s| s.secret_type.as_str()).collect::<Vec<_>>(),
            )
            .field("special_paths", &self.special_paths)
            .field("running_version", &self.running_version)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogicalBackend for Backend {
    fn setup(&self, _ctx: &Context, config: BackendConfig) -> Result<()> {
        let BackendConfig {
            storage_view,
            logger,
            system,
            backend_uuid,
            ..
        } = config;
        tracing::info!(parent: &logger, backend_type = %self.backend_type, "backend set up");

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.system = Some(system);
        state.storage = storage_view;
        state.backend_uuid = backend_uuid;
        state.logger = Some(logger);
        Ok(())
    }

    async fn initialize(&self, ctx: &Context, req: InitializationRequest) -> Result<()> {
        match &self.initialize {
            Some(init) => init(ctx.clone(), req).await,
            None => Ok(()),
        }
    }

    async fn cleanup(&self, ctx: &Context) {
        if let Some(clean) = &self.clean {
            clean(ctx.clone()).await;
        }
    }

    async fn invalidate_key(&self, ctx: &Context, key: &str) {
        if let Some(invalidate) = &self.invalidate {
            invalidate(ctx.clone(), key.to_string()).await;
        }
    }

    async fn handle_request(&self, ctx: &Context, req: Request) -> Result<Option<Response>> {
        ctx.check()?;
        self.dispatch(ctx, req).instrument(self.logger()).await
    }

    async fn handle_existence_check(&self, ctx: &Context, req: Request) -> Result<(bool, bool)> {
        ctx.check()?;
        self.handle_existence(ctx, req).instrument(self.logger()).await
    }

    fn special_paths(&self) -> SpecialPaths {
        self.special_paths.clone()
    }

    fn system(&self) -> Option<Arc<dyn SystemView>> {
        self.read_state().system.clone()
    }

    fn logger(&self) -> tracing::Span {
        self.read_state()
            .logger
            .clone()
            .unwrap_or_else(tracing::Span::none)
    }

    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn plugin_version(&self) -> String {
        self.running_version.clone()
    }
}

/// [`RngCore`] over a host entropy source.
struct EntropyReader {
    source: Arc<dyn EntropySource>,
}

impl RngCore for EntropyReader {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(e) = self.source.fill(dest) {
            tracing::warn!(error = %e, "host entropy source failed; using the OS RNG");
            OsRng.fill_bytes(dest);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.source.fill(dest).map_err(rand::Error::new)
    }
}
