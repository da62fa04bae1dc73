//! End-to-end tests against a small key-issuing secrets engine.
//!
//! The engine stores roles, issues leased keys per role, and records each
//! issuance in the write-ahead log so an interrupted issuance can be undone.

#![cfg(feature = "inmem")]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use rand::RngCore;
use serde_json::{json, Map, Value};

use vaultframe::field::{FieldKind, FieldSchema};
use vaultframe::lease::lease_extend;
use vaultframe::openapi::OasDocument;
use vaultframe::path::{existence_fn, generic_name_regex, operation_fn, OperationHandler, Path};
use vaultframe::storage::InmemStorage;
use vaultframe::system_view::StaticSystemView;
use vaultframe::wal;
use vaultframe::{
    factory, Backend, BackendConfig, BackendType, Context, FieldData, FrameworkError,
    LogicalBackend, Operation, Request, Response, Result, Secret, SpecialPaths, Storage,
    StorageEntry,
};

const KEY_SECRET: &str = "issued_key";

fn storage_of(req: &Request) -> Result<Arc<dyn Storage>> {
    req.storage
        .clone()
        .ok_or_else(|| FrameworkError::InvalidRequest("no storage".into()))
}

fn key_secret(system: Arc<StaticSystemView>) -> Secret {
    Secret::new(KEY_SECRET)
        .with_field("key_id", FieldSchema::new(FieldKind::String))
        .with_field("key", FieldSchema::new(FieldKind::String))
        .with_default_duration(Duration::from_secs(600))
        .with_renew(lease_extend(Duration::from_secs(600), Duration::from_secs(3600), system))
        .with_revoke(operation_fn(|ctx, req: Request, _data| async move {
            let storage = storage_of(&req)?;
            let key_id = req
                .secret
                .as_ref()
                .and_then(|s| s.internal_data.get("key_id"))
                .and_then(Value::as_str)
                .ok_or_else(|| FrameworkError::InvalidRequest("secret has no key id".into()))?
                .to_string();
            storage.delete(&ctx, &format!("issued/{key_id}")).await?;
            Ok(None)
        }))
}

fn roles_path() -> Path {
    let role_key = |data: &FieldData| format!("roles/{}", data.get_string("name"));

    let write = operation_fn(move |ctx, req: Request, data: FieldData| async move {
        let storage = storage_of(&req)?;
        let role = json!({
            "ttl": data.get("ttl").as_duration().unwrap_or_default().as_secs(),
            "policies": data.get_string_slice("policies"),
        });
        storage
            .put(&ctx, StorageEntry::json(role_key(&data), &role)?)
            .await?;
        Ok(None)
    });

    Path::new(format!("roles/{}", generic_name_regex("name")))
        .with_field("name", FieldSchema::new(FieldKind::NameString).with_description("Role name"))
        .with_field("ttl", FieldSchema::new(FieldKind::DurationSecond).with_default(json!("5m")))
        .with_field("policies", FieldSchema::new(FieldKind::CommaStringSlice))
        .with_existence_check(existence_fn(move |ctx, req: Request, data: FieldData| async move {
            Ok(storage_of(&req)?.get(&ctx, &role_key(&data)).await?.is_some())
        }))
        .with_operation(Operation::Create, OperationHandler::new(write.clone()))
        .with_operation(
            Operation::Update,
            OperationHandler::new(write).with_summary("Write a role"),
        )
        .with_operation(
            Operation::Read,
            OperationHandler::new(operation_fn(move |ctx, req: Request, data: FieldData| async move {
                let Some(entry) = storage_of(&req)?.get(&ctx, &role_key(&data)).await? else {
                    return Ok(None);
                };
                let role: Map<String, Value> = entry.decode_json()?;
                Ok(Some(Response::with_data(role)))
            })),
        )
        .with_operation(
            Operation::Delete,
            OperationHandler::new(operation_fn(move |ctx, req: Request, data: FieldData| async move {
                storage_of(&req)?.delete(&ctx, &role_key(&data)).await?;
                Ok(None)
            })),
        )
        .with_help("Manage key roles", "Roles decide the TTL of issued keys.")
}

fn roles_list_path() -> Path {
    Path::new("roles/?").with_operation(
        Operation::List,
        OperationHandler::new(operation_fn(|ctx, req: Request, _data| async move {
            let keys = storage_of(&req)?.list(&ctx, "roles/").await?;
            Ok(Some(Response::list(keys)))
        })),
    )
}

fn creds_path(secret: Secret) -> Path {
    Path::new(format!("creds/{}", generic_name_regex("role")))
        .with_field("role", FieldSchema::new(FieldKind::NameString))
        .with_field("simulate_crash", FieldSchema::new(FieldKind::Bool))
        .with_callback(
            Operation::Read,
            operation_fn(move |ctx, req: Request, data: FieldData| {
                let secret = secret.clone();
                async move {
                    let storage = storage_of(&req)?;
                    let role = data.get_string("role");
                    if storage.get(&ctx, &format!("roles/{role}")).await?.is_none() {
                        return Ok(Some(Response::error(format!("unknown role {role:?}"))));
                    }

                    let key_id = uuid::Uuid::new_v4().to_string();
                    let wal_id = wal::put(&ctx, storage.as_ref(), KEY_SECRET, json!({"key_id": key_id})).await?;

                    let mut raw = [0u8; 16];
                    rand::rngs::OsRng.fill_bytes(&mut raw);
                    let key = base64::engine::general_purpose::STANDARD.encode(raw);
                    storage
                        .put(&ctx, StorageEntry::new(format!("issued/{key_id}"), key.clone()))
                        .await?;

                    if data.get_bool("simulate_crash") {
                        return Err(FrameworkError::User("issuer crashed".into()));
                    }
                    wal::delete(&ctx, storage.as_ref(), &wal_id).await?;

                    let mut out = Map::new();
                    out.insert("key_id".into(), json!(key_id));
                    out.insert("key".into(), json!(key));
                    let mut internal = Map::new();
                    internal.insert("key_id".into(), json!(key_id));
                    Ok(Some(secret.response(out, internal)))
                }
            }),
        )
}

fn key_backend(system: Arc<StaticSystemView>) -> Backend {
    let secret = key_secret(system);
    Backend::new(BackendType::Logical)
        .with_help("Issues leased random keys.")
        .with_special_paths(SpecialPaths {
            root: vec!["roles/*".into()],
            ..SpecialPaths::default()
        })
        .with_path(roles_list_path())
        .with_path(roles_path())
        .with_path(creds_path(secret.clone()))
        .with_secret(secret)
        .with_wal_rollback(|ctx, req: Request, kind, data: Value| async move {
            assert_eq!(kind, KEY_SECRET);
            let key_id = data["key_id"].as_str().unwrap_or_default().to_string();
            storage_of(&req)?.delete(&ctx, &format!("issued/{key_id}")).await
        })
}

async fn set_up() -> (Backend, InmemStorage) {
    let system = Arc::new(StaticSystemView::new());
    let backend = key_backend(system.clone());
    let storage = InmemStorage::new();
    backend
        .setup(
            &Context::background(),
            BackendConfig::new()
                .with_storage(Arc::new(storage.clone()))
                .with_system(system)
                .with_logger(tracing::info_span!("plugin", mount = "keys/")),
        )
        .expect("setup");
    (backend, storage)
}

/// Decides create versus update the way a host does, then sends the write.
async fn write(backend: &Backend, path: &str, data: Value) -> Result<Option<Response>> {
    let ctx = Context::background();
    let data = data.as_object().cloned().unwrap_or_default();

    let probe = Request::new(Operation::Create, path).with_data(data.clone());
    let (_, exists) = backend.handle_existence_check(&ctx, probe).await?;
    let operation = if exists { Operation::Update } else { Operation::Create };
    backend
        .handle_request(&ctx, Request::new(operation, path).with_data(data))
        .await
}

async fn issue(backend: &Backend, role: &str) -> Response {
    backend
        .handle_request(&Context::background(), Request::new(Operation::Read, format!("creds/{role}")))
        .await
        .expect("issue")
        .expect("response")
}

#[tokio::test]
async fn test_role_lifecycle() {
    let (backend, storage) = set_up().await;
    let ctx = Context::background();

    write(&backend, "roles/web", json!({"ttl": "90s", "policies": "a, b"}))
        .await
        .unwrap();
    let resp = write(&backend, "roles/web", json!({"ttl": 120, "color": "red"}))
        .await
        .unwrap();
    assert!(resp.is_none(), "warnings only ride on responses");

    let resp = backend
        .handle_request(&ctx, Request::new(Operation::Read, "roles/web"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resp.data["ttl"], 120);
    assert_eq!(resp.data["policies"], json!([]));

    write(&backend, "roles/db", json!({})).await.unwrap();
    let resp = backend
        .handle_request(&ctx, Request::new(Operation::List, "roles/"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resp.data["keys"], json!(["db", "web"]));

    backend
        .handle_request(&ctx, Request::new(Operation::Delete, "roles/web"))
        .await
        .unwrap();
    assert!(storage.get(&ctx, "roles/web").await.unwrap().is_none());
}

#[tokio::test]
async fn test_role_validation() {
    let (backend, _) = set_up().await;

    let resp = write(&backend, "roles/web", json!({"ttl": "forever"}))
        .await
        .unwrap_err();
    assert_eq!(resp.code(), 400);

    let resp = backend
        .handle_request(
            &Context::background(),
            Request::new(Operation::Create, "roles/web").with_value("ttl", json!("forever")),
        )
        .await
        .unwrap()
        .unwrap();
    assert!(resp.is_error());
    assert!(resp.error_message().unwrap().starts_with("Field validation failed"));
}

#[tokio::test]
async fn test_issue_renew_revoke() {
    let (backend, storage) = set_up().await;
    let ctx = Context::background();
    write(&backend, "roles/web", json!({})).await.unwrap();

    let resp = issue(&backend, "web").await;
    let key_id = resp.data["key_id"].as_str().unwrap().to_string();
    assert_eq!(resp.data["key"].as_str().unwrap().len(), 24);
    assert!(storage.get(&ctx, &format!("issued/{key_id}")).await.unwrap().is_some());
    assert!(wal::list(&ctx, &storage).await.unwrap().is_empty());

    let mut lease = resp.secret.unwrap();
    assert_eq!(lease.secret_type(), Some(KEY_SECRET));
    assert!(lease.lease_options.renewable);

    lease.lease_options.increment = Duration::from_secs(300);
    let renewed = backend
        .handle_request(&ctx, Request::new(Operation::Renew, "").with_secret(lease.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renewed.secret.unwrap().lease_options.ttl, Duration::from_secs(300));

    backend
        .handle_request(&ctx, Request::new(Operation::Revoke, "").with_secret(lease))
        .await
        .unwrap();
    assert!(storage.get(&ctx, &format!("issued/{key_id}")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_issue_for_unknown_role() {
    let (backend, _) = set_up().await;
    let resp = issue(&backend, "ghost").await;
    assert_eq!(resp.error_message(), Some("unknown role \"ghost\""));
}

#[tokio::test]
async fn test_interrupted_issue_is_rolled_back() {
    let (backend, storage) = set_up().await;
    let ctx = Context::background();
    write(&backend, "roles/web", json!({})).await.unwrap();

    let err = backend
        .handle_request(
            &ctx,
            Request::new(Operation::Read, "creds/web").with_value("simulate_crash", json!("true")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "issuer crashed");
    assert_eq!(wal::list(&ctx, &storage).await.unwrap().len(), 1);
    assert_eq!(storage.list(&ctx, "issued/").await.unwrap().len(), 1);

    // Too recent for a regular sweep.
    backend
        .handle_request(&ctx, Request::new(Operation::Rollback, ""))
        .await
        .unwrap();
    assert_eq!(wal::list(&ctx, &storage).await.unwrap().len(), 1);

    backend
        .handle_request(
            &ctx,
            Request::new(Operation::Rollback, "").with_value("immediate", json!(true)),
        )
        .await
        .unwrap();
    assert!(wal::list(&ctx, &storage).await.unwrap().is_empty());
    assert!(storage.list(&ctx, "issued/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_help_and_openapi() {
    let (backend, _) = set_up().await;
    let ctx = Context::background();

    let resp = backend
        .handle_request(&ctx, Request::new(Operation::Help, "roles/web"))
        .await
        .unwrap()
        .unwrap();
    let text = resp.data["help"].as_str().unwrap();
    assert!(text.contains("Matching Route: roles/(?P<name>"));
    assert!(text.contains("    ttl (duration (sec))"));

    let root = backend
        .handle_request(
            &ctx,
            Request::new(Operation::Help, "").with_value("requestResponsePrefix", json!("keys")),
        )
        .await
        .unwrap()
        .unwrap();
    let doc = OasDocument::from_value(root.data["openapi"].clone()).unwrap();

    let roles = &doc.paths["/roles/{name}"];
    assert!(roles.sudo);
    assert!(roles.create_supported);
    let post = roles.post.as_ref().unwrap();
    assert_eq!(post.summary, "Write a role");
    assert_eq!(post.operation_id, "postRolesName");
    assert!(roles.parameters.iter().any(|p| p.name == "keys_mount_path"));

    assert!(doc.paths["/roles"].get.is_some());
    assert!(doc.paths["/creds/{role}"].get.is_some());

    // Round-trips through its JSON form.
    assert_eq!(OasDocument::from_value(doc.to_value()).unwrap(), doc);
}

fn factory_fn(ctx: &Context, config: BackendConfig) -> Result<Arc<dyn LogicalBackend>> {
    let backend = key_backend(Arc::new(StaticSystemView::new()));
    backend.setup(ctx, config)?;
    Ok(Arc::new(backend))
}

#[tokio::test]
async fn test_served_through_factory() {
    factory::register_factory("keys", factory_fn);
    let ctx = Context::background();
    let storage: Arc<dyn Storage> = Arc::new(InmemStorage::new());

    let backend = factory::new_backend("keys", &ctx, BackendConfig::new().with_storage(storage.clone())).unwrap();
    assert_eq!(backend.backend_type(), BackendType::Logical);
    assert_eq!(backend.special_paths().root, vec!["roles/*".to_string()]);

    let err = backend
        .handle_request(&ctx, Request::new(Operation::Read, "nothing/here"))
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::UnsupportedPath));

    let resp = backend
        .handle_request(&ctx, Request::new(Operation::Read, "creds/none"))
        .await
        .unwrap()
        .unwrap();
    assert!(resp.is_error());
}
