//! Vaultframe - a framework for building secrets-engine plugins.
//!
//! A plugin declares *paths* (regex routes with typed fields and per-operation
//! handlers) and *secrets* (lease types with renew and revoke handlers).
//! Vaultframe routes requests to them, coerces loosely typed input into typed
//! values, runs lease renew and revoke, rolls back a write-ahead log of
//! partially completed work, and generates help text and an OpenAPI 3 document
//! from the same declarations.
//!
//! # Features
//!
//! - **Typed fields**: 16 field kinds with lenient coercion (`"1h"`, `"a,b"`,
//!   `"k=v"`, ...)
//! - **Async handlers**: Built on tokio; every host call takes a cancellable
//!   [`Context`]
//! - **Lease lifecycle**: Renew and revoke routed by secret type, TTL capping
//!   against host ceilings
//! - **WAL rollback**: Idempotent undo of interrupted multi-step work
//! - **OpenAPI**: Documents generated from path declarations, with stable
//!   operation ids
//! - **Host-agnostic**: Storage and system information are traits the host
//!   implements
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use vaultframe::field::{FieldKind, FieldSchema};
//! use vaultframe::path::{generic_name_regex, operation_fn, Path};
//! use vaultframe::storage::{InmemStorage, StorageEntry};
//! use vaultframe::{Backend, BackendConfig, BackendType, Context, LogicalBackend, Operation, Request, Response};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> vaultframe::Result<()> {
//!     let backend = Backend::new(BackendType::Logical).with_path(
//!         Path::new(format!("notes/{}", generic_name_regex("name")))
//!             .with_field("name", FieldSchema::new(FieldKind::String))
//!             .with_field("text", FieldSchema::new(FieldKind::String))
//!             .with_callback(Operation::Update, operation_fn(|ctx, req: Request, data| async move {
//!                 let storage = req.storage.expect("storage is configured");
//!                 let key = format!("notes/{}", data.get_string("name"));
//!                 storage.put(&ctx, StorageEntry::new(key, data.get_string("text"))).await?;
//!                 Ok(None)
//!             }))
//!             .with_callback(Operation::Read, operation_fn(|ctx, req: Request, data| async move {
//!                 let storage = req.storage.expect("storage is configured");
//!                 let key = format!("notes/{}", data.get_string("name"));
//!                 let Some(entry) = storage.get(&ctx, &key).await? else {
//!                     return Ok(None);
//!                 };
//!                 let mut resp = Response::default();
//!                 resp.data.insert("text".into(), String::from_utf8_lossy(&entry.value).into());
//!                 Ok(Some(resp))
//!             })),
//!     );
//!
//!     let ctx = Context::background();
//!     backend.setup(&ctx, BackendConfig::new().with_storage(Arc::new(InmemStorage::new())))?;
//!
//!     let write = Request::new(Operation::Update, "notes/todo").with_value("text", "ship it".into());
//!     backend.handle_request(&ctx, write).await?;
//!
//!     let resp = backend.handle_request(&ctx, Request::new(Operation::Read, "notes/todo")).await?;
//!     assert_eq!(resp.unwrap().data["text"], "ship it");
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! | Feature | Default | Notes |
//! |---------|---------|-------|
//! | `inmem` | yes | [`storage::InmemStorage`], for tests and local harnesses |

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod field;
mod help;
pub mod identity_template;
pub mod lease;
pub mod openapi;
pub mod patch;
pub mod path;
pub mod request;
pub mod response;
pub mod secret;
pub mod storage;
pub mod system_view;
pub mod validation;
pub mod wal;

pub use backend::{Backend, BackendType, InitializationRequest, LogicalBackend, SpecialPaths};
pub use config::BackendConfig;
pub use context::Context;
pub use error::{FrameworkError, MultiError, Result};
pub use field::{FieldData, FieldKind, FieldSchema, FieldValue};
pub use path::{OperationHandler, Path};
pub use request::{Auth, Operation, Request, SecretInstance};
pub use response::Response;
pub use secret::Secret;
pub use storage::{Storage, StorageEntry};
pub use system_view::SystemView;
