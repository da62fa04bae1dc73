//! Registered secret types and their lease callbacks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{FrameworkError, Result};
use crate::field::{FieldData, FieldMap, FieldSchema};
use crate::path::OperationFunc;
use crate::request::{LeaseOptions, Request, SecretInstance};
use crate::response::Response;

/// Internal-data key recording which secret type issued a lease.
pub const SECRET_TYPE_KEY: &str = "secret_type";

/// A kind of leased secret the backend issues.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vaultframe::Secret;
/// use serde_json::{json, Map};
///
/// let secret = Secret::new("access_keys").with_default_duration(Duration::from_secs(3600));
///
/// let mut internal = Map::new();
/// internal.insert("username".into(), json!("vault-user-1"));
/// let resp = secret.response(Map::new(), internal);
///
/// let issued = resp.secret.unwrap();
/// assert_eq!(issued.secret_type(), Some("access_keys"));
/// assert_eq!(issued.lease_options.ttl, Duration::from_secs(3600));
/// assert!(!issued.lease_options.renewable);
/// ```
#[derive(Clone, Default)]
pub struct Secret {
    /// Unique within a backend.
    pub secret_type: String,
    /// Schema for the secret's response data.
    pub fields: Arc<FieldMap>,
    pub default_duration: Duration,
    pub renew: Option<OperationFunc>,
    pub revoke: Option<OperationFunc>,
}

impl Secret {
    pub fn new(secret_type: impl Into<String>) -> Self {
        Self {
            secret_type: secret_type.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        Arc::make_mut(&mut self.fields).insert(name.into(), schema);
        self
    }

    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    pub fn with_renew(mut self, renew: OperationFunc) -> Self {
        self.renew = Some(renew);
        self
    }

    pub fn with_revoke(mut self, revoke: OperationFunc) -> Self {
        self.revoke = Some(revoke);
        self
    }

    /// A secret is renewable iff it has a renew callback.
    pub fn renewable(&self) -> bool {
        self.renew.is_some()
    }

    /// Builds a response issuing this secret.
    ///
    /// `internal` is copied into the lease's internal data together with the
    /// secret type; the host fills in the lease id.
    pub fn response(&self, data: Map<String, Value>, internal: Map<String, Value>) -> Response {
        let mut internal_data = internal;
        internal_data.insert(
            SECRET_TYPE_KEY.to_string(),
            Value::String(self.secret_type.clone()),
        );

        Response {
            secret: Some(SecretInstance {
                lease_options: LeaseOptions {
                    ttl: self.default_duration,
                    renewable: self.renewable(),
                    ..LeaseOptions::default()
                },
                internal_data,
                lease_id: String::new(),
            }),
            data,
            ..Response::default()
        }
    }

    /// Invokes the renew callback.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::UnsupportedOperation`] if the secret is not
    /// renewable.
    pub async fn handle_renew(&self, ctx: &Context, req: Request) -> Result<Option<Response>> {
        let renew = self.renew.as_ref().ok_or(FrameworkError::UnsupportedOperation)?;
        let data = FieldData::new(req.data.clone(), self.fields.clone());
        renew(ctx.clone(), req, data).await
    }

    /// Invokes the revoke callback.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::UnsupportedOperation`] if no revoke callback
    /// is set.
    pub async fn handle_revoke(&self, ctx: &Context, req: Request) -> Result<Option<Response>> {
        let revoke = self.revoke.as_ref().ok_or(FrameworkError::UnsupportedOperation)?;
        let data = FieldData::new(req.data.clone(), self.fields.clone());
        revoke(ctx.clone(), req, data).await
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("secret_type", &self.secret_type)
            .field("default_duration", &self.default_duration)
            .field("renewable", &self.renewable())
            .field("revocable", &self.revoke.is_some())
            .finish()
    }
}
