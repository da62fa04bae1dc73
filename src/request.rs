//! Inbound request types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameworkError;
use crate::storage::Storage;

/// The kind of operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    List,
    Help,
    Renew,
    Revoke,
    Rollback,
}

impl Operation {
    /// All operations in declaration order.
    pub const ALL: [Operation; 9] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
        Operation::List,
        Operation::Help,
        Operation::Renew,
        Operation::Revoke,
        Operation::Rollback,
    ];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Help => "help",
            Operation::Renew => "renew",
            Operation::Revoke => "revoke",
            Operation::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| FrameworkError::InvalidRequest(format!("unknown operation {s:?}")))
    }
}

/// Lease parameters shared by secrets and auth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaseOptions {
    #[serde(default)]
    pub ttl: Duration,
    #[serde(default)]
    pub max_ttl: Duration,
    #[serde(default)]
    pub renewable: bool,
    /// Requested extension on renew.
    #[serde(default)]
    pub increment: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_time: Option<DateTime<Utc>>,
}

/// An issued, leased secret as seen on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretInstance {
    #[serde(flatten)]
    pub lease_options: LeaseOptions,
    /// Data only the issuing backend sees, e.g. `secret_type`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub internal_data: Map<String, Value>,
    /// Filled in by the host.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lease_id: String,
}

impl SecretInstance {
    /// The registered secret type recorded at issue time.
    pub fn secret_type(&self) -> Option<&str> {
        self.internal_data.get("secret_type").and_then(Value::as_str)
    }
}

/// An issued credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(flatten)]
    pub lease_options: LeaseOptions,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub internal_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub accessor: String,
    #[serde(default)]
    pub period: Duration,
    #[serde(default)]
    pub explicit_max_ttl: Duration,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_id: String,
}

/// Transport details of the calling client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub remote_addr: String,
}

/// A request routed into the backend by the host.
#[derive(Clone)]
pub struct Request {
    pub operation: Operation,
    /// Mount-relative path.
    pub path: String,
    pub data: Map<String, Value>,
    pub storage: Option<Arc<dyn Storage>>,
    /// Set on renew/revoke of a secret.
    pub secret: Option<SecretInstance>,
    /// Set on renew of a credential.
    pub auth: Option<Auth>,
    pub display_name: String,
    pub connection: Option<Connection>,
    pub mount_point: String,
    pub mount_type: String,
    pub mount_accessor: String,
    pub entity_id: String,
    pub headers: BTreeMap<String, Vec<String>>,
}

impl Request {
    /// Creates a request for `operation` at `path` with no data.
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            data: Map::new(),
            storage: None,
            secret: None,
            auth: None,
            display_name: String::new(),
            connection: None,
            mount_point: String::new(),
            mount_type: String::new(),
            mount_accessor: String::new(),
            entity_id: String::new(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Sets a single data key.
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_secret(mut self, secret: SecretInstance) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("operation", &self.operation)
            .field("path", &self.path)
            .field("data", &self.data)
            .field("storage", &self.storage.is_some())
            .field("secret", &self.secret)
            .field("auth", &self.auth)
            .field("display_name", &self.display_name)
            .field("mount_point", &self.mount_point)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.as_str()));
        }
        assert!("patch".parse::<Operation>().is_err());
    }

    #[test]
    fn test_secret_type_lookup() {
        let mut secret = SecretInstance::default();
        assert_eq!(secret.secret_type(), None);

        secret
            .internal_data
            .insert("secret_type".to_string(), json!("access_keys"));
        assert_eq!(secret.secret_type(), Some("access_keys"));
    }

    #[test]
    fn test_request_builder() {
        let req = Request::new(Operation::Update, "roles/web")
            .with_value("ttl", json!("1h"))
            .with_auth(Auth::default());

        assert_eq!(req.operation, Operation::Update);
        assert_eq!(req.data.get("ttl"), Some(&json!("1h")));
        assert!(req.auth.is_some());
        assert!(req.storage.is_none());
    }
}
