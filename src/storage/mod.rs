//! Storage capability consumed by backends.
//!
//! The host supplies an implementation of [`Storage`]; all persistence,
//! including the write-ahead log, goes through it.

#[cfg(feature = "inmem")]
pub mod inmem;

#[cfg(feature = "inmem")]
pub use inmem::InmemStorage;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Context;
use crate::error::Result;

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    /// Opaque bytes; the framework only ever writes JSON here.
    pub value: Vec<u8>,
    /// Ask the host to seal-wrap this entry at rest.
    pub seal_wrap: bool,
}

impl StorageEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            seal_wrap: false,
        }
    }

    /// JSON-encodes `value` into a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FrameworkError::Json`] if `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(key, serde_json::to_vec(value)?))
    }

    /// Decodes the entry value as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.value)?)
    }
}

/// Keyed byte store supplied by the host.
///
/// Every call takes the request context; implementations should return
/// [`crate::FrameworkError::Cancelled`] once it fires.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads `key`; `None` when absent.
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<StorageEntry>>;

    /// Writes an entry, replacing any previous value.
    async fn put(&self, ctx: &Context, entry: StorageEntry) -> Result<()>;

    /// Removes `key`. Deleting an absent key is not an error.
    async fn delete(&self, ctx: &Context, key: &str) -> Result<()>;

    /// Keys directly under `prefix`, with the prefix stripped.
    ///
    /// Nested keys are folded into their first path segment with a trailing
    /// `/`, so listing `a/` over `a/b/c` yields `b/`.
    async fn list(&self, ctx: &Context, prefix: &str) -> Result<Vec<String>>;
}
