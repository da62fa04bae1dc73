//! In-memory storage for tests.
//!
//! Provides a complete [`Storage`] implementation with error injection for
//! exercising backend failure paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Storage, StorageEntry};
use crate::context::Context;
use crate::error::{FrameworkError, Result};

/// In-memory storage.
///
/// # Example
///
/// ```
/// use vaultframe::storage::{InmemStorage, Storage, StorageEntry};
/// use vaultframe::Context;
///
/// #[tokio::main]
/// async fn main() -> vaultframe::Result<()> {
///     let ctx = Context::background();
///     let mut storage = InmemStorage::new();
///     storage.put(&ctx, StorageEntry::new("config", "{}")).await?;
///
///     // Simulate a failing substrate
///     storage.list_error = Some("backend down".to_string());
///     assert!(storage.list(&ctx, "").await.is_err());
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct InmemStorage {
    entries: Arc<RwLock<BTreeMap<String, StorageEntry>>>,

    /// Error to return from `get()`
    pub get_error: Option<String>,
    /// Error to return from `put()`
    pub put_error: Option<String>,
    /// Error to return from `delete()`
    pub delete_error: Option<String>,
    /// Error to return from `list()`
    pub list_error: Option<String>,
}

impl InmemStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn injected(err: &Option<String>) -> Result<()> {
        match err {
            Some(msg) => Err(FrameworkError::Storage(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for InmemStorage {
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<StorageEntry>> {
        ctx.check()?;
        Self::injected(&self.get_error)?;

        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, ctx: &Context, entry: StorageEntry) -> Result<()> {
        ctx.check()?;
        Self::injected(&self.put_error)?;

        let mut entries = self.entries.write().await;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        ctx.check()?;
        Self::injected(&self.delete_error)?;

        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn list(&self, ctx: &Context, prefix: &str) -> Result<Vec<String>> {
        ctx.check()?;
        Self::injected(&self.list_error)?;

        let entries = self.entries.read().await;
        let mut keys: Vec<String> = Vec::new();
        for key in entries.keys().filter(|k| k.starts_with(prefix)) {
            let rest = &key[prefix.len()..];
            let child = match rest.find('/') {
                Some(i) => &rest[..=i],
                None => rest,
            };
            if keys.last().map(String::as_str) != Some(child) {
                keys.push(child.to_string());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let ctx = Context::background();
        let storage = InmemStorage::new();

        assert!(storage.get(&ctx, "foo").await.unwrap().is_none());

        storage
            .put(&ctx, StorageEntry::new("foo", b"bar".to_vec()))
            .await
            .unwrap();
        let entry = storage.get(&ctx, "foo").await.unwrap().unwrap();
        assert_eq!(entry.value, b"bar");

        storage.delete(&ctx, "foo").await.unwrap();
        assert!(storage.get(&ctx, "foo").await.unwrap().is_none());
        // Deleting again is fine
        storage.delete(&ctx, "foo").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_folds_nested_keys() {
        let ctx = Context::background();
        let storage = InmemStorage::new();
        for key in ["a/b/c", "a/b/d", "a/e", "wal/1", "z"] {
            storage.put(&ctx, StorageEntry::new(key, "x")).await.unwrap();
        }

        assert_eq!(storage.list(&ctx, "a/").await.unwrap(), vec!["b/", "e"]);
        assert_eq!(storage.list(&ctx, "wal/").await.unwrap(), vec!["1"]);
        assert_eq!(
            storage.list(&ctx, "").await.unwrap(),
            vec!["a/", "wal/", "z"]
        );
        assert!(storage.list(&ctx, "missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_injection() {
        let ctx = Context::background();
        let mut storage = InmemStorage::new();
        storage.get_error = Some("get failed".to_string());
        storage.put_error = Some("put failed".to_string());

        let err = storage.get(&ctx, "k").await.unwrap_err();
        assert_eq!(err.to_string(), "storage error: get failed");
        assert!(storage.put(&ctx, StorageEntry::new("k", "v")).await.is_err());
        assert!(storage.list(&ctx, "").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let ctx = Context::background();
        ctx.cancel();
        let storage = InmemStorage::new();

        let err = storage.get(&ctx, "k").await.unwrap_err();
        assert!(matches!(err, FrameworkError::Cancelled));
    }

    #[tokio::test]
    async fn test_json_entry() {
        let ctx = Context::background();
        let storage = InmemStorage::new();
        let entry = StorageEntry::json("cfg", &serde_json::json!({"ttl": 60})).unwrap();
        storage.put(&ctx, entry).await.unwrap();

        let value: serde_json::Value = storage
            .get(&ctx, "cfg")
            .await
            .unwrap()
            .unwrap()
            .decode_json()
            .unwrap();
        assert_eq!(value["ttl"], 60);
    }
}
