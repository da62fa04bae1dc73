//! Write-ahead log of uncommitted external work.
//!
//! Backends record an entry before performing a side effect they cannot
//! atomically persist (creating a cloud user, say) and delete it once the
//! result is stored. Entries left behind are handed to the backend's rollback
//! callback by the rollback sweep.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::Context;
use crate::error::Result;
use crate::storage::{Storage, StorageEntry};

/// Storage prefix reserved for WAL entries.
pub const WAL_PREFIX: &str = "wal/";

/// A single WAL entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Storage id; not part of the stored body.
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    /// Unix seconds, UTC.
    pub created_at: i64,
}

/// Writes a new entry and returns its id.
pub async fn put(ctx: &Context, storage: &dyn Storage, kind: &str, data: Value) -> Result<String> {
    ctx.check()?;
    let id = Uuid::new_v4().to_string();
    let entry = WalEntry {
        id: id.clone(),
        kind: kind.to_string(),
        data,
        created_at: Utc::now().timestamp(),
    };

    storage
        .put(ctx, StorageEntry::json(format!("{WAL_PREFIX}{id}"), &entry)?)
        .await?;
    tracing::debug!(wal_id = %id, kind, "wrote WAL entry");
    Ok(id)
}

/// Reads an entry; `None` when absent.
pub async fn get(ctx: &Context, storage: &dyn Storage, id: &str) -> Result<Option<WalEntry>> {
    ctx.check()?;
    let Some(raw) = storage.get(ctx, &format!("{WAL_PREFIX}{id}")).await? else {
        return Ok(None);
    };

    let mut entry: WalEntry = raw.decode_json()?;
    entry.id = id.to_string();
    Ok(Some(entry))
}

/// Removes an entry, committing or abandoning the work it tracked.
pub async fn delete(ctx: &Context, storage: &dyn Storage, id: &str) -> Result<()> {
    ctx.check()?;
    storage.delete(ctx, &format!("{WAL_PREFIX}{id}")).await
}

/// Ids of all entries.
pub async fn list(ctx: &Context, storage: &dyn Storage) -> Result<Vec<String>> {
    ctx.check()?;
    let keys = storage.list(ctx, WAL_PREFIX).await?;
    Ok(keys
        .into_iter()
        .map(|k| k.strip_prefix(WAL_PREFIX).map(str::to_string).unwrap_or(k))
        .collect())
}

#[cfg(all(test, feature = "inmem"))]
mod tests {
    use super::*;
    use crate::storage::InmemStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let ctx = Context::background();
        let storage = InmemStorage::new();

        let id = put(&ctx, &storage, "user", json!({"name": "bob"})).await.unwrap();
        assert_eq!(list(&ctx, &storage).await.unwrap(), vec![id.clone()]);

        let entry = get(&ctx, &storage, &id).await.unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.kind, "user");
        assert_eq!(entry.data["name"], "bob");
        assert!((Utc::now().timestamp() - entry.created_at).abs() < 5);

        delete(&ctx, &storage, &id).await.unwrap();
        assert!(get(&ctx, &storage, &id).await.unwrap().is_none());
        assert!(list(&ctx, &storage).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_layout() {
        let ctx = Context::background();
        let storage = InmemStorage::new();
        let id = put(&ctx, &storage, "k", json!("d")).await.unwrap();

        let raw = storage
            .get(&ctx, &format!("wal/{id}"))
            .await
            .unwrap()
            .unwrap();
        let body: Value = raw.decode_json().unwrap();
        assert_eq!(body["type"], "k");
        assert_eq!(body["data"], "d");
        assert!(body["created_at"].is_i64());
        assert!(body.get("id").is_none());
    }

    #[tokio::test]
    async fn test_cancelled() {
        let ctx = Context::background();
        ctx.cancel();
        let storage = InmemStorage::new();
        assert!(put(&ctx, &storage, "k", json!(null)).await.is_err());
    }
}
