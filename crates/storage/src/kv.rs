use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::StoreError;

/// A key returned by [`KvStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyEntry {
    pub name: String,
}

/// Minimal key-value collaborator: no transactions, no conditional writes,
/// no TTL. Every read-modify-write built on top of it is last-write-wins.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Every key in the store. Unpaginated.
    async fn list(&self) -> Result<Vec<KeyEntry>, StoreError>;
}

// ─── Postgres ───────────────────────────────────────────────────────────────

/// Key-value store backed by the `kv_entries` table, scoped to one namespace.
#[derive(Debug, Clone)]
pub struct PgKvStore {
    pool: PgPool,
    namespace: String,
}

impl PgKvStore {
    pub fn new(pool: PgPool, namespace: impl Into<String>) -> Self {
        Self { pool, namespace: namespace.into() }
    }
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM kv_entries WHERE namespace = $1 AND key = $2")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (namespace, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (namespace, key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<KeyEntry>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM kv_entries WHERE namespace = $1 ORDER BY key")
                .bind(&self.namespace)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(name,)| KeyEntry { name }).collect())
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

/// Process-local store for tests and throwaway deployments.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<KeyEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .map(|name| KeyEntry { name: name.clone() })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_get_put_list() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("a").await.expect("get"), None);

        store.put("b", "2").await.expect("put");
        store.put("a", "1").await.expect("put");
        store.put("a", "3").await.expect("overwrite");

        assert_eq!(store.get("a").await.expect("get").as_deref(), Some("3"));
        let names: Vec<String> =
            store.list().await.expect("list").into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
