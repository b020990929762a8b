//! Ephemeral key/value store with per-key TTL.
//!
//! The one piece of shared state outside any single process's memory:
//! last-known locations, responder status, and the active alert cache all
//! live here. A read after TTL expiry returns `None`, never a stale value.
//! Concurrent writes to the same key are last-write-wins.
//!
//! Two backends behind the same trait: `MemoryStore` for single-node
//! operation and tests, `RedisStore` for multi-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Shared TTL store. Values are opaque JSON payloads.
#[async_trait]
pub trait EphemeralStateStore: Send + Sync {
    /// Write `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Read the live value under `key`; expired or missing keys yield `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Remove `key` immediately.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Enumerate all live values whose key starts with `prefix`.
    /// Backs the nearby-alert scan and the initial-alerts snapshot; the
    /// active set is expected to stay in the low hundreds, so a linear
    /// enumeration is acceptable here.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Value>, StoreError>;
}

// --- In-memory backend ---

/// Process-local store: a concurrent map of value + deadline. Expiry is
/// checked lazily on read; `purge_expired` reclaims memory from a
/// background task.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (Value, Instant)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose deadline has passed. Returns the purge count.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, deadline)| *deadline > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl EphemeralStateStore for MemoryStore {
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.entries.get(key) {
            Some(entry) if entry.value().1 > Instant::now() => Ok(Some(entry.value().0.clone())),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Value>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().1 > now)
            .map(|e| e.value().0.clone())
            .collect())
    }
}

// --- Redis backend ---

/// Redis-backed store using `SET .. EX` for TTL semantics. The connection
/// manager transparently reconnects, so individual calls surface transient
/// errors but the handle stays usable.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(StoreError::from)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EphemeralStateStore for RedisStore {
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let payload = value.to_string();
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        match raw {
            Some(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt payload under {key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            // A key can expire between SCAN and GET; skip those.
            let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            if let Some(s) = raw {
                match serde_json::from_str(&s) {
                    Ok(v) => out.push(v),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Skipping corrupt store payload"),
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn value_readable_before_ttl_absent_after() {
        let store = MemoryStore::new();
        store
            .put("alert:1", json!({"id": 1}), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("alert:1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("alert:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryStore::new();
        store
            .put("k", json!("first"), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .put("k", json!("second"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("second")));
    }

    #[tokio::test]
    async fn delete_removes_immediately() {
        let store = MemoryStore::new();
        store
            .put("k", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn scan_prefix_skips_expired_and_foreign_keys() {
        let store = MemoryStore::new();
        store
            .put("alert:a", json!("a"), Duration::from_secs(10))
            .await
            .unwrap();
        store
            .put("alert:b", json!("b"), Duration::from_secs(100))
            .await
            .unwrap();
        store
            .put("report:c", json!("c"), Duration::from_secs(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let values = store.scan_prefix("alert:").await.unwrap();
        assert_eq!(values, vec![json!("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_reclaims_expired_entries() {
        let store = MemoryStore::new();
        store
            .put("k", json!(1), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.purge_expired(), 1);
    }
}
