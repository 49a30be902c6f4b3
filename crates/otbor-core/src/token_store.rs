//! Ephemeral key/value store with per-key expiry.
//!
//! Holds invitation payloads and pending dialogues. Nothing here is durable and
//! there is no compare-and-swap: uniqueness is enforced by the slot registry.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{sync::Mutex, time::Instant};

use crate::{domain::UserId, Result};

/// Longest expiry any caller may ask for. Larger values are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 86_400);

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Unconditional overwrite.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// No-op on missing keys.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Key namespaces used in the shared cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreKey<'a> {
    Invite(&'a str),
    Pending(UserId),
    BotUsername,
}

impl StoreKey<'_> {
    pub fn render(&self, prefix: &str) -> String {
        match self {
            StoreKey::Invite(token) => format!("{prefix}invite:{token}"),
            StoreKey::Pending(actor) => format!("{prefix}pending:{}", actor.0),
            StoreKey::BotUsername => format!("{prefix}bot_username"),
        }
    }
}

pub async fn put_json<T: Serialize + Sync>(
    store: &dyn TokenStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.put(key, &raw, ttl).await
}

/// Reads a JSON payload. Undecodable payloads are treated as absent.
pub async fn get_json<T: DeserializeOwned>(store: &dyn TokenStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding undecodable payload");
            Ok(None)
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process implementation. Expiry is lazy: entries die on read, and
/// `put` sweeps anything already dead so the map does not grow unbounded.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut map = self.entries.lock().await;
        map.retain(|_, e| e.expires_at > now);
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl.min(MAX_TTL),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.entries.lock().await;
        let Some(entry) = map.get(key) else {
            return Ok(None);
        };
        if entry.expires_at <= Instant::now() {
            map.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(StoreKey::Invite("abc").render("otbor:"), "otbor:invite:abc");
        assert_eq!(
            StoreKey::Pending(UserId(42)).render("otbor:"),
            "otbor:pending:42"
        );
        assert_eq!(StoreKey::BotUsername.render("x:"), "x:bot_username");
    }

    #[tokio::test(start_paused = true)]
    async fn get_after_ttl_behaves_like_delete() {
        let store = MemoryTokenStore::new();
        store
            .put("k", "v", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_is_clamped_instead_of_overflowing() {
        let store = MemoryTokenStore::new();
        store.put("k", "v", Duration::MAX).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(MAX_TTL + Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_and_delete_is_idempotent() {
        let store = MemoryTokenStore::new();
        let ttl = Duration::from_secs(60);
        store.put("k", "one", ttl).await.unwrap();
        store.put("k", "two", ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("never").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_helpers_ignore_garbage() {
        let store = MemoryTokenStore::new();
        let ttl = Duration::from_secs(60);
        put_json(&store, "n", &vec![1, 2, 3], ttl).await.unwrap();
        let back: Option<Vec<i32>> = get_json(&store, "n").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        store.put("bad", "{not json", ttl).await.unwrap();
        let bad: Option<Vec<i32>> = get_json(&store, "bad").await.unwrap();
        assert_eq!(bad, None);
    }
}
