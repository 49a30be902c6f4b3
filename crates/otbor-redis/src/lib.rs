//! Redis-backed [`TokenStore`].
//!
//! Keys expire server-side (`PSETEX`), so nothing here sweeps. The
//! `ConnectionManager` reconnects on its own; a command that fails while it does
//! surfaces as `StoreUnavailable` and the caller decides whether to retry.

use std::time::Duration;

use async_trait::async_trait;
use otbor_core::{token_store::TokenStore, Error, Result};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{error, info};

#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
}

impl RedisTokenStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        // The URL may carry credentials; keep it out of the logs.
        let client = Client::open(redis_url).map_err(|e| {
            error!(error = %e, "failed to open redis client");
            Error::Config(format!("invalid REDIS_URL: {e}"))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            error!(error = %e, "failed to connect to redis");
            unavailable("connect", e)
        })?;
        info!("redis token store ready");
        Ok(Self { conn })
    }
}

fn unavailable(op: &str, e: redis::RedisError) -> Error {
    Error::StoreUnavailable(format!("redis {op}: {e}"))
}

/// Redis rejects a zero expiry, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
            .await
            .map_err(|e| unavailable("put", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| unavailable("get", e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| unavailable("delete", e))
    }
}
