//! Redis implementation of the [`Store`] contract.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use tokio::sync::RwLock;

use super::{Store, StoreError, StoreResult};

/// Redis-backed store.
///
/// Holds one multiplexed connection shared by every task of the process.
/// The connection is established on first use and dropped again when a
/// command fails with an I/O error, so the next command reconnects.
pub struct RedisStore {
    /// Redis client for creating connections
    client: Client,

    /// Multiplexed connection (shared across tasks)
    connection: RwLock<Option<MultiplexedConnection>>,

    url: String,
}

impl RedisStore {
    /// Create a new Redis store. Only validates the URL; no connection is
    /// made until the first command.
    pub fn new(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            url: url.to_string(),
        })
    }

    /// Get the Redis URL (for debugging).
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_connection(&self) -> StoreResult<MultiplexedConnection> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> StoreResult<MultiplexedConnection> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                tracing::info!(url = %self.url, "Redis store connection established");
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, url = %self.url, "Failed to connect to Redis");
                Err(StoreError::Redis(e))
            }
        }
    }

    /// Run one command on the shared connection, dropping the connection
    /// when it turns out to be broken.
    async fn execute<F, T, Fut>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                Err(StoreError::Redis(e))
            }
        }
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> StoreResult<()> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.execute(|mut conn| async move { conn.lpush(key, value).await })
            .await
    }

    async fn move_tail(&self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        self.execute(|mut conn| async move { conn.rpoplpush(source, destination).await })
            .await
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<usize> {
        self.execute(|mut conn| async move { conn.lrem(key, count, value).await })
            .await
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        self.execute(|mut conn| async move { conn.llen(key).await })
            .await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let removed: usize = self
            .execute(|mut conn| async move { conn.del(key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        self.execute(|mut conn| async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.execute(|mut conn| async move { conn.exists(key).await })
            .await
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let added: usize = self
            .execute(|mut conn| async move { conn.sadd(key, member).await })
            .await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let removed: usize = self
            .execute(|mut conn| async move { conn.srem(key, member).await })
            .await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.execute(|mut conn| async move { conn.smembers(key).await })
            .await
    }
}
