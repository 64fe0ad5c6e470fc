//! Redis-backed shared store.
//!
//! # Responsibilities
//! - Keep a small pool of multiplexed connections, established lazily
//! - Rotate commands across the pool round-robin
//! - Discard a connection after an I/O error so the next call reconnects
//! - Bulk delete by prefix with `SCAN MATCH`, never `KEYS`, bounding each
//!   round trip rather than the whole sweep

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, Cmd, FromRedisValue, RedisError};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::store::{StateStore, StoreError, StoreResult};

const SCAN_BATCH: usize = 200;

/// Shared store over a Redis server.
pub struct RedisStore {
    client: Client,
    url: String,
    connections: Vec<ArcSwapOption<MultiplexedConnection>>,
    next: AtomicUsize,
    connect_timeout: Duration,
    op_timeout: Duration,
}

impl RedisStore {
    /// Parse the URL and size the pool. No connection is opened here.
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        let pool_size = config.pool_size.max(1);

        Ok(Self {
            client,
            url: config.url.clone(),
            connections: (0..pool_size).map(|_| ArcSwapOption::empty()).collect(),
            next: AtomicUsize::new(0),
            connect_timeout: config.connect_timeout(),
            op_timeout: config.op_timeout(),
        })
    }

    /// Pick the next slot and return its connection, connecting if needed.
    async fn connection(&self) -> StoreResult<(usize, MultiplexedConnection)> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let slot = &self.connections[index];

        if let Some(conn) = slot.load_full() {
            return Ok((index, conn.as_ref().clone()));
        }

        let conn = match timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(unavailable("connect", &e)),
            Err(_) => {
                return Err(StoreError::Unavailable(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                )))
            }
        };

        tracing::debug!(slot = index, url = %self.url, "Redis connection established");
        slot.store(Some(Arc::new(conn.clone())));
        Ok((index, conn))
    }

    /// Map a command error, dropping the connection when it is broken.
    fn command_error(&self, index: usize, op: &str, error: RedisError) -> StoreError {
        if error.is_io_error()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
            || error.is_timeout()
        {
            self.connections[index].store(None);
        }
        unavailable(op, &error)
    }

    /// One command bounded by the per-command deadline.
    async fn round_trip<T: FromRedisValue>(
        &self,
        index: usize,
        conn: &mut MultiplexedConnection,
        op: &str,
        cmd: &Cmd,
    ) -> StoreResult<T> {
        match timeout(self.op_timeout, cmd.query_async(conn)).await {
            Ok(result) => result.map_err(|e| self.command_error(index, op, e)),
            Err(_) => {
                self.connections[index].store(None);
                Err(StoreError::Unavailable(format!(
                    "redis {op} timed out after {:?}",
                    self.op_timeout
                )))
            }
        }
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        // EX has one-second granularity and rejects zero; never expire early
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        secs.max(1)
    }
}

fn unavailable(op: &str, error: &RedisError) -> StoreError {
    StoreError::Unavailable(format!("redis {op} failed: {error}"))
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let (index, mut conn) = self.connection().await?;
        ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error(index, "GET", e))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let (index, mut conn) = self.connection().await?;
        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(value.as_slice())
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error(index, "SET", e))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        let (index, mut conn) = self.connection().await?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value.as_slice())
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error(index, "SET NX", e))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let (index, mut conn) = self.connection().await?;
        ::redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error(index, "DEL", e))
    }

    async fn delete_matching(&self, prefix: &str) -> StoreResult<u64> {
        let (index, mut conn) = self.connection().await?;
        let pattern = escape_glob(prefix);
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let mut scan = ::redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let round: StoreResult<u64> = async {
                let (next, keys): (u64, Vec<String>) =
                    self.round_trip(index, &mut conn, "SCAN", &scan).await?;
                if !keys.is_empty() {
                    let mut del = ::redis::cmd("DEL");
                    del.arg(&keys);
                    let removed: u64 = self.round_trip(index, &mut conn, "DEL", &del).await?;
                    deleted += removed;
                }
                Ok(next)
            }
            .await;

            match round {
                Ok(0) => break,
                Ok(next) => cursor = next,
                // Keys already removed stay removed; report them
                Err(e) if deleted > 0 => {
                    tracing::warn!(
                        prefix = %prefix,
                        deleted,
                        error = %e,
                        "Prefix delete interrupted, returning partial count"
                    );
                    return Ok(deleted);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(prefix = %prefix, deleted, "Deleted keys by prefix");
        Ok(deleted)
    }

    async fn ping(&self) -> StoreResult<()> {
        let (index, mut conn) = self.connection().await?;
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_error(index, "PING", e))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connected = self
            .connections
            .iter()
            .filter(|slot| slot.load().is_some())
            .count();
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .field("pool_size", &self.connections.len())
            .field("connected", &connected)
            .field("connect_timeout", &self.connect_timeout)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> StoreConfig {
        StoreConfig {
            url: url.to_string(),
            pool_size: 2,
            connect_timeout_ms: 200,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("search:"), "search:*");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\*");
    }

    #[test]
    fn test_ttl_rounds_up_to_whole_seconds() {
        assert_eq!(RedisStore::ttl_secs(Duration::ZERO), 1);
        assert_eq!(RedisStore::ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(RedisStore::ttl_secs(Duration::from_millis(1_500)), 2);
        assert_eq!(RedisStore::ttl_secs(Duration::from_millis(2_001)), 3);
        assert_eq!(RedisStore::ttl_secs(Duration::from_secs(1800)), 1800);
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisStore::new(&config("not-a-url")).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Port 1 is reserved; nothing listens there.
        let store = RedisStore::new(&config("redis://127.0.0.1:1")).unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(format!("{store:?}").contains("connected: 0"));
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_round_trip_against_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisStore::new(&config(&url)).unwrap();
        let ttl = Duration::from_secs(30);

        store.set("gateway-guard-test:a", b"1".to_vec(), ttl).await.unwrap();
        assert_eq!(store.get("gateway-guard-test:a").await.unwrap(), Some(b"1".to_vec()));
        assert!(!store.set_if_absent("gateway-guard-test:a", b"2".to_vec(), ttl).await.unwrap());
        assert_eq!(store.delete_matching("gateway-guard-test:").await.unwrap(), 1);
        assert_eq!(store.get("gateway-guard-test:a").await.unwrap(), None);
    }
}
