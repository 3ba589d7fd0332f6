//! The shared tier. `RemoteStore` is the seam; `RedisStore` talks to Redis over
//! a single lazily opened connection with short timeouts. After a connection
//! failure it refuses to redial until the backoff has passed, so a dead server
//! costs one timeout per backoff window rather than one per call.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::{Client, Connection, RedisError};
use tracing::{debug, info};

use polaris_core::error::{Error, Result};

/// Errors from a remote store mean "unreachable"; the cache falls back to the
/// local tier whenever one is returned.
pub trait RemoteStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    fn delete(&self, key: &str) -> Result<bool>;
    fn exists(&self, key: &str) -> Result<bool>;
    /// Remove keys matching a glob pattern; returns how many were removed.
    fn clear(&self, pattern: &str) -> Result<usize>;
    /// `Ok(None)` when the stored value is not an integer.
    fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<Option<i64>>;
    fn ping(&self) -> Result<()>;
}

pub struct RedisStore {
    client: Client,
    namespace: String,
    timeout: Duration,
    backoff: Duration,
    conn: Mutex<Option<Connection>>,
    retry_after: Mutex<Option<Instant>>,
}

const SCAN_BATCH: usize = 200;

impl RedisStore {
    /// Parses the URL; no connection is made until the first call.
    pub fn new(url: &str, namespace: &str, timeout: Duration, backoff: Duration) -> Result<Self> {
        let client = Client::open(url).map_err(|e| Error::InvalidConfig(format!("redis url: {e}")))?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            timeout,
            backoff,
            conn: Mutex::new(None),
            retry_after: Mutex::new(None),
        })
    }

    fn key(&self, key: &str) -> String {
        if self.namespace.is_empty() { key.to_string() } else { format!("{}:{}", self.namespace, key) }
    }

    fn connect(&self) -> redis::RedisResult<Connection> {
        let conn = self.client.get_connection_with_timeout(self.timeout)?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        info!(namespace = %self.namespace, "redis connected");
        Ok(conn)
    }

    fn check_backoff(&self) -> Result<()> {
        match *self.retry_after.lock() {
            Some(at) if Instant::now() < at => Err(Error::UpstreamUnavailable("redis in backoff".into())),
            _ => Ok(()),
        }
    }

    /// Run `op` on the shared connection, dialing if needed. Any error drops the
    /// connection and starts the backoff window.
    fn with_conn<T>(&self, op: impl FnOnce(&mut Connection) -> redis::RedisResult<T>) -> Result<T> {
        self.check_backoff()?;
        let mut guard = self.conn.lock();
        // Callers queued behind a failed dial must not redial.
        self.check_backoff()?;
        let result = match guard.as_mut() {
            Some(conn) => op(conn),
            None => self.connect().and_then(|mut conn| {
                let out = op(&mut conn);
                *guard = Some(conn);
                out
            }),
        };
        match result {
            Ok(v) => {
                *self.retry_after.lock() = None;
                Ok(v)
            }
            Err(e) => {
                *guard = None;
                *self.retry_after.lock() = Some(Instant::now() + self.backoff);
                debug!(error = %e, "redis call failed");
                Err(Error::UpstreamUnavailable(e.to_string()))
            }
        }
    }
}

fn is_unreachable(e: &RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

fn ttl_millis(ttl: Duration) -> u64 { (ttl.as_millis() as u64).max(1) }

impl RemoteStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.key(key);
        self.with_conn(|c| redis::cmd("GET").arg(&key).query(c))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let key = self.key(key);
        self.with_conn(|c| redis::cmd("SET").arg(&key).arg(value).arg("PX").arg(ttl_millis(ttl)).query(c))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let key = self.key(key);
        let removed: i64 = self.with_conn(|c| redis::cmd("DEL").arg(&key).query(c))?;
        Ok(removed > 0)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let key = self.key(key);
        let n: i64 = self.with_conn(|c| redis::cmd("EXISTS").arg(&key).query(c))?;
        Ok(n > 0)
    }

    fn clear(&self, pattern: &str) -> Result<usize> {
        let pattern = self.key(pattern);
        self.with_conn(|c| {
            let mut cursor: u64 = 0;
            let mut removed = 0usize;
            loop {
                let (next, keys): (u64, Vec<String>) =
                    redis::cmd("SCAN").arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(SCAN_BATCH).query(c)?;
                if !keys.is_empty() {
                    let n: i64 = redis::cmd("DEL").arg(&keys).query(c)?;
                    removed += n.max(0) as usize;
                }
                if next == 0 { break; }
                cursor = next;
            }
            Ok(removed)
        })
    }

    fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<Option<i64>> {
        let key = self.key(key);
        self.with_conn(|c| {
            match redis::cmd("INCRBY").arg(&key).arg(amount).query::<i64>(c) {
                Ok(value) => {
                    if value == amount {
                        redis::cmd("PEXPIRE").arg(&key).arg(ttl_millis(ttl)).query::<()>(c)?;
                    }
                    Ok(Some(value))
                }
                // A non-integer value is a data problem, not an outage.
                Err(e) if !is_unreachable(&e) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn ping(&self) -> Result<()> {
        let _: String = self.with_conn(|c| redis::cmd("PING").query(c))?;
        Ok(())
    }
}
