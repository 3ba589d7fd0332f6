//! polaris-cache
//!
//! Two-tier cache: an optional shared remote tier tried first on every call,
//! and a bounded process-local tier used whenever the remote one is missing or
//! unreachable. Remote failures never reach callers; they are logged and the
//! call is served locally.
//!
//! Values are stored as JSON bytes, so integers written by `set` stay
//! compatible with `increment` on both tiers.

pub mod local;
pub mod remote;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use polaris_core::config::CacheSettings;
use polaris_core::error::{Error, Result};
use polaris_core::types::HealthStatus;

pub use local::{CacheEntry, LocalStore};
pub use remote::{RedisStore, RemoteStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub operations: u64,
    pub hit_rate: f64,
    pub local_entries: usize,
    pub local_capacity: usize,
    pub remote_configured: bool,
    pub remote_available: bool,
}

pub struct Cache {
    remote: Option<Box<dyn RemoteStore>>,
    local: LocalStore,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    operations: AtomicU64,
    remote_down: AtomicBool,
}

impl Cache {
    /// Local tier only.
    pub fn new(local_capacity: usize, default_ttl: Duration) -> Self {
        Self {
            remote: None,
            local: LocalStore::new(local_capacity),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            remote_down: AtomicBool::new(false),
        }
    }

    pub fn with_remote(mut self, remote: Box<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        let cache = Self::new(settings.local_capacity, Duration::from_secs(settings.default_ttl_secs));
        match settings.redis_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                let store = RedisStore::new(
                    url,
                    &settings.namespace,
                    Duration::from_millis(settings.timeout_ms),
                    Duration::from_millis(settings.reconnect_backoff_ms),
                )?;
                info!(namespace = %settings.namespace, "cache: remote tier configured");
                Ok(cache.with_remote(Box::new(store)))
            }
            None => {
                info!(capacity = settings.local_capacity, "cache: local tier only");
                Ok(cache)
            }
        }
    }

    pub fn default_ttl(&self) -> Duration { self.default_ttl }

    /// Try the remote tier. `None` means "not configured or unreachable; use
    /// the local tier for this call".
    fn try_remote<T>(&self, op: &str, call: impl FnOnce(&dyn RemoteStore) -> Result<T>) -> Option<T> {
        let remote = self.remote.as_deref()?;
        match call(remote) {
            Ok(v) => {
                if self.remote_down.swap(false, Ordering::Relaxed) { info!("cache: remote tier recovered"); }
                Some(v)
            }
            Err(e) => {
                if !self.remote_down.swap(true, Ordering::Relaxed) {
                    warn!(error = %e, op, "cache: remote tier unavailable; using local tier");
                } else {
                    debug!(error = %e, op, "cache: remote tier still unavailable");
                }
                None
            }
        }
    }

    fn record(&self, hit: bool) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if hit { self.hits.fetch_add(1, Ordering::Relaxed); } else { self.misses.fetch_add(1, Ordering::Relaxed); }
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let value = match self.try_remote("get", |r| r.get(key)) {
            Some(v) => v,
            None => self.local.get(key),
        };
        self.record(value.is_some());
        value
    }

    pub fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let ttl = ttl.unwrap_or(self.default_ttl);
        if self.try_remote("set", |r| r.set(key, &value, ttl)).is_some() { return true; }
        if let Some(evicted) = self.local.set(key, value, ttl) {
            debug!(key = %evicted, "cache: evicted oldest local entry");
        }
        true
    }

    /// Absent when missing, expired, or not decodable as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_raw(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key, error = %e, "cache: undecodable value");
                None
            }
        }
    }

    /// `ttl: None` uses the default TTL. Returns false only if `value` cannot be
    /// serialized.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set_raw(key, bytes, ttl),
            Err(e) => {
                warn!(key, error = %e, "cache: value not serializable");
                false
            }
        }
    }

    /// Removes `key` from every reachable tier.
    pub fn delete(&self, key: &str) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let remote = self.try_remote("delete", |r| r.delete(key)).unwrap_or(false);
        let local = self.local.delete(key);
        remote || local
    }

    pub fn exists(&self, key: &str) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.try_remote("exists", |r| r.exists(key)) {
            Some(found) => found,
            None => self.local.exists(key),
        }
    }

    /// Glob-style bulk removal (`*`, `?`, `[...]`) from every reachable tier;
    /// `None` flushes everything. False only for an invalid pattern.
    pub fn clear(&self, pattern: Option<&str>) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let compiled = match pattern.map(Pattern::new).transpose() {
            Ok(p) => p,
            Err(e) => {
                warn!(pattern = pattern.unwrap_or_default(), error = %e, "cache: invalid clear pattern");
                return false;
            }
        };
        let remote = self.try_remote("clear", |r| r.clear(pattern.unwrap_or("*")));
        let local = self.local.clear(compiled.as_ref());
        debug!(pattern = pattern.unwrap_or("*"), remote = remote.unwrap_or(0), local, "cache cleared");
        true
    }

    /// Add `amount` to an integer counter, creating it with the default TTL.
    /// Absent when the stored value is not an integer.
    pub fn increment(&self, key: &str, amount: i64) -> Option<i64> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let ttl = self.default_ttl;
        match self.try_remote("increment", |r| r.increment(key, amount, ttl)) {
            Some(v) => v,
            None => self.local.increment(key, amount, ttl),
        }
    }

    /// Values for the keys that are present; missing keys are left out.
    pub fn get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> HashMap<String, T> {
        keys.iter().filter_map(|k| self.get(k).map(|v| (k.to_string(), v))).collect()
    }

    pub fn set_many<T: Serialize>(&self, entries: &[(&str, T)], ttl: Option<Duration>) -> bool {
        entries.iter().fold(true, |ok, (k, v)| self.set(k, v, ttl) && ok)
    }

    /// Purge expired local entries. The remote tier expires keys on its own.
    pub fn purge_expired(&self) -> usize { self.local.purge_expired() }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            operations: self.operations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            local_entries: self.local.len(),
            local_capacity: self.local.capacity(),
            remote_configured: self.remote.is_some(),
            remote_available: self.remote.is_some() && !self.remote_down.load(Ordering::Relaxed),
        }
    }

    /// `Degraded` when a remote tier is configured but does not answer a ping.
    pub fn health(&self) -> HealthStatus {
        match &self.remote {
            None => HealthStatus::Healthy,
            Some(_) => match self.try_remote("ping", |r| r.ping()) {
                Some(()) => HealthStatus::Healthy,
                None => HealthStatus::Degraded,
            },
        }
    }
}

/// Purge expired local entries every `every` until the handle is aborted.
/// Must be called from within a tokio runtime.
pub fn spawn_expiry_sweeper(cache: Arc<Cache>, every: Duration) -> Result<JoinHandle<()>> {
    if every.is_zero() { return Err(Error::InvalidConfig("sweep interval must be > 0".into())); }
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| Error::InvalidConfig(format!("expiry sweeper needs a tokio runtime: {e}")))?;
    Ok(handle.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 { debug!(purged, "cache: expired entries purged"); }
        }
    }))
}
