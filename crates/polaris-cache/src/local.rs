//! Process-local fallback tier: a bounded map with per-key expiry.
//!
//! Expired entries are treated as absent on read and removed right there.
//! When full, inserting a new key evicts the entry inserted earliest
//! (insertion order, not access order). Overwriting a key re-inserts it.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use glob::Pattern;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    seq: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool { now >= self.expires_at }
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<String, CacheEntry>,
    /// Insertion sequence -> key; the first entry is the oldest.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Entries {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.by_key.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&mut CacheEntry> {
        if self.by_key.get(key).is_some_and(|e| e.is_expired(now)) {
            self.remove(key);
        }
        self.by_key.get_mut(key)
    }

    fn insert(&mut self, capacity: usize, key: &str, value: Vec<u8>, now: Instant, ttl: Duration) -> Option<String> {
        let mut evicted = None;
        if self.remove(key).is_none() && self.by_key.len() >= capacity {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.by_key.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.to_string());
        self.by_key.insert(
            key.to_string(),
            CacheEntry { key: key.to_string(), value, inserted_at: now, expires_at: now + ttl, seq },
        );
        evicted
    }
}

pub struct LocalStore {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl LocalStore {
    pub fn new(capacity: usize) -> Self { Self { entries: Mutex::new(Entries::default()), capacity: capacity.max(1) } }

    pub fn capacity(&self) -> usize { self.capacity }

    /// Physical entry count, expired ones included until they are purged.
    pub fn len(&self) -> usize { self.entries.lock().by_key.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.entries.lock().live(key, now).map(|e| e.value.clone())
    }

    pub fn exists(&self, key: &str) -> bool { self.entries.lock().live(key, Instant::now()).is_some() }

    /// Returns the key evicted to make room, if any.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Option<String> {
        let now = Instant::now();
        self.entries.lock().insert(self.capacity, key, value, now, ttl)
    }

    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.remove(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Remove keys matching `pattern`, or everything when `None`.
    pub fn clear(&self, pattern: Option<&Pattern>) -> usize {
        let mut entries = self.entries.lock();
        let Some(pattern) = pattern else {
            let n = entries.by_key.len();
            *entries = Entries { next_seq: entries.next_seq, ..Default::default() };
            return n;
        };
        let doomed: Vec<String> = entries.by_key.keys().filter(|k| pattern.matches(k)).cloned().collect();
        for key in &doomed { entries.remove(key); }
        doomed.len()
    }

    /// Add `amount` to an integer value, creating it with `ttl` when absent.
    /// `None` when the stored value is not an integer. The expiry of an
    /// existing entry is kept.
    pub fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Option<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.live(key, now) {
            let current: i64 = serde_json::from_slice(&entry.value).ok()?;
            let next = current.checked_add(amount)?;
            entry.value = serde_json::to_vec(&next).ok()?;
            return Some(next);
        }
        let value = serde_json::to_vec(&amount).ok()?;
        entries.insert(self.capacity, key, value, now, ttl);
        Some(amount)
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries.by_key.values().filter(|e| e.is_expired(now)).map(|e| e.key.clone()).collect();
        for key in &expired { entries.remove(key); }
        expired.len()
    }
}
