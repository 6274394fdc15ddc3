//! # Cache Manager
//!
//! Memory-resident key → value cache with per-entry TTL and regex-based
//! invalidation. Expired entries are never returned; they are evicted lazily
//! on the next read.
//!
//! Keys are built by [`generate_key`] from an endpoint and its
//! query parameters, serialized with sorted keys so the same logical request
//! always lands on the same entry.

use log::debug;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::{Result, TrekRouteError};
use crate::lock_unpoisoned;

/// Separator between the endpoint and the serialized parameters.
pub const KEY_SEPARATOR: &str = "::";

/// Build the canonical key `"{endpoint}::{params as JSON, keys sorted}"`.
///
/// `params` is usually a JSON object; any other value (or `null`) is
/// treated as an empty parameter set.
///
/// # Example
/// ```
/// use serde_json::json;
/// use trek_route::cache::generate_key;
///
/// let a = generate_key("treks", &json!({"b": 1, "a": 2}));
/// let b = generate_key("treks", &json!({"a": 2, "b": 1}));
/// assert_eq!(a, b);
/// assert_eq!(a, r#"treks::{"a":2,"b":1}"#);
/// ```
pub fn generate_key(endpoint: &str, params: &Value) -> String {
    let sorted: BTreeMap<&str, &Value> = match params {
        Value::Object(map) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        _ => BTreeMap::new(),
    };
    // Serializing a map of &str → &Value cannot fail.
    let encoded = serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string());
    format!("{}{}{}", endpoint, KEY_SEPARATOR, encoded)
}

/// Compile an invalidation pattern.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| TrekRouteError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub entries: Vec<String>,
}

/// TTL cache shared between tasks.
///
/// All operations are synchronous; the internal lock is never held across an
/// await point. Values are returned as clones, so callers cannot mutate what
/// is stored.
#[derive(Debug)]
pub struct CacheManager<V = Value> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    /// Bumped on every invalidation, under the entries lock.
    epoch: AtomicU64,
}

impl<V: Clone> CacheManager<V> {
    /// Create a cache with the default 5 minute TTL.
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        Self::with_default_ttl(config.default_ttl())
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a live entry, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = lock_unpoisoned(&self.entries);
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                debug!("[CacheManager] Evicting expired entry {}", key);
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store a value, overwriting any existing entry. `None` uses the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        lock_unpoisoned(&self.entries).insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Invalidation counter. A writer that read it before fetching can use
    /// [`set_if_unchanged`](Self::set_if_unchanged) to avoid storing a value
    /// that an invalidation made stale while it was in flight.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// [`set`](Self::set), unless any invalidation happened since `epoch` was
    /// read. Returns whether the value was stored.
    pub fn set_if_unchanged(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        epoch: u64,
    ) -> bool {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut entries = lock_unpoisoned(&self.entries);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
            },
        );
        true
    }

    /// Equivalent to `get(key).is_some()`, including the lazy eviction.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Time since a live entry was written.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let entries = lock_unpoisoned(&self.entries);
        let now = Instant::now();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| now.duration_since(entry.created_at))
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut entries = lock_unpoisoned(&self.entries);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        entries.remove(key).map(|e| e.value)
    }

    /// Clear all entries.
    pub fn clear(&self) {
        let mut entries = lock_unpoisoned(&self.entries);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    /// Remove every entry whose key matches the regular expression `pattern`.
    ///
    /// Returns the number of entries removed.
    pub fn clear_pattern(&self, pattern: &str) -> Result<usize> {
        Ok(self.clear_matching(&compile_pattern(pattern)?))
    }

    /// [`clear_pattern`](Self::clear_pattern) with an already compiled regex.
    pub fn clear_matching(&self, regex: &Regex) -> usize {
        let mut entries = lock_unpoisoned(&self.entries);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        entries.retain(|key, _| !regex.is_match(key));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(
                "[CacheManager] Invalidated {} entries matching '{}'",
                removed,
                regex.as_str()
            );
        }
        removed
    }

    /// Drop every expired entry eagerly. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock_unpoisoned(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until evicted.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = lock_unpoisoned(&self.entries);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: keys.len(),
            entries: keys,
        }
    }
}

impl<V: Clone> Default for CacheManager<V> {
    fn default() -> Self {
        Self::new()
    }
}
