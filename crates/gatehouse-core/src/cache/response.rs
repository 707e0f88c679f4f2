//! C2: LRU+TTL cache of complete upstream responses, keyed by `(model, payload)`.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::hashing;

use super::lru::IndexedLru;
use super::persist::{load_atomic, save_atomic};
use super::types::{CacheResult, CacheStats, matches_any_exclude};

/// A single cached response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub body: Vec<u8>,
    pub content_type: String,
    pub status: u16,
    pub model: String,
    pub created_at: i64,
    pub hit_count: u64,
}

/// Configuration governing admission and eviction.
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    /// `0` disables byte-based eviction.
    pub max_bytes: u64,
    pub ttl: Duration,
    pub exclude_models: Vec<String>,
    pub persist_path: Option<PathBuf>,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 10_000,
            max_bytes: 0,
            ttl: Duration::from_secs(3600),
            exclude_models: Vec::new(),
            persist_path: None,
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    entries: Vec<(String, CachedResponse)>,
    order: Vec<String>,
    stats: CacheStats,
}

struct Inner {
    entries: std::collections::HashMap<String, CachedResponse>,
    order: IndexedLru<String>,
    stats: CacheStats,
    total_bytes: u64,
}

/// LRU+TTL store of complete upstream responses.
pub struct ResponseCache {
    config: ResponseCacheConfig,
    inner: RwLock<Inner>,
    now: fn() -> i64,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self::with_clock(config, default_now)
    }

    /// Constructs a cache with an injectable clock, for deterministic TTL
    /// tests (the `_at`-suffixed convention used across the corpus for
    /// time-sensitive caches is collapsed here into one constructor so
    /// production code never has to choose the wrong one).
    pub fn with_clock(config: ResponseCacheConfig, now: fn() -> i64) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                entries: std::collections::HashMap::new(),
                order: IndexedLru::new(),
                stats: CacheStats::default(),
                total_bytes: 0,
            }),
            now,
        }
    }

    pub fn key(model: &str, payload: &[u8]) -> String {
        hashing::key(model, payload)
    }

    /// Looks up a cached response for `(model, payload)`.
    pub fn get(&self, model: &str, payload: &[u8]) -> Option<CachedResponse> {
        let key = Self::key(model, payload);
        let mut inner = self.inner.write();
        let now = (self.now)();

        let expired = inner
            .entries
            .get(&key)
            .map(|e| now - e.created_at > self.config.ttl.as_secs() as i64)
            .unwrap_or(false);

        if expired {
            Self::evict_key(&mut inner, &key);
            inner.stats.record_miss();
            inner.stats.record_eviction();
            return None;
        }

        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.hit_count += 1;
                inner.order.touch(&key);
                inner.stats.record_hit();
                Some(entry.clone())
            }
            None => {
                inner.stats.record_miss();
                None
            }
        }
    }

    /// Stores a response if the admission rules hold.
    pub fn set(&self, model: &str, payload: &[u8], body: Vec<u8>, content_type: &str, status: u16) {
        if !self.config.enabled {
            return;
        }
        if !(200..300).contains(&status) {
            return;
        }
        if body.is_empty() {
            return;
        }
        if matches_any_exclude(&self.config.exclude_models, model) {
            return;
        }

        let key = Self::key(model, payload);
        let entry_bytes = body.len() as u64;
        let now = (self.now)();

        let mut inner = self.inner.write();
        if inner.entries.contains_key(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(
                inner.entries.get(&key).map(|e| e.body.len() as u64).unwrap_or(0),
            );
        }

        inner.entries.insert(
            key.clone(),
            CachedResponse {
                body,
                content_type: content_type.to_string(),
                status,
                model: model.to_string(),
                created_at: now,
                hit_count: 0,
            },
        );
        inner.order.touch(&key);
        if !inner.order.contains(&key) {
            inner.order.push_tail(key.clone());
        }
        inner.total_bytes += entry_bytes;
        inner.stats.unique += 1;
        inner.stats.size = inner.order.len() as u64;

        while inner.order.len() > self.config.max_size
            || (self.config.max_bytes > 0 && inner.total_bytes > self.config.max_bytes)
        {
            let Some(head) = inner.order.peek_head().cloned() else {
                break;
            };
            // Never evict the entry we just inserted if it's alone and over budget.
            if inner.order.len() <= 1 {
                break;
            }
            Self::evict_key(&mut inner, &head);
            inner.stats.record_eviction();
        }
        inner.stats.size = inner.order.len() as u64;
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
        inner.total_bytes = 0;
        inner.stats.size = 0;
    }

    pub fn get_stats(&self) -> CacheStats {
        self.inner.read().stats.clone()
    }

    /// Evicts every entry older than the TTL. Returns the number evicted.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.write();
        let now = (self.now)();
        let ttl_secs = self.config.ttl.as_secs() as i64;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now - e.created_at > ttl_secs)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            Self::evict_key(&mut inner, key);
            inner.stats.record_eviction();
        }
        inner.stats.size = inner.order.len() as u64;
        expired.len()
    }

    fn evict_key(inner: &mut Inner, key: &str) {
        if let Some(entry) = inner.entries.remove(key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.body.len() as u64);
        }
        inner.order.remove(&key.to_string());
    }

    /// Writes a snapshot to the configured persist path, if any.
    pub fn save(&self) -> CacheResult<()> {
        let Some(path) = &self.config.persist_path else {
            return Ok(());
        };
        let inner = self.inner.read();
        let snapshot = Snapshot {
            entries: inner
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            order: inner.order.iter().cloned().collect(),
            stats: inner.stats.clone(),
        };
        drop(inner);
        save_atomic(path, &snapshot)
    }

    /// Loads a snapshot from the configured persist path, dropping expired
    /// or over-capacity entries as it rebuilds the order list.
    pub fn load(&self) -> CacheResult<()> {
        let Some(path) = &self.config.persist_path else {
            return Ok(());
        };
        let Some(snapshot): Option<Snapshot> = load_atomic(path)? else {
            return Ok(());
        };

        let now = (self.now)();
        let ttl_secs = self.config.ttl.as_secs() as i64;
        let mut by_key: std::collections::HashMap<String, CachedResponse> =
            snapshot.entries.into_iter().collect();

        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
        inner.total_bytes = 0;

        for key in snapshot.order {
            let Some(entry) = by_key.remove(&key) else {
                continue;
            };
            if now - entry.created_at > ttl_secs {
                continue;
            }
            if inner.order.len() >= self.config.max_size {
                continue;
            }
            inner.total_bytes += entry.body.len() as u64;
            inner.order.push_tail(key.clone());
            inner.entries.insert(key, entry);
        }
        inner.stats = snapshot.stats;
        inner.stats.size = inner.order.len() as u64;
        Ok(())
    }
}

fn default_now() -> i64 {
    chrono::Utc::now().timestamp()
}
