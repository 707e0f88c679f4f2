//! C3: LRU+TTL cache of system-prompt hashes with hit counters and warming.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::hashing;

use super::lru::IndexedLru;
use super::persist::{load_atomic, save_atomic};
use super::types::CacheResult;
use super::CacheStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPrompt {
    pub prompt: String,
    pub token_estimate: u64,
    pub created_at: i64,
    pub last_hit: i64,
    pub hit_count: u64,
    pub provider_hits: HashMap<String, u64>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct PromptCacheConfig {
    pub max_size: usize,
    /// `0` disables byte-based eviction/rejection.
    pub max_bytes: u64,
    pub ttl: Duration,
    pub persist_path: Option<PathBuf>,
}

impl Default for PromptCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 5_000,
            max_bytes: 0,
            ttl: Duration::from_secs(3600),
            persist_path: None,
        }
    }
}

/// Result of a bulk warming call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmReport {
    pub total: usize,
    pub added: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    entries: Vec<(String, CachedPrompt)>,
    order: Vec<String>,
    stats: CacheStats,
}

struct Inner {
    entries: HashMap<String, CachedPrompt>,
    order: IndexedLru<String>,
    stats: CacheStats,
    total_bytes: u64,
}

/// LRU+TTL cache keyed by prompt text hash, with per-provider hit tracking.
pub struct PromptCache {
    config: PromptCacheConfig,
    inner: RwLock<Inner>,
    now: fn() -> i64,
}

impl PromptCache {
    pub fn new(config: PromptCacheConfig) -> Self {
        Self::with_clock(config, default_now)
    }

    pub fn with_clock(config: PromptCacheConfig, now: fn() -> i64) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                order: IndexedLru::new(),
                stats: CacheStats::default(),
                total_bytes: 0,
            }),
            now,
        }
    }

    fn entry_size(prompt: &str, hash: &str) -> u64 {
        (prompt.len() + hash.len()) as u64
    }

    /// Caches a system prompt, returning its hash and whether this call
    /// created the entry (a repeat of an existing prompt still counts as a
    /// hit against `provider`, but `is_new` is `false`).
    pub fn cache_system_prompt(&self, text: &str, provider: &str) -> (String, bool) {
        let hash = hashing::prompt_hash(text);
        let now = (self.now)();
        let size = Self::entry_size(text, &hash);

        let mut inner = self.inner.write();

        if let Some(entry) = inner.entries.get_mut(&hash) {
            entry.last_hit = now;
            entry.hit_count += 1;
            *entry.provider_hits.entry(provider.to_string()).or_insert(0) += 1;
            inner.order.touch(&hash);
            let tokens = entry.token_estimate;
            inner.stats.estimated_tokens_saved += tokens;
            *inner.stats.top_providers.entry(provider.to_string()).or_insert(0) += 1;
            inner.stats.record_hit();
            return (hash, false);
        }

        if self.config.max_bytes > 0 && size > self.config.max_bytes {
            // Too large to ever fit: rejected without evicting others.
            inner.stats.record_miss();
            return (hash, false);
        }

        let mut provider_hits = HashMap::new();
        provider_hits.insert(provider.to_string(), 1);
        inner.entries.insert(
            hash.clone(),
            CachedPrompt {
                prompt: text.to_string(),
                token_estimate: hashing::estimate_tokens(text),
                created_at: now,
                last_hit: now,
                hit_count: 0,
                provider_hits,
                size_bytes: size,
            },
        );
        inner.order.push_tail(hash.clone());
        inner.total_bytes += size;
        inner.stats.unique += 1;
        inner.stats.record_miss();
        inner.stats.size = inner.order.len() as u64;

        while inner.order.len() > self.config.max_size
            || (self.config.max_bytes > 0 && inner.total_bytes > self.config.max_bytes)
        {
            if inner.order.len() <= 1 {
                break;
            }
            let Some(head) = inner.order.peek_head().cloned() else {
                break;
            };
            Self::evict_key(&mut inner, &head);
            inner.stats.record_eviction();
        }
        inner.stats.size = inner.order.len() as u64;

        (hash, true)
    }

    /// Looks up a prompt by its text without mutating any state.
    pub fn lookup_by_prompt(&self, text: &str) -> (String, u64, bool) {
        let hash = hashing::prompt_hash(text);
        let inner = self.inner.read();
        match inner.entries.get(&hash) {
            Some(entry) => {
                let now = (self.now)();
                let ttl_secs = self.config.ttl.as_secs() as i64;
                if now - entry.created_at > ttl_secs {
                    (hash, 0, false)
                } else {
                    (hash, entry.hit_count, true)
                }
            }
            None => (hash, 0, false),
        }
    }

    /// Returns up to `n` entries ordered by hit count descending.
    pub fn top_prompts(&self, n: usize) -> Vec<CachedPrompt> {
        let inner = self.inner.read();
        let mut entries: Vec<CachedPrompt> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
        entries.truncate(n);
        entries
    }

    /// Bulk-inserts prompts, reporting how many were newly added vs skipped
    /// (already present) vs rejected (oversized for `max_bytes`).
    pub fn warm_cache(&self, items: &[(String, String)]) -> WarmReport {
        let mut report = WarmReport {
            total: items.len(),
            ..Default::default()
        };
        for (prompt, provider) in items {
            let (_, hash_existed_before) = {
                let hash = hashing::prompt_hash(prompt);
                let existed = self.inner.read().entries.contains_key(&hash);
                (hash, existed)
            };
            if hash_existed_before {
                report.skipped += 1;
                self.cache_system_prompt(prompt, provider);
                continue;
            }
            let size = Self::entry_size(prompt, &hashing::prompt_hash(prompt));
            if self.config.max_bytes > 0 && size > self.config.max_bytes {
                report.errors += 1;
                continue;
            }
            self.cache_system_prompt(prompt, provider);
            report.added += 1;
        }
        report
    }

    pub fn get_stats(&self) -> CacheStats {
        self.inner.read().stats.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
        inner.total_bytes = 0;
        inner.stats.size = 0;
    }

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
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
        }
        inner.order.remove(&key.to_string());
    }

    pub fn save(&self) -> CacheResult<()> {
        let Some(path) = &self.config.persist_path else {
            return Ok(());
        };
        let inner = self.inner.read();
        let snapshot = Snapshot {
            entries: inner.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            order: inner.order.iter().cloned().collect(),
            stats: inner.stats.clone(),
        };
        drop(inner);
        save_atomic(path, &snapshot)
    }

    pub fn load(&self) -> CacheResult<()> {
        let Some(path) = &self.config.persist_path else {
            return Ok(());
        };
        let Some(snapshot): Option<Snapshot> = load_atomic(path)? else {
            return Ok(());
        };

        let now = (self.now)();
        let ttl_secs = self.config.ttl.as_secs() as i64;
        let mut by_key: HashMap<String, CachedPrompt> = snapshot.entries.into_iter().collect();

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
            inner.total_bytes += entry.size_bytes;
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
