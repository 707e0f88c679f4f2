//! C2/C3: in-memory response and prompt caches with LRU+TTL eviction and
//! atomic on-disk persistence.

mod lru;
mod persist;
pub mod prompt;
pub mod response;
mod types;

pub use prompt::{CachedPrompt, PromptCache, PromptCacheConfig, WarmReport};
pub use response::{CachedResponse, ResponseCache, ResponseCacheConfig};
pub use types::{CacheError, CacheResult, CacheStats, matches_any_exclude, pattern_matches};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Spawns the background sweep + persist tasks for a response cache,
/// matching the teacher's ticker-driven-task idiom (one task per concern,
/// cooperatively cancelled via a shared token).
pub fn spawn_response_cache_tasks(
    cache: Arc<ResponseCache>,
    sweep_interval: Duration,
    persist_interval: Duration,
    shutdown: CancellationToken,
) {
    let sweep_cache = Arc::clone(&cache);
    let sweep_token = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let n = sweep_cache.sweep_expired();
                    if n > 0 {
                        debug!(evicted = n, "response cache TTL sweep");
                    }
                }
                _ = sweep_token.cancelled() => break,
            }
        }
    });

    let persist_cache = Arc::clone(&cache);
    let persist_token = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(persist_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = persist_cache.save() {
                        warn!(error = %e, "response cache persist failed, continuing in-memory");
                    }
                }
                _ = persist_token.cancelled() => {
                    if let Err(e) = persist_cache.save() {
                        warn!(error = %e, "response cache final save failed");
                    }
                    break;
                }
            }
        }
    });
}

/// Spawns the background sweep + persist tasks for a prompt cache.
pub fn spawn_prompt_cache_tasks(
    cache: Arc<PromptCache>,
    sweep_interval: Duration,
    persist_interval: Duration,
    shutdown: CancellationToken,
) {
    let sweep_cache = Arc::clone(&cache);
    let sweep_token = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let n = sweep_cache.sweep_expired();
                    if n > 0 {
                        debug!(evicted = n, "prompt cache TTL sweep");
                    }
                }
                _ = sweep_token.cancelled() => break,
            }
        }
    });

    let persist_cache = Arc::clone(&cache);
    let persist_token = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(persist_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = persist_cache.save() {
                        warn!(error = %e, "prompt cache persist failed, continuing in-memory");
                    }
                }
                _ = persist_token.cancelled() => {
                    if let Err(e) = persist_cache.save() {
                        warn!(error = %e, "prompt cache final save failed");
                    }
                    break;
                }
            }
        }
    });
}
