//! Shared application state, handed to every handler behind `State<AppState>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use gatehouse::cache::{PromptCache, ResponseCache};
use gatehouse::config::Config;
use gatehouse::credential::CredentialPool;
use gatehouse::executor::Executor;
use gatehouse::selector::Selector;

/// Everything a request handler needs, cloned cheaply (every field is an
/// `Arc` or `Copy`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<CredentialPool>,
    pub selector: Arc<Selector>,
    pub executor: Arc<Executor>,
    pub response_cache: Arc<ResponseCache>,
    pub prompt_cache: Arc<PromptCache>,
    pub activity: Arc<ActivityTracker>,
}

/// Tracks the last request timestamp for the keep-alive idle reaper,
/// generalizing the teacher's `LifecycleManager::record_activity` /
/// `is_idle_timeout_exceeded` pair without the cloud hydrate/dehydrate steps
/// this system has no use for.
pub struct ActivityTracker {
    last_activity: AtomicI64,
    now: fn() -> i64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::with_clock(default_now)
    }

    pub fn with_clock(now: fn() -> i64) -> Self {
        Self {
            last_activity: AtomicI64::new(now()),
            now,
        }
    }

    pub fn record_activity(&self) {
        self.last_activity.store((self.now)(), Ordering::SeqCst);
    }

    pub fn is_idle_timeout_exceeded(&self, idle_secs: u64) -> bool {
        if idle_secs == 0 {
            return false;
        }
        let elapsed = (self.now)() - self.last_activity.load(Ordering::SeqCst);
        elapsed >= idle_secs as i64
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn default_now() -> i64 {
    chrono::Utc::now().timestamp()
}
