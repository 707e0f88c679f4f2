//! C4: the pool of upstream credentials per provider.

mod store;
pub mod types;

pub use types::{AuthMaterial, Credential, CredentialError, CredentialResult};

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::info;

/// Set of credentials per provider, with state (available/cooling/disabled)
/// and priority. Mutations are atomic (single write lock per provider) and
/// immediately visible to the next `list` call; the pool never reorders the
/// underlying storage, ordering is derived per-call by `list_for_selection`.
pub struct CredentialPool {
    dir: Option<PathBuf>,
    providers: RwLock<HashMap<String, RwLock<Vec<Credential>>>>,
    now: fn() -> i64,
}

impl CredentialPool {
    pub fn new() -> Self {
        Self::with_clock(default_now)
    }

    pub fn with_clock(now: fn() -> i64) -> Self {
        Self {
            dir: None,
            providers: RwLock::new(HashMap::new()),
            now,
        }
    }

    /// Loads every credential file under `dir`, grouping by provider.
    pub fn load_from_dir(dir: PathBuf) -> CredentialResult<Self> {
        let pool = Self {
            dir: Some(dir.clone()),
            providers: RwLock::new(HashMap::new()),
            now: default_now,
        };
        for cred in store::load_all(&dir)? {
            pool.insert_memory(cred);
        }
        Ok(pool)
    }

    fn insert_memory(&self, cred: Credential) {
        let mut providers = self.providers.write();
        providers
            .entry(cred.provider.clone())
            .or_insert_with(|| RwLock::new(Vec::new()))
            .write()
            .push(cred);
    }

    fn persist(&self, cred: &Credential) {
        if let Some(dir) = &self.dir {
            if let Err(e) = store::save_one(dir, cred) {
                tracing::warn!(error = %e, credential = %cred.id, "failed to persist credential");
            }
        }
    }

    /// Returns a copy of the credential list for `provider`, newest-priority
    /// first. Ties are broken by ascending `last_used` (round-robin).
    pub fn list(&self, provider: &str) -> Vec<Credential> {
        let providers = self.providers.read();
        let Some(lock) = providers.get(provider) else {
            return Vec::new();
        };
        let mut list = lock.read().clone();
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.last_used.cmp(&b.last_used)));
        list
    }

    /// Returns credentials ordered for selection: non-disabled and
    /// non-cooling first (by priority desc, then last-used asc), then the
    /// rest (for "soft-empty" provider revisiting by the selector).
    pub fn list_for_selection(&self, provider: &str) -> Vec<Credential> {
        let now = (self.now)();
        let providers = self.providers.read();
        let Some(lock) = providers.get(provider) else {
            return Vec::new();
        };
        let mut list = lock.read().clone();
        list.sort_by(|a, b| {
            let a_ready = !a.disabled && !a.is_cooling(now);
            let b_ready = !b.disabled && !b.is_cooling(now);
            b_ready
                .cmp(&a_ready)
                .then(b.priority.cmp(&a.priority))
                .then(a.last_used.cmp(&b.last_used))
        });
        list
    }

    /// Every provider name with at least one credential, for the management
    /// inventory endpoint.
    pub fn providers(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Every credential across every provider, for the management inventory
    /// endpoint.
    pub fn list_all(&self) -> Vec<Credential> {
        let providers = self.providers.read();
        providers.values().flat_map(|lock| lock.read().clone()).collect()
    }

    pub fn add(&self, cred: Credential) {
        self.persist(&cred);
        self.insert_memory(cred);
    }

    pub fn set_priority(&self, id: &str, priority: i32) -> CredentialResult<()> {
        self.mutate(id, |c| c.priority = priority)
    }

    /// Resets cooldown for one credential (`id`) or every credential
    /// (`id == ""`). Atomically clears both `cooling_until` and `disabled`
    /// together, resolving the ambiguity between the two unavailability
    /// signals under concurrent reset.
    pub fn reset_cooldown(&self, id: &str) -> CredentialResult<()> {
        if id.is_empty() {
            let providers = self.providers.read();
            for lock in providers.values() {
                let mut list = lock.write();
                for cred in list.iter_mut() {
                    cred.cooling_until = 0;
                    cred.disabled = false;
                    self.persist(cred);
                }
            }
            return Ok(());
        }
        self.mutate(id, |c| {
            c.cooling_until = 0;
            c.disabled = false;
        })
    }

    pub fn set_cooling_until(&self, id: &str, until: i64) -> CredentialResult<()> {
        self.mutate(id, |c| {
            // Cooling-until is monotonic upward until reset.
            if until > c.cooling_until {
                c.cooling_until = until;
            }
        })
    }

    pub fn record_error(&self, id: &str, summary: &str) -> CredentialResult<()> {
        self.mutate(id, |c| c.last_error = Some(summary.to_string()))
    }

    pub fn record_used(&self, id: &str, model: &str) -> CredentialResult<()> {
        let now = (self.now)();
        self.mutate(id, |c| {
            c.last_used = now;
            *c.usage.entry(model.to_string()).or_insert(0) += 1;
        })
    }

    pub fn disable(&self, id: &str) -> CredentialResult<()> {
        self.mutate(id, |c| c.disabled = true)
    }

    pub fn enable(&self, id: &str) -> CredentialResult<()> {
        self.mutate(id, |c| c.disabled = false)
    }

    pub fn delete(&self, id: &str) -> CredentialResult<()> {
        let providers = self.providers.read();
        for lock in providers.values() {
            let mut list = lock.write();
            if let Some(pos) = list.iter().position(|c| c.id == id) {
                list.remove(pos);
                drop(list);
                if let Some(dir) = &self.dir {
                    store::delete_one(dir, id)?;
                }
                info!(credential = id, "credential deleted");
                return Ok(());
            }
        }
        Err(CredentialError::NotFound(id.to_string()))
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut Credential)) -> CredentialResult<()> {
        let providers = self.providers.read();
        for lock in providers.values() {
            let mut list = lock.write();
            if let Some(cred) = list.iter_mut().find(|c| c.id == id) {
                f(cred);
                self.persist(cred);
                return Ok(());
            }
        }
        Err(CredentialError::NotFound(id.to_string()))
    }
}

impl Default for CredentialPool {
    fn default() -> Self {
        Self::new()
    }
}

fn default_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(id: &str, provider: &str, priority: i32) -> Credential {
        let mut c = Credential::new(id, provider, id, AuthMaterial::ApiKey { key: "sk-x".into() });
        c.priority = priority;
        c
    }

    #[test]
    fn list_for_selection_orders_by_readiness_then_priority() {
        let pool = CredentialPool::new();
        pool.add(cred("low", "claude", 1));
        pool.add(cred("high", "claude", 10));
        pool.set_cooling_until("high", i64::MAX).unwrap();

        let ordered = pool.list_for_selection("claude");
        // "high" is cooling, so "low" (ready) sorts first despite lower priority.
        assert_eq!(ordered[0].id, "low");
    }

    #[test]
    fn reset_cooldown_also_clears_disabled() {
        let pool = CredentialPool::new();
        pool.add(cred("a", "gemini", 5));
        pool.disable("a").unwrap();
        pool.reset_cooldown("a").unwrap();
        let list = pool.list("gemini");
        assert!(!list[0].disabled);
    }

    #[test]
    fn cooling_until_is_monotonic_upward() {
        let pool = CredentialPool::new();
        pool.add(cred("a", "openai-compat", 1));
        pool.set_cooling_until("a", 100).unwrap();
        pool.set_cooling_until("a", 50).unwrap();
        let list = pool.list("openai-compat");
        assert_eq!(list[0].cooling_until, 100);
    }

    #[test]
    fn reset_cooldown_all_clears_every_provider() {
        let pool = CredentialPool::new();
        pool.add(cred("a", "claude", 1));
        pool.add(cred("b", "gemini", 1));
        pool.set_cooling_until("a", 1000).unwrap();
        pool.set_cooling_until("b", 1000).unwrap();
        pool.reset_cooldown("").unwrap();
        assert_eq!(pool.list("claude")[0].cooling_until, 0);
        assert_eq!(pool.list("gemini")[0].cooling_until, 0);
    }

    #[test]
    fn delete_unknown_id_errors() {
        let pool = CredentialPool::new();
        assert!(pool.delete("missing").is_err());
    }
}
