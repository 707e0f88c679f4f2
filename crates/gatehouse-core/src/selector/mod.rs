//! C5: picks a credential, records the selection trace, retries with
//! jittered exponential backoff on classified retryable failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialPool};

/// One attempt recorded before invoking the executor.
#[derive(Debug, Clone)]
pub struct SelectionAttempt {
    pub provider: String,
    pub credential_id: String,
    pub label: String,
    pub masked_account: String,
}

/// Per-request record of every credential tried, in order. Created empty per
/// logical request and never shared across requests, so it needs no lock.
#[derive(Debug, Clone, Default)]
pub struct SelectionTrace {
    pub attempts: Vec<SelectionAttempt>,
}

impl SelectionTrace {
    pub fn push(&mut self, provider: &str, cred: &Credential) {
        self.attempts.push(SelectionAttempt {
            provider: provider.to_string(),
            credential_id: cred.id.clone(),
            label: cred.label.clone(),
            masked_account: cred.masked_account(),
        });
    }

    pub fn last(&self) -> Option<&SelectionAttempt> {
        self.attempts.last()
    }
}

/// How an attempt's outcome should steer the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    NonRetryable,
    RetryThisCredential,
    RetryOtherCredential,
}

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("selection cancelled")]
    Cancelled,
    #[error("{message}")]
    Exhausted { message: String, status: Option<u16> },
}

impl SelectorError {
    /// HTTP status to surface to the client: the last upstream status seen,
    /// or 503 if no upstream was ever reached.
    pub fn http_status(&self) -> u16 {
        match self {
            SelectorError::Cancelled => 499,
            SelectorError::Exhausted { status, .. } => status.unwrap_or(503),
        }
    }
}

pub type SelectorResult<T> = Result<T, SelectorError>;

/// Result of one executor attempt, already classified by the caller.
pub struct AttemptResult<T> {
    pub classification: Classification,
    pub value: Option<T>,
    pub message: String,
    pub status: Option<u16>,
}

impl<T> AttemptResult<T> {
    pub fn success(value: T) -> Self {
        Self {
            classification: Classification::Success,
            value: Some(value),
            message: String::new(),
            status: None,
        }
    }

    pub fn non_retryable(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            classification: Classification::NonRetryable,
            value: None,
            message: message.into(),
            status,
        }
    }

    pub fn retry_this(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            classification: Classification::RetryThisCredential,
            value: None,
            message: message.into(),
            status,
        }
    }

    pub fn retry_other(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            classification: Classification::RetryOtherCredential,
            value: None,
            message: message.into(),
            status,
        }
    }
}

/// Invoked once per attempt by the selector. Implemented by the executor (C7);
/// kept as a trait here so the selector never depends on the executor's
/// upstream HTTP machinery.
#[async_trait]
pub trait Attempt<T: Send>: Send + Sync {
    async fn call(&self, credential: &Credential) -> AttemptResult<T>;
}

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Small cap on same-credential retries for transient errors.
    pub max_attempts_per_credential: u32,
    pub max_retry_interval: Duration,
    /// When false, `RetryOtherCredential` never sets `cooling_until`.
    pub cooldown_enabled: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_credential: 2,
            max_retry_interval: Duration::from_secs(30),
            cooldown_enabled: true,
        }
    }
}

const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// `min(cap, base * 2^(attempt-1))` with +/-20% jitter.
fn backoff_for(attempt: u32, cap: Duration) -> Duration {
    let exp = BASE_BACKOFF.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(cap.as_secs_f64());
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    Duration::from_secs_f64((capped * (1.0 + jitter_frac)).max(0.0))
}

/// Drives the ordered-provider retry loop described in the credential
/// rotation design: try each provider's selectable credentials, backing off
/// on transient failures and rotating (with cooldown) on auth/quota errors.
pub struct Selector {
    pool: Arc<CredentialPool>,
    config: SelectorConfig,
    now: fn() -> i64,
}

impl Selector {
    pub fn new(pool: Arc<CredentialPool>, config: SelectorConfig) -> Self {
        Self::with_clock(pool, config, default_now)
    }

    pub fn with_clock(pool: Arc<CredentialPool>, config: SelectorConfig, now: fn() -> i64) -> Self {
        Self { pool, config, now }
    }

    /// Runs the full retry loop across `providers` (already ordered by the
    /// caller's routing policy for the requested model).
    pub async fn run<T: Send>(
        &self,
        providers: &[String],
        trace: &mut SelectionTrace,
        cancel: &CancellationToken,
        attempt: &(dyn Attempt<T> + Send + Sync),
    ) -> SelectorResult<T> {
        let mut last_message = "no upstream reached".to_string();
        let mut last_status: Option<u16> = None;

        for provider in providers {
            if cancel.is_cancelled() {
                return Err(SelectorError::Cancelled);
            }

            let now = (self.now)();
            let creds = self.pool.list_for_selection(provider);
            let selectable: Vec<Credential> = creds.into_iter().filter(|c| c.is_selectable(now)).collect();
            if selectable.is_empty() {
                debug!(provider = %provider, "provider soft-empty, skipping");
                continue;
            }

            for cred in &selectable {
                for n in 1..=self.config.max_attempts_per_credential {
                    if cancel.is_cancelled() {
                        return Err(SelectorError::Cancelled);
                    }
                    trace.push(provider, cred);
                    debug!(provider = %provider, credential = %cred.id, attempt = n, "selector attempt");

                    let result = attempt.call(cred).await;
                    match result.classification {
                        Classification::Success => {
                            let _ = self.pool.record_used(&cred.id, provider);
                            return Ok(result.value.expect("Success always carries a value"));
                        }
                        Classification::NonRetryable => {
                            return Err(SelectorError::Exhausted {
                                message: result.message,
                                status: result.status,
                            });
                        }
                        Classification::RetryThisCredential => {
                            last_message = result.message;
                            last_status = result.status;
                            if n >= self.config.max_attempts_per_credential {
                                break;
                            }
                            let delay = backoff_for(n, self.config.max_retry_interval);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = cancel.cancelled() => return Err(SelectorError::Cancelled),
                            }
                        }
                        Classification::RetryOtherCredential => {
                            last_message = result.message.clone();
                            last_status = result.status;
                            if self.config.cooldown_enabled {
                                let bump = backoff_for(n, self.config.max_retry_interval).as_secs() as i64;
                                let _ = self.pool.set_cooling_until(&cred.id, now + bump.max(1));
                                let _ = self.pool.record_error(&cred.id, &result.message);
                            }
                            info!(provider = %provider, credential = %cred.id, "rotating to next credential");
                            break;
                        }
                    }
                }
            }
        }

        warn!(message = %last_message, status = ?last_status, "all providers exhausted");
        Err(SelectorError::Exhausted {
            message: last_message,
            status: last_status,
        })
    }
}

fn default_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::AuthMaterial;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cred(id: &str, provider: &str) -> Credential {
        Credential::new(id, provider, id, AuthMaterial::ApiKey { key: "sk-x".into() })
    }

    fn pool_with(provider: &str, ids: &[&str]) -> Arc<CredentialPool> {
        let pool = Arc::new(CredentialPool::new());
        for id in ids {
            pool.add(cred(id, provider));
        }
        pool
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl Attempt<&'static str> for AlwaysSucceeds {
        async fn call(&self, _credential: &Credential) -> AttemptResult<&'static str> {
            AttemptResult::success("ok")
        }
    }

    struct AlwaysNonRetryable;
    #[async_trait]
    impl Attempt<&'static str> for AlwaysNonRetryable {
        async fn call(&self, _credential: &Credential) -> AttemptResult<&'static str> {
            AttemptResult::non_retryable("bad request", Some(400))
        }
    }

    struct AlwaysRetryOther;
    #[async_trait]
    impl Attempt<&'static str> for AlwaysRetryOther {
        async fn call(&self, _credential: &Credential) -> AttemptResult<&'static str> {
            AttemptResult::retry_other("quota exceeded", Some(429))
        }
    }

    struct FailsTwiceThenSucceeds {
        calls: AtomicU32,
    }
    #[async_trait]
    impl Attempt<&'static str> for FailsTwiceThenSucceeds {
        async fn call(&self, _credential: &Credential) -> AttemptResult<&'static str> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                AttemptResult::retry_this("upstream 503", Some(503))
            } else {
                AttemptResult::success("ok")
            }
        }
    }

    fn fast_config() -> SelectorConfig {
        SelectorConfig {
            max_attempts_per_credential: 5,
            max_retry_interval: Duration::from_millis(2),
            cooldown_enabled: true,
        }
    }

    #[tokio::test]
    async fn success_returns_value_and_trace_has_one_attempt() {
        let pool = pool_with("claude", &["a"]);
        let selector = Selector::new(pool, fast_config());
        let mut trace = SelectionTrace::default();
        let cancel = CancellationToken::new();
        let result = selector
            .run(&["claude".to_string()], &mut trace, &cancel, &AlwaysSucceeds)
            .await
            .unwrap();
        assert_eq!(result, "ok");
        assert_eq!(trace.attempts.len(), 1);
    }

    #[tokio::test]
    async fn non_retryable_does_not_rotate_and_surfaces_status() {
        let pool = pool_with("claude", &["a", "b"]);
        let selector = Selector::new(pool, fast_config());
        let mut trace = SelectionTrace::default();
        let cancel = CancellationToken::new();
        let err = selector
            .run(&["claude".to_string()], &mut trace, &cancel, &AlwaysNonRetryable)
            .await
            .unwrap_err();
        assert_eq!(trace.attempts.len(), 1);
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn retry_other_credential_cools_and_rotates_then_exhausts() {
        let pool = pool_with("claude", &["a", "b"]);
        let selector = Selector::new(Arc::clone(&pool), fast_config());
        let mut trace = SelectionTrace::default();
        let cancel = CancellationToken::new();
        let err = selector
            .run(&["claude".to_string()], &mut trace, &cancel, &AlwaysRetryOther)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 429);
        // Both credentials were tried and placed into cooldown.
        assert_eq!(trace.attempts.len(), 2);
        for c in pool.list("claude") {
            assert!(c.cooling_until > 0);
        }
    }

    #[tokio::test]
    async fn retry_this_credential_retries_same_credential() {
        let pool = pool_with("claude", &["a"]);
        let selector = Selector::new(pool, fast_config());
        let mut trace = SelectionTrace::default();
        let cancel = CancellationToken::new();
        let attempt = FailsTwiceThenSucceeds { calls: AtomicU32::new(0) };
        let result = selector
            .run(&["claude".to_string()], &mut trace, &cancel, &attempt)
            .await
            .unwrap();
        assert_eq!(result, "ok");
        // 2 failed attempts + 1 success, all against the single credential "a".
        assert_eq!(trace.attempts.len(), 3);
        assert!(trace.attempts.iter().all(|a| a.credential_id == "a"));
    }

    #[tokio::test]
    async fn cancellation_aborts_before_any_attempt() {
        let pool = pool_with("claude", &["a"]);
        let selector = Selector::new(pool, fast_config());
        let mut trace = SelectionTrace::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = selector
            .run(&["claude".to_string()], &mut trace, &cancel, &AlwaysSucceeds)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectorError::Cancelled));
        assert!(trace.attempts.is_empty());
    }

    #[tokio::test]
    async fn empty_provider_list_is_immediately_exhausted() {
        let pool = pool_with("claude", &["a"]);
        let selector = Selector::new(pool, fast_config());
        let mut trace = SelectionTrace::default();
        let cancel = CancellationToken::new();
        let err = selector.run(&[], &mut trace, &cancel, &AlwaysSucceeds).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
    }
}
