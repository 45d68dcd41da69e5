use crate::backend::{Backend, WindowInput, WindowOutput};
use crate::policy::{PolicyRegistry, WaitTime};
use crate::Error;
use actix_web::rt::time::Instant;
use std::sync::Arc;

/// Keyed fixed window rate limiter.
///
/// Each `(policy, key)` pair gets its own bucket. The first `max_requests` checks within a window
/// succeed, every later check fails with [Error::RateLimitExceeded] until the window elapses.
///
/// Cloning is cheap, clones share the same buckets and policies.
#[derive(Clone)]
pub struct RateLimiter<B> {
    backend: B,
    policies: Arc<PolicyRegistry>,
}

/// A request admitted by [RateLimiter::acquire].
#[derive(Debug)]
pub struct Permit<T> {
    /// The state of the window after this request was counted.
    pub output: WindowOutput,
    /// Hands the request back via [RateLimiter::rollback].
    pub token: T,
}

impl<B: Backend> RateLimiter<B> {
    pub fn builder(backend: B) -> RateLimiterBuilder<B> {
        RateLimiterBuilder {
            backend,
            policies: None,
        }
    }

    /// Count a request for `key` against the named policy.
    ///
    /// Fails with [Error::UnknownPolicy] before touching any bucket if the policy isn't
    /// registered, and with [Error::RateLimitExceeded] once the key has used its quota for the
    /// current window. Denied requests are not counted.
    pub fn check(&self, key: &str, policy_name: &str) -> Result<WindowOutput, Error> {
        self.acquire(key, policy_name).map(|permit| permit.output)
    }

    /// Like [RateLimiter::check], additionally returning a token that can give the request back.
    pub fn acquire(
        &self,
        key: &str,
        policy_name: &str,
    ) -> Result<Permit<B::RollbackToken>, Error> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let policy = self.policies.get(policy_name)?;
        let (decision, output, token) = self.backend.request(WindowInput {
            policy: policy_name.to_owned(),
            key: key.to_owned(),
            interval: policy.interval,
            max_requests: policy.max_requests,
        });
        if decision.is_denied() {
            let wait = WaitTime::new(
                output.reset.saturating_duration_since(Instant::now()),
                policy.wait_unit,
            );
            log::debug!("Rate limit '{policy_name}' exceeded for key '{key}', resets in {wait}");
            return Err(Error::RateLimitExceeded {
                policy: policy_name.to_owned(),
                wait,
            });
        }
        log::trace!(
            "Rate limit '{policy_name}' admitted key '{key}', {} remaining",
            output.remaining
        );
        Ok(Permit { output, token })
    }

    /// Give an admitted request back, e.g. because the guarded operation failed.
    pub fn rollback(&self, token: B::RollbackToken) {
        self.backend.rollback(token);
    }

    /// Forget the bucket for `key`, its next request starts a fresh window.
    pub fn reset(&self, key: &str, policy_name: &str) -> Result<(), Error> {
        self.policies.get(policy_name)?;
        self.backend.remove_key(policy_name, key);
        Ok(())
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

pub struct RateLimiterBuilder<B> {
    backend: B,
    policies: Option<Arc<PolicyRegistry>>,
}

impl<B: Backend> RateLimiterBuilder<B> {
    /// Use the given policy table instead of [PolicyRegistry::default].
    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(Arc::new(policies));
        self
    }

    /// Share a policy table with other limiters.
    pub fn shared_policies(mut self, policies: Arc<PolicyRegistry>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn build(self) -> RateLimiter<B> {
        RateLimiter {
            backend: self.backend,
            policies: self.policies.unwrap_or_default(),
        }
    }
}
