#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

use crate::HeaderCompatibleOutput;
use actix_web::rt::time::Instant;
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Logical state of a bucket after a request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BucketState {
    /// Requests are still being admitted in this window.
    Open,
    /// The quota is used up until the window resets.
    Throttled,
}

/// Describes an implementation of a rate limiting store and algorithm.
///
/// Every operation is in-memory bookkeeping: nothing blocks or performs I/O, so a backend can be
/// called synchronously from any call site. Implementations must make the read-modify-write of a
/// bucket atomic with respect to other callers of the same key.
///
/// A Backend is required to implement [Clone], clones share the same buckets.
pub trait Backend: Clone {
    type RollbackToken: 'static;

    /// Record a request against the bucket for `input.policy` / `input.key`.
    ///
    /// Returns whether to allow or deny the request, the state of the window afterwards, and a
    /// token to allow the request to be rolled back.
    fn request(&self, input: WindowInput) -> (Decision, WindowOutput, Self::RollbackToken);

    /// Return a previously admitted request to its bucket.
    ///
    /// Has no effect if the window that admitted the request has since been reset.
    fn rollback(&self, token: Self::RollbackToken);

    /// Removes the bucket for a given policy and key.
    fn remove_key(&self, policy: &str, key: &str);
}

/// Input for a [Backend].
#[derive(Debug, Clone)]
pub struct WindowInput {
    /// Name of the policy the bucket is tracked under.
    pub policy: String,
    /// The rate limit key to be used for this request.
    pub key: String,
    /// The rate limiting interval.
    pub interval: Duration,
    /// The total requests to be allowed within the interval.
    pub max_requests: u64,
}

/// Output from a [Backend].
#[derive(Debug, Clone)]
pub struct WindowOutput {
    /// Total number of requests that are permitted within the rate limit interval.
    pub limit: u64,
    /// Number of requests that will be permitted until the limit resets.
    pub remaining: u64,
    /// Time at which the current window began.
    pub window_start: Instant,
    /// Time at which the rate limit resets.
    pub reset: Instant,
}

impl WindowOutput {
    pub fn state(&self) -> BucketState {
        if self.remaining == 0 {
            BucketState::Throttled
        } else {
            BucketState::Open
        }
    }

    /// Time left in the current window.
    pub fn until_reset(&self) -> Duration {
        self.reset.saturating_duration_since(Instant::now())
    }
}

impl HeaderCompatibleOutput for WindowOutput {
    fn limit(&self) -> u64 {
        self.limit
    }

    fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Seconds until the rate limit resets (rounded upwards, so that it is guaranteed to be reset
    /// after waiting for the duration).
    fn seconds_until_reset(&self) -> u64 {
        let millis = self.until_reset().as_millis();
        u64::try_from((millis + 999) / 1000).unwrap_or(u64::MAX)
    }
}
