use crate::backend::{Backend, WindowOutput};
use crate::middleware::{
    AllowedTransformation, DeniedResponse, RollbackCondition, Throttle, ThrottleInput,
};
use crate::policy::WaitTime;
use crate::{Error, RateLimiter};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use once_cell::sync::Lazy;
use std::future::Future;
use std::rc::Rc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

/// A request turned away by the [Throttle].
#[derive(Debug, Clone)]
pub struct Denial {
    /// Policy whose quota was used up.
    pub policy: String,
    /// Requests allowed per window under that policy.
    pub limit: u64,
    /// Time until the window resets.
    pub wait: WaitTime,
}

impl Denial {
    pub fn to_error(&self) -> Error {
        Error::RateLimitExceeded {
            policy: self.policy.clone(),
            wait: self.wait,
        }
    }
}

impl HeaderCompatibleOutput for Denial {
    fn limit(&self) -> u64 {
        self.limit
    }

    fn remaining(&self) -> u64 {
        0
    }

    fn seconds_until_reset(&self) -> u64 {
        self.wait.seconds_until_reset()
    }
}

pub struct ThrottleBuilder<BA, F> {
    limiter: RateLimiter<BA>,
    input_fn: F,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    rollback_condition: Option<Rc<RollbackCondition>>,
}

impl<BA, F, O> ThrottleBuilder<BA, F>
where
    BA: Backend + 'static,
    F: Fn(&ServiceRequest) -> O,
    O: Future<Output = Result<ThrottleInput, actix_web::Error>>,
{
    pub(super) fn new(limiter: RateLimiter<BA>, input_fn: F) -> Self {
        Self {
            limiter,
            input_fn,
            allowed_transformation: None,
            denied_response: Rc::new(|denial: &Denial| denial.to_error().error_response()),
            rollback_condition: None,
        }
    }

    /// Sets the [ThrottleBuilder::request_allowed_transformation] and
    /// [ThrottleBuilder::request_denied_response] functions, such that the following headers
    /// are set in both the allowed and denied responses:
    ///
    /// - `x-ratelimit-limit`\
    /// - `x-ratelimit-remaining`\
    /// - `x-ratelimit-reset` (seconds until the reset)
    ///
    /// Denied responses keep their `retry-after` header and the human readable wait message as
    /// their body.
    pub fn add_headers(mut self) -> Self {
        self.allowed_transformation = Some(Rc::new(
            |map: &mut HeaderMap, output: &WindowOutput, rolled_back: bool| {
                let mut remaining = output.remaining();
                if rolled_back {
                    remaining = (remaining + 1).min(output.limit());
                }
                insert_headers(map, output.limit(), remaining, output.seconds_until_reset());
            },
        ));
        self.denied_response = Rc::new(|denial: &Denial| {
            let mut response = denial.to_error().error_response();
            insert_headers(
                response.headers_mut(),
                denial.limit(),
                denial.remaining(),
                denial.seconds_until_reset(),
            );
            response
        });
        self
    }

    /// In the event that the request is allowed:
    ///
    /// You can optionally mutate the response headers to include the rate limit status. The
    /// final argument reports whether the request was rolled back.
    ///
    /// By default no changes are made to the response.
    pub fn request_allowed_transformation<M>(mut self, mutation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, &WindowOutput, bool) + 'static,
    {
        self.allowed_transformation = mutation.map(|m| Rc::new(m) as Rc<AllowedTransformation>);
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse] returned.
    ///
    /// Defaults to status 429 with a `Retry-After` header and a body telling the client how long
    /// to wait, e.g. `Rate limit exceeded. Try again in 60 minutes`.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&Denial) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    /// After processing a request, give the slot back based on the status code of the returned
    /// response.
    ///
    /// By default the rate limit is never rolled back.
    pub fn rollback_condition<C>(mut self, condition: Option<C>) -> Self
    where
        C: Fn(StatusCode) -> bool + 'static,
    {
        self.rollback_condition = condition.map(|m| Rc::new(m) as Rc<RollbackCondition>);
        self
    }

    /// Configures the [ThrottleBuilder::rollback_condition] to rollback if the status code
    /// is a server error (5xx).
    pub fn rollback_server_errors(mut self) -> Self {
        self.rollback_condition = Some(Rc::new(|status: StatusCode| status.is_server_error()));
        self
    }

    pub fn build(self) -> Throttle<BA, F> {
        Throttle {
            limiter: self.limiter,
            input_fn: Rc::new(self.input_fn),
            allowed_transformation: self.allowed_transformation,
            denied_response: self.denied_response,
            rollback_condition: self.rollback_condition,
        }
    }
}

fn insert_headers(map: &mut HeaderMap, limit: u64, remaining: u64, reset: u64) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    map.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    map.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(reset));
}

/// Rate limit status that can be reported through the `x-ratelimit-*` headers.
pub trait HeaderCompatibleOutput {
    /// Value for the `x-ratelimit-limit` header.
    fn limit(&self) -> u64;

    /// Value for the `x-ratelimit-remaining` header.
    fn remaining(&self) -> u64;

    /// Value for the `x-ratelimit-reset` and `retry-after` headers.
    ///
    /// This should be the number of seconds from now until the limit resets.\
    /// If the limit has already reset this should return 0.
    fn seconds_until_reset(&self) -> u64;
}
