use crate::policy::WaitTime;
use actix_web::http::header::{HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The key has used up its quota for the current window.
    ///
    /// Always recoverable by waiting for [WaitTime::remaining].
    #[error("Rate limit exceeded. Try again in {wait}")]
    RateLimitExceeded { policy: String, wait: WaitTime },
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),
    #[error("Invalid rate limit policy {name}: {reason}")]
    InvalidPolicy { name: String, reason: &'static str },
    #[error("Rate limit key must not be empty")]
    EmptyKey,
}

impl Error {
    /// Whether the failure is a temporary block rather than a fault.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RateLimitExceeded { .. })
    }

    /// How long to wait before retrying, if this is a throttle failure.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimitExceeded { wait, .. } => Some(wait.remaining()),
            _ => None,
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::EmptyKey => StatusCode::BAD_REQUEST,
            Error::UnknownPolicy(_) | Error::InvalidPolicy { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            Error::RateLimitExceeded { wait, .. } => {
                let mut response = HttpResponse::TooManyRequests().body(self.to_string());
                response.headers_mut().insert(
                    RETRY_AFTER,
                    HeaderValue::from(wait.seconds_until_reset()),
                );
                response
            }
            Error::EmptyKey => HttpResponse::BadRequest().body(self.to_string()),
            // Configuration details stay in the logs
            _ => HttpResponse::InternalServerError().finish(),
        }
    }
}
