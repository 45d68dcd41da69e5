//! Keyed fixed window rate limiting for PictaVault's comment traffic.
//!
//! A [RateLimiter] counts requests per key against a named [Policy](policy::Policy). The
//! [comments] module wires it to the comment call sites, and [Throttle] applies it to actix-web
//! services.
//!
//! ```no_run
//! # use pictavault_rate_limit::backend::memory::InMemoryBackend;
//! # use pictavault_rate_limit::policy::COMMENTS;
//! # use pictavault_rate_limit::RateLimiter;
//! let backend = InMemoryBackend::builder().with_gc_interval(None).build();
//! let limiter = RateLimiter::builder(backend).build();
//! match limiter.check("post1_userA", COMMENTS) {
//!     Ok(_) => { /* add the comment */ }
//!     Err(e) => println!("{e}"), // Rate limit exceeded. Try again in 12 minutes
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod comments;
mod error;
mod limiter;
mod middleware;
pub mod policy;

pub use error::Error;
pub use limiter::{Permit, RateLimiter, RateLimiterBuilder};
pub use middleware::builder::{Denial, HeaderCompatibleOutput, ThrottleBuilder};
pub use middleware::key_builder::{KeyFunctionBuilder, ThrottleInputFuture};
pub use middleware::{Throttle, ThrottleInput};
