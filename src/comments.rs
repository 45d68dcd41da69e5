//! Rate limits for the two comment call sites: listing a post's comments and adding a comment.
//!
//! Listing is tracked per post, adding a comment per post and author.

use crate::backend::Backend;
use crate::policy::COMMENTS;
use crate::{Error, RateLimiter};

/// Key used when listing the comments of a post.
pub fn list_key(post_id: &str) -> String {
    post_id.to_owned()
}

/// Key used when `user_id` comments on a post.
pub fn create_key(post_id: &str, user_id: &str) -> String {
    format!("{post_id}_{user_id}")
}

/// Guards the comment operations of a post with a [RateLimiter].
#[derive(Clone)]
pub struct CommentGate<B> {
    limiter: RateLimiter<B>,
    policy: String,
}

impl<B: Backend> CommentGate<B> {
    /// Gate using the `comments` policy of the limiter.
    pub fn new(limiter: RateLimiter<B>) -> Self {
        Self::with_policy(limiter, COMMENTS)
    }

    pub fn with_policy(limiter: RateLimiter<B>, policy: &str) -> Self {
        Self {
            limiter,
            policy: policy.to_owned(),
        }
    }

    /// Check before appending a comment.
    ///
    /// A throttled author gets [Error::RateLimitExceeded], whose message tells them how long to
    /// wait.
    pub fn admit_create(&self, post_id: &str, user_id: &str) -> Result<(), Error> {
        self.limiter
            .check(&create_key(post_id, user_id), &self.policy)
            .map(|_| ())
    }

    /// Check before fetching the comments of a post.
    ///
    /// Returns `Ok(false)` when the post is throttled; callers show an empty list rather than an
    /// error. Configuration errors are still returned.
    pub fn admit_list(&self, post_id: &str) -> Result<bool, Error> {
        match self.limiter.check(&list_key(post_id), &self.policy) {
            Ok(_) => Ok(true),
            Err(e) if e.is_transient() => {
                log::warn!("Rate limit reached for comments of post '{post_id}': {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn limiter(&self) -> &RateLimiter<B> {
        &self.limiter
    }
}
