use crate::backend::{Backend, Decision, WindowInput, WindowOutput};
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60 * 10;

// Stands in for windows too large to represent as an Instant.
const MAX_WINDOW: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

type BucketKey = (String, String);

/// A fixed window rate limiter [Backend] that uses [Dashmap](dashmap::DashMap) to store buckets
/// in memory.
///
/// Buckets live for the lifetime of the process unless they are removed by the garbage collector,
/// [InMemoryBackend::sweep] or [Backend::remove_key].
#[derive(Clone)]
pub struct InMemoryBackend {
    map: Arc<DashMap<BucketKey, Bucket>>,
    _gc: Option<Arc<GcTask>>,
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    expires: Instant,
    count: u64,
}

impl Bucket {
    fn open(now: Instant, interval: Duration) -> Self {
        let expires = now
            .checked_add(interval)
            .unwrap_or_else(|| now + MAX_WINDOW);
        Self {
            window_start: now,
            expires,
            count: 0,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now >= self.expires
    }
}

/// Identifies an admitted request so that it can be handed back.
#[derive(Debug, Clone)]
pub struct Rollback {
    policy: String,
    key: String,
    window_start: Instant,
    admitted: bool,
}

// Aborts the collector once the last clone of the backend is gone.
struct GcTask(JoinHandle<()>);

impl Drop for GcTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl InMemoryBackend {
    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder {
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECONDS)),
        }
    }

    /// Removes every bucket whose window has elapsed, returning how many were dropped.
    ///
    /// Useful when the garbage collector is disabled, e.g. for hosts without an async runtime.
    pub fn sweep(&self) -> usize {
        let before = self.map.len();
        let now = Instant::now();
        self.map.retain(|_k, v| !v.expired(now));
        before.saturating_sub(self.map.len())
    }

    /// Number of buckets currently tracked.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn garbage_collector(
        map: Arc<DashMap<BucketKey, Bucket>>,
        interval: Duration,
    ) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                let before = map.len();
                map.retain(|_k, v| !v.expired(now));
                log::trace!(
                    "Rate limit GC removed {} expired buckets",
                    before.saturating_sub(map.len())
                );
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

impl Backend for InMemoryBackend {
    type RollbackToken = Rollback;

    fn request(&self, input: WindowInput) -> (Decision, WindowOutput, Self::RollbackToken) {
        let now = Instant::now();
        let mut bucket = self
            .map
            .entry((input.policy.clone(), input.key.clone()))
            .or_insert_with(|| Bucket::open(now, input.interval));
        // The reset boundary is inclusive: a request landing exactly on the end of the window
        // starts the next one.
        if bucket.expired(now) {
            *bucket = Bucket::open(now, input.interval);
        }
        let admitted = bucket.count < input.max_requests;
        if admitted {
            bucket.count += 1;
        }
        let output = WindowOutput {
            limit: input.max_requests,
            remaining: input.max_requests.saturating_sub(bucket.count),
            window_start: bucket.window_start,
            reset: bucket.expires,
        };
        let token = Rollback {
            policy: input.policy,
            key: input.key,
            window_start: bucket.window_start,
            admitted,
        };
        (Decision::from_allowed(admitted), output, token)
    }

    fn rollback(&self, token: Self::RollbackToken) {
        if !token.admitted {
            return;
        }
        self.map
            .entry((token.policy, token.key))
            .and_modify(|v| {
                if v.window_start == token.window_start {
                    v.count = v.count.saturating_sub(1);
                }
            });
    }

    fn remove_key(&self, policy: &str, key: &str) {
        self.map.remove(&(policy.to_owned(), key.to_owned()));
    }
}

pub struct InMemoryBackendBuilder {
    gc_interval: Option<Duration>,
}

impl InMemoryBackendBuilder {
    /// Override the default garbage collector interval.
    ///
    /// Set to None to disable garbage collection. The collector is spawned onto the current
    /// actix/tokio runtime, so it must be disabled when building outside of one.
    ///
    /// The garbage collector periodically scans the internal map, removing expired buckets.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn build(self) -> InMemoryBackend {
        let map = Arc::new(DashMap::<BucketKey, Bucket>::new());
        let _gc = self.gc_interval.map(|gc_interval| {
            Arc::new(GcTask(InMemoryBackend::garbage_collector(
                map.clone(),
                gc_interval,
            )))
        });
        InMemoryBackend { map, _gc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn input(key: &str, interval: Duration, max_requests: u64) -> WindowInput {
        WindowInput {
            policy: "comments".to_string(),
            key: key.to_string(),
            interval,
            max_requests,
        }
    }

    fn contains(backend: &InMemoryBackend, key: &str) -> bool {
        backend
            .map
            .contains_key(&("comments".to_string(), key.to_string()))
    }

    #[actix_web::test]
    async fn test_allow_deny() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().build();
        let input = input("KEY1", MINUTE, 5);
        for _ in 0..5 {
            // First 5 should be allowed
            let (decision, _, _) = backend.request(input.clone());
            assert!(decision.is_allowed());
        }
        // Sixth should be denied
        let (decision, _, _) = backend.request(input.clone());
        assert!(decision.is_denied());
    }

    #[actix_web::test]
    async fn test_denied_requests_are_not_counted() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let input = input("KEY1", MINUTE, 2);
        backend.request(input.clone());
        backend.request(input.clone());
        for _ in 0..10 {
            let (decision, _, _) = backend.request(input.clone());
            assert!(decision.is_denied());
        }
        let entry = backend
            .map
            .get(&("comments".to_string(), "KEY1".to_string()))
            .unwrap();
        assert_eq!(entry.count, 2);
    }

    #[actix_web::test]
    async fn test_reset() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let input = input("KEY1", MINUTE, 1);
        // Make first request, should be allowed
        let (decision, _, _) = backend.request(input.clone());
        assert!(decision.is_allowed());
        // Request again, should be denied
        let (decision, _, _) = backend.request(input.clone());
        assert!(decision.is_denied());
        // Advance time and try again, should now be allowed
        tokio::time::advance(MINUTE).await;
        // We want to be sure the key hasn't been garbage collected, and we are testing the expiry logic
        assert!(contains(&backend, "KEY1"));
        let (decision, output, _) = backend.request(input);
        assert!(decision.is_allowed());
        assert_eq!(output.window_start, Instant::now());
    }

    #[actix_web::test]
    async fn test_boundary_is_inclusive() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let input = input("KEY1", MINUTE, 1);
        assert!(backend.request(input.clone()).0.is_allowed());
        // One millisecond before the end the old window still applies
        tokio::time::advance(MINUTE - Duration::from_millis(1)).await;
        assert!(backend.request(input.clone()).0.is_denied());
        // Exactly on the end a fresh window starts
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(backend.request(input).0.is_allowed());
    }

    #[actix_web::test]
    async fn test_independent_buckets() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        assert!(backend.request(input("a", MINUTE, 1)).0.is_allowed());
        assert!(backend.request(input("a", MINUTE, 1)).0.is_denied());
        // Other keys are unaffected
        assert!(backend.request(input("b", MINUTE, 1)).0.is_allowed());
        // As is the same key under another policy
        let mut other_policy = input("a", MINUTE, 1);
        other_policy.policy = "uploads".to_string();
        assert!(backend.request(other_policy).0.is_allowed());
    }

    #[actix_web::test]
    async fn test_garbage_collection() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder()
            .with_gc_interval(Some(MINUTE))
            .build();
        backend.request(input("KEY1", MINUTE, 1));
        backend.request(input("KEY2", MINUTE * 2, 1));
        assert!(contains(&backend, "KEY1"));
        assert!(contains(&backend, "KEY2"));
        // Advance time such that the garbage collector runs,
        // expired KEY1 should be cleaned, but KEY2 should remain.
        tokio::time::advance(MINUTE).await;
        assert!(!contains(&backend, "KEY1"));
        assert!(contains(&backend, "KEY2"));
    }

    #[actix_web::test]
    async fn test_sweep() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        backend.request(input("KEY1", MINUTE, 1));
        backend.request(input("KEY2", MINUTE * 2, 1));
        assert_eq!(backend.sweep(), 0);
        tokio::time::advance(MINUTE).await;
        assert_eq!(backend.sweep(), 1);
        assert_eq!(backend.len(), 1);
        assert!(contains(&backend, "KEY2"));
    }

    #[actix_web::test]
    async fn test_output() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().build();
        let input = input("KEY1", MINUTE, 2);
        let start = Instant::now();
        // First of 2 should be allowed.
        let (decision, output, _) = backend.request(input.clone());
        assert!(decision.is_allowed());
        assert_eq!(output.remaining, 1);
        assert_eq!(output.limit, 2);
        assert_eq!(output.reset, start + MINUTE);
        tokio::time::advance(Duration::from_secs(1)).await;
        // Second of 2 should be allowed, the window does not move.
        let (decision, output, _) = backend.request(input.clone());
        assert!(decision.is_allowed());
        assert_eq!(output.remaining, 0);
        assert_eq!(output.window_start, start);
        assert_eq!(output.reset, start + MINUTE);
        // Should be denied
        let (decision, output, _) = backend.request(input);
        assert!(decision.is_denied());
        assert_eq!(output.remaining, 0);
        assert_eq!(output.reset, start + MINUTE);
    }

    #[actix_web::test]
    async fn test_rollback() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let input = input("KEY1", MINUTE, 5);
        let (_, output, rollback) = backend.request(input.clone());
        assert_eq!(output.remaining, 4);
        backend.rollback(rollback);
        // Remaining requests should still be the same, since the previous call was excluded
        let (_, output, _) = backend.request(input);
        assert_eq!(output.remaining, 4);
    }

    #[actix_web::test]
    async fn test_rollback_ignores_previous_window() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let input = input("KEY1", MINUTE, 2);
        let (_, _, stale) = backend.request(input.clone());
        tokio::time::advance(MINUTE).await;
        let (_, output, _) = backend.request(input.clone());
        assert_eq!(output.remaining, 1);
        backend.rollback(stale);
        let (_, output, _) = backend.request(input);
        assert_eq!(output.remaining, 0);
    }

    #[actix_web::test]
    async fn test_rollback_of_denied_request() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let input = input("KEY1", MINUTE, 1);
        backend.request(input.clone());
        let (decision, _, token) = backend.request(input.clone());
        assert!(decision.is_denied());
        backend.rollback(token);
        assert!(backend.request(input).0.is_denied());
    }

    #[actix_web::test]
    async fn test_remove_key() {
        tokio::time::pause();
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let input = input("KEY1", MINUTE, 1);
        assert!(backend.request(input.clone()).0.is_allowed());
        assert!(backend.request(input.clone()).0.is_denied());
        backend.remove_key("comments", "KEY1");
        // Counter should have been reset
        assert!(backend.request(input).0.is_allowed());
    }

    #[test]
    fn test_concurrent_requests_respect_quota() {
        let backend = InMemoryBackend::builder().with_gc_interval(None).build();
        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let backend = backend.clone();
                    scope.spawn(move || {
                        (0..50)
                            .filter(|_| {
                                backend
                                    .request(input("shared", Duration::from_secs(3600), 100))
                                    .0
                                    .is_allowed()
                            })
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(admitted, 100);
    }
}
