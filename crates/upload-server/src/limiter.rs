//! Fixed-window message rate limiter, shared by every connection.
//!
//! Each client identity owns one counter per window. The counter lives in a
//! [`WindowStore`] whose `update` applies a read-modify-write step atomically
//! for the key, so concurrent connections from one client cannot under-count.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use upload_core::UploadResult;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Reject,
}

/// Per-client counter for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    pub count: u32,
    pub window_start: Instant,
}

/// Rate-limit settings.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Window length.
    pub period: Duration,
    /// Messages admitted per window.
    pub limit: u32,
    /// Prefix prepended to the client identity to form the store key.
    pub key_prefix: String,
}

/// A read-modify-write step: receives the current record (if any) and
/// returns the decision plus the record to store (`None` leaves it as is).
pub type WindowStep<'a> = dyn Fn(Option<WindowRecord>) -> (Decision, Option<WindowRecord>) + Send + Sync + 'a;

/// Key-value store for window records with per-record expiry.
pub trait WindowStore: Send + Sync {
    /// Apply `step` to the record under `key` atomically.
    ///
    /// Records whose expiry lies before `now` are presented to `step` as
    /// absent; a record is still live at the exact expiry instant.
    /// A record written by `step` expires `ttl` after `now`.
    fn update<'a>(
        &'a self,
        key: &'a str,
        now: Instant,
        ttl: Duration,
        step: &'a WindowStep<'a>,
    ) -> BoxFuture<'a, UploadResult<Decision>>;
}

#[derive(Debug, Clone, Copy)]
struct StoredRecord {
    record: WindowRecord,
    expires_at: Instant,
}

/// In-process [`WindowStore`] guarded by a single async mutex.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    entries: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired records to prevent memory growth.
    pub async fn gc(&self) -> usize {
        self.gc_at(Instant::now()).await
    }

    pub async fn gc_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, stored| stored.expires_at >= now);
        before - entries.len()
    }

    /// Current record for `key`, ignoring expiry.
    #[cfg(test)]
    pub async fn get(&self, key: &str) -> Option<WindowRecord> {
        self.entries.lock().await.get(key).map(|s| s.record)
    }

    /// Overwrite the record for `key`.
    #[cfg(test)]
    pub async fn set(&self, key: &str, record: WindowRecord, ttl: Duration) {
        self.entries.lock().await.insert(
            key.to_string(),
            StoredRecord {
                record,
                expires_at: record.window_start + ttl,
            },
        );
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl WindowStore for MemoryWindowStore {
    fn update<'a>(
        &'a self,
        key: &'a str,
        now: Instant,
        ttl: Duration,
        step: &'a WindowStep<'a>,
    ) -> BoxFuture<'a, UploadResult<Decision>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let current = entries
                .get(key)
                .filter(|stored| stored.expires_at >= now)
                .map(|stored| stored.record);
            let (decision, next) = step(current);
            if let Some(record) = next {
                entries.insert(
                    key.to_string(),
                    StoredRecord {
                        record,
                        expires_at: now + ttl,
                    },
                );
            }
            Ok(decision)
        })
    }
}

/// Admission gate injected into each session.
pub trait Admit: Send + Sync {
    /// Decide whether one more message from `client` may proceed.
    fn admit<'a>(&'a self, client: &'a str) -> BoxFuture<'a, UploadResult<Decision>>;
}

/// One step of the fixed-window algorithm.
///
/// A window older than `period` restarts at `now` with a zero count. A full
/// window rejects without incrementing.
pub fn advance(
    current: Option<WindowRecord>,
    now: Instant,
    period: Duration,
    limit: u32,
) -> (Decision, Option<WindowRecord>) {
    let mut record = current.unwrap_or(WindowRecord {
        count: 0,
        window_start: now,
    });

    if now.saturating_duration_since(record.window_start) > period {
        record = WindowRecord {
            count: 0,
            window_start: now,
        };
    }

    if record.count >= limit {
        return (Decision::Reject, None);
    }

    record.count += 1;
    (Decision::Allow, Some(record))
}

/// Fixed-window counter limiter over a [`WindowStore`].
#[derive(Debug)]
pub struct FixedWindowLimiter<S> {
    policy: RateLimitPolicy,
    store: Arc<S>,
}

impl<S: WindowStore> FixedWindowLimiter<S> {
    pub fn new(policy: RateLimitPolicy, store: Arc<S>) -> Self {
        Self { policy, store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Store key for a client identity.
    pub fn key_for(&self, client: &str) -> String {
        format!("{}{}", self.policy.key_prefix, client)
    }

    /// Admission check at an explicit instant.
    pub async fn admit_at(&self, client: &str, now: Instant) -> UploadResult<Decision> {
        let key = self.key_for(client);
        let period = self.policy.period;
        let limit = self.policy.limit;
        let step = move |current: Option<WindowRecord>| advance(current, now, period, limit);
        // Expiry tracks the window so a record never outlives its logical window.
        let decision = self.store.update(&key, now, period, &step).await?;
        if decision == Decision::Reject {
            debug!(key = %key, limit, "rate limit window full");
        }
        Ok(decision)
    }
}

impl<S: WindowStore> Admit for FixedWindowLimiter<S> {
    fn admit<'a>(&'a self, client: &'a str) -> BoxFuture<'a, UploadResult<Decision>> {
        Box::pin(self.admit_at(client, Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, period_secs: u64) -> FixedWindowLimiter<MemoryWindowStore> {
        FixedWindowLimiter::new(
            RateLimitPolicy {
                period: Duration::from_secs(period_secs),
                limit,
                key_prefix: "rate_limit_".into(),
            },
            Arc::new(MemoryWindowStore::new()),
        )
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(3, 60);
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.admit_at("127.0.0.1", now).await.unwrap(), Decision::Allow);
        }
        assert_eq!(limiter.admit_at("127.0.0.1", now).await.unwrap(), Decision::Reject);
        // Rejections do not increment.
        let record = limiter.store().get("rate_limit_127.0.0.1").await.unwrap();
        assert_eq!(record.count, 3);
    }

    #[tokio::test]
    async fn clients_are_counted_separately() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert_eq!(limiter.admit_at("10.0.0.1", now).await.unwrap(), Decision::Allow);
        assert_eq!(limiter.admit_at("10.0.0.2", now).await.unwrap(), Decision::Allow);
        assert_eq!(limiter.admit_at("10.0.0.1", now).await.unwrap(), Decision::Reject);
    }

    #[tokio::test]
    async fn window_resets_after_period() {
        let limiter = limiter(2, 60);
        let start = Instant::now();
        limiter.admit_at("c", start).await.unwrap();
        limiter.admit_at("c", start).await.unwrap();
        let later = start + Duration::from_secs(30);
        assert_eq!(limiter.admit_at("c", later).await.unwrap(), Decision::Reject);

        let after = start + Duration::from_secs(61);
        assert_eq!(limiter.admit_at("c", after).await.unwrap(), Decision::Allow);
        let record = limiter.store().get("rate_limit_c").await.unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, after);
    }

    #[tokio::test]
    async fn full_window_still_rejects_at_exact_period() {
        let limiter = limiter(1, 60);
        let start = Instant::now();
        assert_eq!(limiter.admit_at("edge", start).await.unwrap(), Decision::Allow);

        let boundary = start + Duration::from_secs(60);
        assert_eq!(limiter.admit_at("edge", boundary).await.unwrap(), Decision::Reject);

        let past = boundary + Duration::from_millis(1);
        assert_eq!(limiter.admit_at("edge", past).await.unwrap(), Decision::Allow);
        let record = limiter.store().get("rate_limit_edge").await.unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, past);
    }

    #[tokio::test]
    async fn stale_over_limit_record_resets_to_one() {
        let limiter = limiter(1000, 60);
        let now = Instant::now();
        // An over-limit record whose window began more than a period ago.
        limiter
            .store()
            .set(
                "rate_limit_127.0.0.1",
                WindowRecord {
                    count: 1001,
                    window_start: now,
                },
                Duration::from_secs(600),
            )
            .await;
        let later = now + Duration::from_secs(61);
        assert_eq!(limiter.admit_at("127.0.0.1", later).await.unwrap(), Decision::Allow);
        let record = limiter.store().get("rate_limit_127.0.0.1").await.unwrap();
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn over_limit_record_rejects() {
        let limiter = limiter(1000, 60);
        let now = Instant::now();
        limiter
            .store()
            .set(
                "rate_limit_127.0.0.1",
                WindowRecord {
                    count: 1001,
                    window_start: now,
                },
                Duration::from_secs(60),
            )
            .await;
        assert_eq!(limiter.admit_at("127.0.0.1", now).await.unwrap(), Decision::Reject);
    }

    #[tokio::test]
    async fn concurrent_admissions_never_exceed_limit() {
        let limiter = Arc::new(limiter(50, 60));
        let now = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..200 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.admit_at("shared", now).await.unwrap()
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() == Decision::Allow {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
    }

    #[tokio::test]
    async fn records_expire_with_the_window() {
        let limiter = limiter(5, 60);
        let now = Instant::now();
        limiter.admit_at("a", now).await.unwrap();
        assert_eq!(limiter.store().gc_at(now + Duration::from_secs(30)).await, 0);
        assert_eq!(limiter.store().gc_at(now + Duration::from_secs(60)).await, 0);
        assert_eq!(limiter.store().gc_at(now + Duration::from_secs(61)).await, 1);
        assert_eq!(limiter.store().len().await, 0);
    }

    #[test]
    fn advance_starts_new_window() {
        let now = Instant::now();
        let (decision, record) = advance(None, now, Duration::from_secs(1), 1);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(
            record,
            Some(WindowRecord {
                count: 1,
                window_start: now
            })
        );
    }

    #[test]
    fn zero_limit_rejects_everything() {
        let (decision, record) = advance(None, Instant::now(), Duration::from_secs(1), 0);
        assert_eq!(decision, Decision::Reject);
        assert!(record.is_none());
    }
}
