use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::ImageStore;
use crate::{config::Config, error::AppError};

/// How many times a store call is tried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per call, the first one included. Never below 1.
    pub attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.store_retry_attempts.max(1),
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }

    /// Waits before retry number `retry` (1-based): doubles from
    /// `first_delay` up to `max_delay`, plus up to a quarter more derived
    /// from the key so retries for different objects spread out.
    pub fn delay(&self, retry: u32, key: &str) -> Duration {
        let doubled = self
            .first_delay
            .saturating_mul(1u32 << retry.saturating_sub(1).min(16))
            .min(self.max_delay);

        let spread = doubled.as_millis() as u64 / 4;
        if spread == 0 {
            return doubled;
        }
        let mut hasher = DefaultHasher::new();
        (key, retry).hash(&mut hasher);
        doubled + Duration::from_millis(hasher.finish() % (spread + 1))
    }
}

/// Retries transient (`StorageError`) failures of the wrapped store.
/// Other errors, such as a rejected key, are returned at once.
pub struct RetryingStore {
    inner: Arc<dyn ImageStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn ImageStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn retry<T, F, Fut>(&self, op: &str, key: &str, mut call: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut tries = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(AppError::StorageError(msg)) if tries < self.policy.attempts => {
                    let delay = self.policy.delay(tries, key);
                    tracing::warn!(
                        "Object store {} of '{}' failed (try {} of {}): {}; retrying in {:?}",
                        op,
                        key,
                        tries,
                        self.policy.attempts,
                        msg,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ImageStore for RetryingStore {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError> {
        self.retry("upload", key, || self.inner.upload(key, bytes, content_type))
            .await
    }

    async fn delete(&self, key_or_prefix: &str) -> Result<usize, AppError> {
        self.retry("delete", key_or_prefix, || self.inner.delete(key_or_prefix))
            .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        self.retry("list", prefix, || self.inner.list(prefix)).await
    }

    fn base_url(&self) -> &str {
        self.inner.base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MemoryImageStore;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            first_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = RetryPolicy {
            attempts: 5,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };

        for (retry, base) in [(1, 100), (2, 200), (3, 400), (4, 500), (40, 500)] {
            let delay = policy.delay(retry, "user-1/a.png");
            assert!(delay >= Duration::from_millis(base), "retry {}", retry);
            assert!(delay <= Duration::from_millis(base + base / 4), "retry {}", retry);
        }
        assert_eq!(policy.delay(2, "k"), policy.delay(2, "k"));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let config = Config {
            store_retry_attempts: 0,
            ..crate::services::test_support::config()
        };
        assert_eq!(RetryPolicy::from_config(&config).attempts, 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let inner = Arc::new(MemoryImageStore::new("http://m").failing_next(2));
        let store = RetryingStore::new(inner.clone(), quick(3));

        let url = store.upload("user-1/a.png", b"img", "image/png").await.unwrap();
        assert_eq!(url, "http://m/user-1/a.png");
        assert!(inner.contains("user-1/a.png"));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let inner = Arc::new(MemoryImageStore::new("http://m").failing_next(5));
        let store = RetryingStore::new(inner.clone(), quick(3));

        let result = store.upload("user-1/a.png", b"img", "image/png").await;
        assert!(matches!(result, Err(AppError::StorageError(_))));
        assert!(!inner.contains("user-1/a.png"));
        assert_eq!(inner.upload_count(), 0);
    }

    #[tokio::test]
    async fn invalid_keys_are_not_retried() {
        let inner = Arc::new(MemoryImageStore::new("http://m"));
        let store = RetryingStore::new(inner, quick(3));

        let result = store.upload("../escape.png", b"img", "image/png").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
