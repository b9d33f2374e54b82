use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{ImageStore, check_key};
use crate::error::AppError;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Process-local object store for tests; uploads and deletes can be made to fail on demand.
pub struct MemoryImageStore {
    base_url: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_uploads: AtomicUsize,
    upload_budget: AtomicUsize,
    failing_deletes: AtomicBool,
    uploads: AtomicUsize,
}

impl MemoryImageStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
            failing_uploads: AtomicUsize::new(0),
            upload_budget: AtomicUsize::new(usize::MAX),
            failing_deletes: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
        }
    }

    /// The next `count` uploads fail with a storage error.
    pub fn failing_next(self, count: usize) -> Self {
        self.failing_uploads.store(count, Ordering::SeqCst);
        self
    }

    /// `count` uploads succeed, every later one fails.
    pub fn failing_after(self, count: usize) -> Self {
        self.upload_budget.store(count, Ordering::SeqCst);
        self
    }

    pub fn set_failing_deletes(&self, failing: bool) {
        self.failing_deletes.store(failing, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.bytes.clone()))
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.content_type.clone()))
    }

    /// Number of successful uploads so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn objects(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>>, AppError> {
        self.objects
            .lock()
            .map_err(|_| AppError::InternalServerError("Image store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError> {
        check_key(key)?;

        let failing = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing
            || self
                .upload_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n == usize::MAX { Some(n) } else { n.checked_sub(1) }
                })
                .is_err()
        {
            return Err(AppError::StorageError(format!("Upload of '{}' failed", key)));
        }

        self.objects()?.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(self.url_for(key))
    }

    async fn delete(&self, key_or_prefix: &str) -> Result<usize, AppError> {
        check_key(key_or_prefix)?;
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(AppError::StorageError(format!("Delete of '{}' failed", key_or_prefix)));
        }

        let mut objects = self.objects()?;
        if key_or_prefix.ends_with('/') {
            let doomed: Vec<String> = objects
                .keys()
                .filter(|k| k.starts_with(key_or_prefix))
                .cloned()
                .collect();
            for key in &doomed {
                objects.remove(key);
            }
            Ok(doomed.len())
        } else {
            Ok(objects.remove(key_or_prefix).map(|_| 1).unwrap_or(0))
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .objects()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_delete_removes_only_that_prefix() {
        let store = MemoryImageStore::new("http://m");
        store.upload("user-1/wish-1/a.png", b"a", "image/png").await.unwrap();
        store.upload("user-1/wish-1/b.png", b"b", "image/png").await.unwrap();
        store.upload("user-1/wish-10/c.png", b"c", "image/png").await.unwrap();

        assert_eq!(store.delete("user-1/wish-1/").await.unwrap(), 2);
        assert_eq!(store.list("user-1/").await.unwrap(), vec!["user-1/wish-10/c.png"]);
        assert_eq!(store.delete("user-1/wish-10/missing.png").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn budget_limits_successful_uploads() {
        let store = MemoryImageStore::new("http://m").failing_after(1);
        assert!(store.upload("k/a", b"a", "image/png").await.is_ok());
        assert!(store.upload("k/b", b"b", "image/png").await.is_err());
        assert_eq!(store.upload_count(), 1);
        assert_eq!(store.content_type("k/a").as_deref(), Some("image/png"));
        assert_eq!(store.bytes("k/a"), Some(b"a".to_vec()));
    }
}
