//! Object storage for avatars and wish images.
//!
//! Keys are hierarchical: `user-{userId}/wish-{wishId}/{sha256}.{ext}` for wish
//! images and `user-{userId}/avatar/{sha256}.{ext}` for avatars. A key ending
//! in `/` addresses every object under that prefix.

pub mod fs;
pub mod memory;
pub mod retry;

use async_trait::async_trait;

use crate::error::AppError;

pub use fs::FsImageStore;
pub use memory::MemoryImageStore;
pub use retry::{RetryPolicy, RetryingStore};

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores `bytes` under `key` (overwriting) and returns its public URL.
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError>;

    /// Deletes one object, or every object under a prefix ending in `/`.
    /// Returns the number of objects removed.
    async fn delete(&self, key_or_prefix: &str) -> Result<usize, AppError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError>;

    fn base_url(&self) -> &str;

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url().trim_end_matches('/'), key)
    }

    /// Inverse of [`ImageStore::url_for`]; `None` for URLs this store did not issue.
    fn key_for(&self, url: &str) -> Option<String> {
        let key = url
            .strip_prefix(self.base_url().trim_end_matches('/'))?
            .strip_prefix('/')?;
        (!key.is_empty()).then(|| key.to_string())
    }
}

pub fn wish_prefix(user_id: i64, wish_id: i64) -> String {
    format!("user-{}/wish-{}/", user_id, wish_id)
}

pub fn avatar_prefix(user_id: i64) -> String {
    format!("user-{}/avatar/", user_id)
}

/// Rejects keys that could escape the store root.
pub(crate) fn check_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == ".." || part == ".") {
        return Err(AppError::BadRequest(format!("Invalid storage key '{}'", key)));
    }
    Ok(())
}
