use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{ImageStore, check_key};
use crate::error::AppError;

/// Stores objects as files under a root directory; the router serves that
/// directory back under the configured base URL.
pub struct FsImageStore {
    root: PathBuf,
    base_url: String,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        check_key(key)?;
        Ok(self.root.join(key.trim_end_matches('/')))
    }

    /// Collects every file below `dir` as a store key.
    async fn walk(&self, dir: PathBuf) -> Result<Vec<String>, AppError> {
        let mut keys = Vec::new();
        let mut pending = vec![dir];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(storage_error("list", &dir, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| storage_error("list", &dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| storage_error("list", &path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn storage_error(op: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::StorageError(format!("{} {}: {}", op, path.display(), err))
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn upload(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, AppError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("mkdir", parent, e))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| storage_error("write", &path, e))?;

        tracing::debug!("Stored {} ({} bytes)", key, bytes.len());
        Ok(self.url_for(key))
    }

    async fn delete(&self, key_or_prefix: &str) -> Result<usize, AppError> {
        let path = self.path_for(key_or_prefix)?;

        if key_or_prefix.ends_with('/') {
            let count = self.walk(path.clone()).await?.len();
            match fs::remove_dir_all(&path).await {
                Ok(()) => Ok(count),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(storage_error("delete", &path, e)),
            }
        } else {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(1),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(storage_error("delete", &path, e)),
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let mut keys = self.walk(self.root.clone()).await?;
        keys.retain(|k| k.starts_with(prefix));
        Ok(keys)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
