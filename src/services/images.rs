//! Reconciles a wish's ordered image list with client directives and uploads.
//!
//! [`plan`] is pure and validates the whole request; [`apply`] performs the
//! uploads and a failed upload rolls back the uploads made for the same
//! request. Objects dropped from the list are only removed by
//! [`Reconciled::commit`], once the caller has persisted the new list.

use std::collections::HashSet;

use crate::{
    config::ImageLimits,
    error::AppError,
    media::ImageStore,
    models::wish::{ImageDirectivePayload, ImageSlot},
    utils::crypto::content_hash,
};

const SLOT_PREFIX: &str = "image-";

/// Position encoded in a multipart field name such as `image-3`.
pub fn parse_slot(field: &str) -> Option<u32> {
    field
        .strip_prefix(SLOT_PREFIX)?
        .parse::<u32>()
        .ok()
        .filter(|n| *n >= 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageDirective {
    Keep { path: String, position: u32 },
    Delete { path: String },
}

impl ImageDirective {
    pub fn from_payload(slot: u32, payload: ImageDirectivePayload) -> Self {
        if payload.delete {
            ImageDirective::Delete { path: payload.path }
        } else {
            ImageDirective::Keep {
                path: payload.path,
                position: payload.position.unwrap_or(slot),
            }
        }
    }

    fn path(&self) -> &str {
        match self {
            ImageDirective::Keep { path, .. } | ImageDirective::Delete { path } => path,
        }
    }
}

/// A file received in an `image-<n>` slot.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub position: u32,
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct PlannedUpload {
    position: u32,
    name: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// A validated reconciliation, ready to be applied.
#[derive(Debug, Clone)]
pub struct ImagePlan {
    kept: Vec<ImageSlot>,
    uploads: Vec<PlannedUpload>,
    deletes: Vec<String>,
    previous: Vec<String>,
}

/// Object-store effect of an applied plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Uploaded { key: String, url: String },
    Deleted { key: String },
    /// The object could not be deleted and is no longer referenced.
    Orphaned { key: String },
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub images: Vec<ImageSlot>,
    pub ops: Vec<StoreOp>,
    /// Paths referenced before this request; a rollback never removes them.
    previous: Vec<String>,
    /// Paths dropped from the list, removed on commit.
    pending_deletes: Vec<String>,
}

impl Reconciled {
    /// Removes the objects dropped from the list. Call only after the new
    /// list has been persisted.
    pub async fn commit(&mut self, store: &dyn ImageStore) {
        for path in std::mem::take(&mut self.pending_deletes) {
            let Some(key) = store.key_for(&path) else {
                tracing::debug!("Dropping image {} not issued by this store", path);
                continue;
            };
            match store.delete(&key).await {
                Ok(_) => self.ops.push(StoreOp::Deleted { key }),
                Err(e) => {
                    tracing::warn!("Could not delete image {}, leaving it orphaned: {}", key, e);
                    self.ops.push(StoreOp::Orphaned { key });
                }
            }
        }
    }

    /// Undoes this request's uploads after the new list failed to persist.
    pub async fn rollback(&self, store: &dyn ImageStore) {
        let previous: Vec<&str> = self.previous.iter().map(String::as_str).collect();
        discard_uploads(&self.ops, &previous, store).await;
    }
}

/// Lowercased extension taken from the file name, or from the content type.
fn extension_of(image: &NewImage) -> Option<String> {
    image
        .file_name
        .as_deref()
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext))
        .or_else(|| image.content_type.strip_prefix("image/"))
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Validates everything and works out the target state without touching the store.
pub fn plan(
    existing: &[ImageSlot],
    directives: Vec<ImageDirective>,
    uploads: Vec<NewImage>,
    limits: &ImageLimits,
) -> Result<ImagePlan, AppError> {
    let mut named = HashSet::new();
    for directive in &directives {
        if !existing.iter().any(|image| image.path == directive.path()) {
            return Err(AppError::BadRequest(format!(
                "Image '{}' does not belong to this wish",
                directive.path()
            )));
        }
        if !named.insert(directive.path().to_string()) {
            return Err(AppError::BadRequest(format!(
                "Image '{}' is referenced more than once",
                directive.path()
            )));
        }
        if let ImageDirective::Keep { position: 0, .. } = directive {
            return Err(AppError::BadRequest("Image positions start at 1".to_string()));
        }
    }

    let mut kept = Vec::new();
    let mut deletes = Vec::new();
    for image in existing {
        match directives.iter().find(|d| d.path() == image.path) {
            Some(ImageDirective::Delete { path }) => deletes.push(path.clone()),
            Some(ImageDirective::Keep { path, position }) => kept.push(ImageSlot {
                path: path.clone(),
                position: *position,
            }),
            None => kept.push(image.clone()),
        }
    }

    if kept.len() + uploads.len() > limits.max_files {
        return Err(AppError::BadRequest(format!(
            "A wish can have at most {} images",
            limits.max_files
        )));
    }

    let mut positions = HashSet::new();
    let mut planned = Vec::with_capacity(uploads.len());
    for upload in uploads {
        if upload.position == 0 || !positions.insert(upload.position) {
            return Err(AppError::BadRequest(format!(
                "Invalid or duplicate image slot {}",
                upload.position
            )));
        }
        if upload.bytes.is_empty() {
            return Err(AppError::BadRequest(format!("Image {} is empty", upload.position)));
        }
        if upload.bytes.len() > limits.max_file_size {
            return Err(AppError::BadRequest(format!(
                "Image {} exceeds the maximum size of {} bytes",
                upload.position, limits.max_file_size
            )));
        }
        let ext = extension_of(&upload)
            .filter(|ext| limits.allowed_extensions.contains(ext))
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Image {} must be one of: {}",
                    upload.position,
                    limits.allowed_extensions.join(", ")
                ))
            })?;

        planned.push(PlannedUpload {
            position: upload.position,
            name: format!("{}.{}", content_hash(&upload.bytes), ext),
            content_type: upload.content_type,
            bytes: upload.bytes,
        });
    }

    Ok(ImagePlan {
        kept,
        uploads: planned,
        deletes,
        previous: existing.iter().map(|image| image.path.clone()).collect(),
    })
}

/// Performs the plan's uploads under `prefix` and returns the final,
/// contiguously numbered image list. Nothing is deleted here.
pub async fn apply(plan: ImagePlan, prefix: &str, store: &dyn ImageStore) -> Result<Reconciled, AppError> {
    let mut ops = Vec::new();
    // (position, rank, path); existing images rank before new ones on ties
    let mut candidates: Vec<(u32, u8, String)> = plan
        .kept
        .iter()
        .map(|image| (image.position, 0, image.path.clone()))
        .collect();

    for upload in &plan.uploads {
        let key = format!("{}{}", prefix, upload.name);
        match store.upload(&key, &upload.bytes, &upload.content_type).await {
            Ok(url) => {
                ops.push(StoreOp::Uploaded { key, url: url.clone() });
                candidates.push((upload.position, 1, url));
            }
            Err(e) => {
                tracing::warn!("Upload of {} failed, rolling back this request's uploads", key);
                // Identical bytes map to the same key, so an upload may have
                // overwritten an object the wish already referenced.
                let previous: Vec<&str> = plan.previous.iter().map(String::as_str).collect();
                discard_uploads(&ops, &previous, store).await;
                return Err(e);
            }
        }
    }

    candidates.sort_by_key(|(position, rank, _)| (*position, *rank));

    let mut seen = HashSet::new();
    let images: Vec<ImageSlot> = candidates
        .into_iter()
        .filter(|(_, _, path)| seen.insert(path.clone()))
        .enumerate()
        .map(|(idx, (_, _, path))| ImageSlot {
            path,
            position: idx as u32 + 1,
        })
        .collect();

    let pending_deletes = plan
        .deletes
        .into_iter()
        .filter(|path| !images.iter().any(|image| image.path == *path))
        .collect();

    Ok(Reconciled {
        images,
        ops,
        previous: plan.previous,
        pending_deletes,
    })
}

/// Best-effort removal of objects uploaded by `ops`, skipping any still
/// referenced by `keep`.
async fn discard_uploads(ops: &[StoreOp], keep: &[&str], store: &dyn ImageStore) {
    for op in ops {
        let StoreOp::Uploaded { key, url } = op else {
            continue;
        };
        if keep.contains(&url.as_str()) {
            continue;
        }
        if let Err(e) = store.delete(key).await {
            tracing::warn!("Could not roll back upload {}, leaving it orphaned: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_extensions;
    use crate::media::MemoryImageStore;

    const PREFIX: &str = "user-1/wish-1/";

    fn limits(max_files: usize) -> ImageLimits {
        ImageLimits {
            max_files,
            max_file_size: 1024,
            allowed_extensions: default_extensions(),
        }
    }

    fn png(position: u32, body: &str) -> NewImage {
        NewImage {
            position,
            file_name: Some(format!("photo-{}.PNG", position)),
            content_type: "image/png".to_string(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    async fn seeded(store: &MemoryImageStore, bodies: &[&str]) -> Vec<ImageSlot> {
        let uploads = bodies
            .iter()
            .enumerate()
            .map(|(idx, body)| png(idx as u32 + 1, body))
            .collect();
        let plan = plan(&[], Vec::new(), uploads, &limits(10)).unwrap();
        apply(plan, PREFIX, store).await.unwrap().images
    }

    #[test]
    fn slots_are_one_based() {
        assert_eq!(parse_slot("image-3"), Some(3));
        assert_eq!(parse_slot("image-0"), None);
        assert_eq!(parse_slot("image-x"), None);
        assert_eq!(parse_slot("data"), None);
    }

    #[tokio::test]
    async fn deleting_the_middle_image_renumbers_the_rest() {
        let store = MemoryImageStore::new("http://m");
        let existing = seeded(&store, &["one", "two", "three"]).await;

        let directives = vec![ImageDirective::Delete {
            path: existing[1].path.clone(),
        }];
        let plan = plan(&existing, directives, Vec::new(), &limits(10)).unwrap();
        let mut result = apply(plan, PREFIX, &store).await.unwrap();
        let deleted_key = store.key_for(&existing[1].path).unwrap();
        assert!(store.contains(&deleted_key), "deletes wait for commit");
        result.commit(&store).await;

        assert_eq!(
            result.images,
            vec![
                ImageSlot { path: existing[0].path.clone(), position: 1 },
                ImageSlot { path: existing[2].path.clone(), position: 2 },
            ]
        );
        assert!(!store.contains(&deleted_key));
        assert_eq!(result.ops, vec![StoreOp::Deleted { key: deleted_key }]);
    }

    #[tokio::test]
    async fn too_many_images_upload_nothing() {
        let store = MemoryImageStore::new("http://m");
        let uploads = (1..=11).map(|n| png(n, &format!("img{}", n))).collect();

        let err = plan(&[], Vec::new(), uploads, &limits(10)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(store.upload_count(), 0);
    }

    #[tokio::test]
    async fn existing_images_win_position_ties() {
        let store = MemoryImageStore::new("http://m");
        let existing = seeded(&store, &["one", "two"]).await;

        let plan = plan(&existing, Vec::new(), vec![png(2, "new")], &limits(10)).unwrap();
        let result = apply(plan, PREFIX, &store).await.unwrap();

        let paths: Vec<&str> = result.images.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths[0], existing[0].path);
        assert_eq!(paths[1], existing[1].path);
        assert!(paths[2].ends_with(".png"));
        assert_eq!(result.images[2].position, 3);
    }

    #[tokio::test]
    async fn keep_directive_moves_an_image() {
        let store = MemoryImageStore::new("http://m");
        let existing = seeded(&store, &["one", "two"]).await;

        let directives = vec![ImageDirective::from_payload(
            1,
            ImageDirectivePayload {
                path: existing[0].path.clone(),
                delete: false,
                position: Some(5),
            },
        )];
        let plan = plan(&existing, directives, Vec::new(), &limits(10)).unwrap();
        let result = apply(plan, PREFIX, &store).await.unwrap();

        assert_eq!(result.images[0].path, existing[1].path);
        assert_eq!(result.images[1].path, existing[0].path);
        assert_eq!(result.images[1].position, 2);
    }

    #[tokio::test]
    async fn failed_upload_rolls_back_earlier_uploads() {
        let store = MemoryImageStore::new("http://m").failing_after(1);

        let plan = plan(&[], Vec::new(), vec![png(1, "a"), png(2, "b")], &limits(10)).unwrap();
        let err = apply(plan, PREFIX, &store).await.unwrap_err();

        assert!(matches!(err, AppError::StorageError(_)));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_is_reported_as_orphaned() {
        let store = MemoryImageStore::new("http://m");
        let existing = seeded(&store, &["one"]).await;
        store.set_failing_deletes(true);

        let directives = vec![ImageDirective::Delete {
            path: existing[0].path.clone(),
        }];
        let plan = plan(&existing, directives, vec![png(1, "fresh")], &limits(10)).unwrap();
        let mut result = apply(plan, PREFIX, &store).await.unwrap();
        result.commit(&store).await;

        assert_eq!(result.images.len(), 1);
        assert_ne!(result.images[0].path, existing[0].path);
        assert!(matches!(result.ops.last(), Some(StoreOp::Orphaned { .. })));
    }

    #[tokio::test]
    async fn rollback_spares_reuploaded_images_marked_for_delete() {
        // Seeding spends one upload, re-sending "one" the second.
        let store = MemoryImageStore::new("http://m").failing_after(2);
        let existing = seeded(&store, &["one"]).await;

        let directives = vec![ImageDirective::Delete {
            path: existing[0].path.clone(),
        }];
        let uploads = vec![png(1, "one"), png(2, "other")];
        let plan = plan(&existing, directives, uploads, &limits(10)).unwrap();
        let err = apply(plan, PREFIX, &store).await.unwrap_err();

        assert!(matches!(err, AppError::StorageError(_)));
        assert!(store.contains(&store.key_for(&existing[0].path).unwrap()));
    }

    #[tokio::test]
    async fn rollback_after_a_failed_save_keeps_previous_images() {
        let store = MemoryImageStore::new("http://m");
        let existing = seeded(&store, &["one"]).await;

        let directives = vec![ImageDirective::Delete {
            path: existing[0].path.clone(),
        }];
        let uploads = vec![png(1, "one"), png(2, "new")];
        let plan = plan(&existing, directives, uploads, &limits(10)).unwrap();
        let result = apply(plan, PREFIX, &store).await.unwrap();
        assert_eq!(store.keys().len(), 2);

        result.rollback(&store).await;
        assert_eq!(store.keys(), vec![store.key_for(&existing[0].path).unwrap()]);
    }

    #[test]
    fn rejects_bad_files_and_unknown_paths() {
        let mut gif = png(1, "x");
        gif.file_name = Some("movie.mp4".to_string());
        assert!(plan(&[], Vec::new(), vec![gif], &limits(10)).is_err());

        let big = NewImage {
            bytes: vec![0; 2048],
            ..png(1, "x")
        };
        assert!(plan(&[], Vec::new(), vec![big], &limits(10)).is_err());

        let empty = png(1, "");
        assert!(plan(&[], Vec::new(), vec![empty], &limits(10)).is_err());

        let unknown = vec![ImageDirective::Delete {
            path: "http://m/elsewhere.png".to_string(),
        }];
        assert!(plan(&[], unknown, Vec::new(), &limits(10)).is_err());
    }
}
