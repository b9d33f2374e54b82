use crate::{
    config::ImageLimits,
    error::AppError,
    media::avatar_prefix,
    models::wish::ImageSlot,
    services::{
        images::{self, ImageDirective, NewImage},
        wishes::require_user,
    },
    state::AppState,
};

/// Stores a new avatar under `user-{id}/avatar/` and drops the previous one.
/// Returns the avatar URL.
pub async fn upload_avatar(state: &AppState, user_id: i64, image: NewImage) -> Result<String, AppError> {
    let user = require_user(state, user_id).await?;

    let limits = ImageLimits {
        max_files: 1,
        ..state.config.image_limits()
    };
    // The old avatar is planned as a delete so it survives a rollback and is
    // only removed once the new URL is stored.
    let current: Vec<ImageSlot> = user
        .avatar
        .iter()
        .map(|path| ImageSlot {
            path: path.clone(),
            position: 1,
        })
        .collect();
    let directives = current
        .iter()
        .map(|slot| ImageDirective::Delete { path: slot.path.clone() })
        .collect();
    let plan = images::plan(&current, directives, vec![image], &limits)?;
    let mut uploaded = images::apply(plan, &avatar_prefix(user_id), state.images.as_ref()).await?;

    let url = uploaded
        .images
        .first()
        .map(|slot| slot.path.clone())
        .ok_or_else(|| AppError::InternalServerError("Avatar upload produced no image".to_string()))?;

    if let Err(e) = state.users.set_avatar(user_id, Some(url.clone())).await {
        uploaded.rollback(state.images.as_ref()).await;
        return Err(e);
    }
    uploaded.commit(state.images.as_ref()).await;

    tracing::info!("User {} uploaded a new avatar", user_id);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use crate::media::ImageStore;
    use super::*;
    use crate::services::test_support::{failing_writes, state, user};

    fn image(body: &str) -> NewImage {
        NewImage {
            position: 1,
            file_name: Some("me.jpg".to_string()),
            content_type: "image/jpeg".to_string(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn new_avatar_replaces_the_old_one() {
        let (state, store) = state();
        let id = user(&state, "ava").await;

        let first = upload_avatar(&state, id, image("first")).await.unwrap();
        assert!(first.starts_with(&format!("http://media.test/user-{}/avatar/", id)));

        let second = upload_avatar(&state, id, image("second")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.keys().len(), 1);
        assert_eq!(require_user(&state, id).await.unwrap().avatar, Some(second));
    }

    #[tokio::test]
    async fn failed_save_keeps_the_current_avatar() {
        let (state, store) = state();
        let id = user(&state, "ava").await;
        let current = upload_avatar(&state, id, image("same")).await.unwrap();

        let broken = failing_writes(&state);
        assert!(upload_avatar(&broken, id, image("same")).await.is_err());
        assert!(upload_avatar(&broken, id, image("other")).await.is_err());

        assert_eq!(store.keys(), vec![store.key_for(&current).unwrap()]);
        assert_eq!(require_user(&state, id).await.unwrap().avatar, Some(current));
    }

    #[tokio::test]
    async fn rejects_unsupported_files() {
        let (state, store) = state();
        let id = user(&state, "ava").await;

        let mut bad = image("x");
        bad.file_name = Some("me.svg".to_string());
        bad.content_type = "image/svg+xml".to_string();

        assert!(matches!(
            upload_avatar(&state, id, bad).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(store.keys().is_empty());
    }
}
