//! Wish lifecycle: create, update, delete, read and reactions.

use crate::{
    error::AppError,
    media::wish_prefix,
    models::{
        user::User,
        wish::{Reaction, ReactionKind, Wish, WishPayload, WishView},
    },
    services::{
        images::{self, ImageDirective, NewImage},
        visibility::{Access, can_view, visible_shows},
    },
    state::AppState,
    storage::WishFilter,
};

pub(crate) async fn require_user(state: &AppState, id: i64) -> Result<User, AppError> {
    state
        .users
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
}

pub(crate) async fn require_wish(state: &AppState, id: i64) -> Result<Wish, AppError> {
    state
        .wishes
        .find_wish(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Wish not found".to_string()))
}

/// The wish and its owner, if `viewer_id` may see it. Invisible wishes are
/// reported as missing.
pub(crate) async fn visible_wish(state: &AppState, viewer_id: i64, id: i64) -> Result<(Wish, User), AppError> {
    let wish = require_wish(state, id).await?;
    let owner = require_user(state, wish.user_id).await?;

    if !can_view(wish.show, owner.id, viewer_id, &owner.friends).visible {
        return Err(AppError::NotFound("Wish not found".to_string()));
    }
    Ok((wish, owner))
}

pub(crate) async fn owned_wish(state: &AppState, owner_id: i64, id: i64) -> Result<Wish, AppError> {
    let wish = require_wish(state, id).await?;
    if wish.user_id != owner_id {
        return Err(AppError::AuthError("Only the owner can do this".to_string()));
    }
    Ok(wish)
}

pub(crate) fn view_for(state: &AppState, wish: &Wish, owner: &User, viewer_id: i64) -> Result<WishView, AppError> {
    let access = can_view(wish.show, owner.id, viewer_id, &owner.friends);
    WishView::build(wish, access, &state.cipher)
}

/// Wish names are unique per owner, compared case-insensitively on plaintext.
pub async fn ensure_unique_name(
    state: &AppState,
    owner_id: i64,
    name: &str,
    exclude: Option<i64>,
) -> Result<(), AppError> {
    let wishes = state
        .wishes
        .find_wishes(&WishFilter {
            owner_id: Some(owner_id),
            shows: visible_shows(owner_id, owner_id, &Default::default()),
            executed: None,
        })
        .await?;

    let wanted = name.to_lowercase();
    for wish in wishes.iter().filter(|w| Some(w.id) != exclude) {
        if wish.name.reveal(&state.cipher)?.to_lowercase() == wanted {
            return Err(AppError::BadRequest(format!(
                "You already have a wish named '{}'",
                name
            )));
        }
    }
    Ok(())
}

pub async fn create_wish(
    state: &AppState,
    owner_id: i64,
    payload: WishPayload,
    uploads: Vec<NewImage>,
) -> Result<WishView, AppError> {
    require_user(state, owner_id).await?;

    let plan = images::plan(&[], Vec::new(), uploads, &state.config.image_limits())?;
    let mut content = payload.into_content(Vec::new())?;
    ensure_unique_name(state, owner_id, &content.name, None).await?;

    let draft = Wish::draft(owner_id, content.clone(), &state.cipher)?;
    let mut wish = state.wishes.insert_wish(&draft).await?;

    let mut reconciled = match images::apply(plan, &wish_prefix(owner_id, wish.id), state.images.as_ref()).await {
        Ok(reconciled) => reconciled,
        Err(e) => {
            if let Err(cleanup) = state.wishes.delete_wish(wish.id).await {
                tracing::warn!("Could not remove wish {} after failed upload: {}", wish.id, cleanup);
            }
            return Err(e);
        }
    };

    content.images = reconciled.images.clone();
    let saved = match wish.set_content(content, &state.cipher) {
        Ok(()) => state.wishes.save_wish(&wish).await,
        Err(e) => Err(e),
    };
    let wish = match saved {
        Ok(saved) => saved,
        Err(e) => {
            reconciled.rollback(state.images.as_ref()).await;
            if let Err(cleanup) = state.wishes.delete_wish(wish.id).await {
                tracing::warn!("Could not remove wish {} after failed save: {}", wish.id, cleanup);
            }
            return Err(e);
        }
    };
    reconciled.commit(state.images.as_ref()).await;

    tracing::info!(
        "User {} created wish {} ({}, {} images)",
        owner_id,
        wish.id,
        wish.show.as_str(),
        wish.images.len()
    );
    WishView::build(&wish, Access::full(), &state.cipher)
}

pub async fn update_wish(
    state: &AppState,
    owner_id: i64,
    wish_id: i64,
    payload: WishPayload,
    directives: Vec<ImageDirective>,
    uploads: Vec<NewImage>,
) -> Result<WishView, AppError> {
    let mut wish = owned_wish(state, owner_id, wish_id).await?;
    let current = wish.reveal(&state.cipher)?;

    let plan = images::plan(&current.images, directives, uploads, &state.config.image_limits())?;
    let mut content = payload.into_content(Vec::new())?;
    ensure_unique_name(state, owner_id, &content.name, Some(wish_id)).await?;

    let previous_show = wish.show;
    let mut reconciled = images::apply(plan, &wish_prefix(owner_id, wish_id), state.images.as_ref()).await?;
    content.images = reconciled.images.clone();

    // Seals every restricted field for the (possibly new) visibility.
    wish.set_content(content, &state.cipher)?;
    let wish = match state.wishes.save_wish(&wish).await {
        Ok(saved) => saved,
        Err(e) => {
            reconciled.rollback(state.images.as_ref()).await;
            return Err(e);
        }
    };
    reconciled.commit(state.images.as_ref()).await;

    if previous_show != wish.show {
        tracing::info!(
            "Wish {} visibility changed from {} to {}",
            wish.id,
            previous_show.as_str(),
            wish.show.as_str()
        );
    }
    tracing::info!("User {} updated wish {}", owner_id, wish.id);
    WishView::build(&wish, Access::full(), &state.cipher)
}

/// Removes the wish, then every stored object under its prefix.
pub async fn delete_wish(state: &AppState, owner_id: i64, wish_id: i64) -> Result<(), AppError> {
    owned_wish(state, owner_id, wish_id).await?;

    if !state.wishes.delete_wish(wish_id).await? {
        return Err(AppError::NotFound("Wish not found".to_string()));
    }

    let prefix = wish_prefix(owner_id, wish_id);
    match state.images.delete(&prefix).await {
        Ok(count) => tracing::info!("User {} deleted wish {} ({} images)", owner_id, wish_id, count),
        Err(e) => tracing::warn!("Wish {} deleted but objects under {} remain: {}", wish_id, prefix, e),
    }
    Ok(())
}

pub async fn get_wish(state: &AppState, viewer_id: i64, wish_id: i64) -> Result<WishView, AppError> {
    let (wish, owner) = visible_wish(state, viewer_id, wish_id).await?;
    view_for(state, &wish, &owner, viewer_id)
}

/// Toggles a like or dislike by `viewer_id`.
pub async fn react(
    state: &AppState,
    viewer_id: i64,
    wish_id: i64,
    kind: ReactionKind,
) -> Result<WishView, AppError> {
    let (_, owner) = visible_wish(state, viewer_id, wish_id).await?;
    let viewer = require_user(state, viewer_id).await?;

    let wish = state
        .wishes
        .react(wish_id, Reaction::from_user(&viewer), kind)
        .await?
        .ok_or_else(|| AppError::NotFound("Wish not found".to_string()))?;

    view_for(state, &wish, &owner, viewer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::wish::{Sealed, Show};
    use crate::services::test_support::{befriend, failing_writes, payload, state, user};

    fn png(position: u32, body: &str) -> NewImage {
        NewImage {
            position,
            file_name: Some("pic.png".to_string()),
            content_type: "image/png".to_string(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn create_stores_images_under_the_wish_prefix() {
        let (state, store) = state();
        let owner = user(&state, "owner").await;

        let view = create_wish(&state, owner, payload("Camera", Show::All), vec![png(1, "a"), png(2, "b")])
            .await
            .unwrap();

        assert_eq!(view.images.len(), 2);
        let prefix = wish_prefix(owner, view.id);
        assert_eq!(store.keys().iter().filter(|k| k.starts_with(&prefix)).count(), 2);
        assert_eq!(view.images[1].position, 2);
    }

    #[tokio::test]
    async fn friends_wish_is_encrypted_and_hidden_from_strangers() {
        let (state, _) = state();
        let owner = user(&state, "owner").await;
        let friend = user(&state, "friend").await;
        let stranger = user(&state, "stranger").await;
        befriend(&state, owner, friend).await;

        let view = create_wish(&state, owner, payload("Watch", Show::Friends), vec![png(1, "w")])
            .await
            .unwrap();

        let stored = state.wishes.find_wish(view.id).await.unwrap().unwrap();
        assert!(stored.name.is_encrypted());
        assert!(stored.images[0].path.is_encrypted());

        let seen = get_wish(&state, friend, view.id).await.unwrap();
        assert_eq!(seen.name.as_deref(), Some("Watch"));
        assert_eq!(seen.price.map(|p| p.to_string()).as_deref(), Some("99.90"));

        let err = get_wish(&state, stranger, view.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_converts_stored_fields_for_new_visibility() {
        let (state, _) = state();
        let owner = user(&state, "owner").await;
        let view = create_wish(&state, owner, payload("Lamp", Show::Nobody), Vec::new())
            .await
            .unwrap();

        update_wish(&state, owner, view.id, payload("Lamp", Show::All), Vec::new(), Vec::new())
            .await
            .unwrap();

        let stored = state.wishes.find_wish(view.id).await.unwrap().unwrap();
        assert_eq!(stored.name, Sealed::Plain("Lamp".to_string()));
        assert!(!stored.price.as_ref().unwrap().is_encrypted());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let (state, _) = state();
        let owner = user(&state, "owner").await;
        create_wish(&state, owner, payload("Guitar", Show::Friends), Vec::new())
            .await
            .unwrap();

        let err = create_wish(&state, owner, payload("guitar", Show::All), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn only_the_owner_may_update_or_delete() {
        let (state, _) = state();
        let owner = user(&state, "owner").await;
        let other = user(&state, "other").await;
        let view = create_wish(&state, owner, payload("Boat", Show::All), Vec::new())
            .await
            .unwrap();

        let err = update_wish(&state, other, view.id, payload("Boat", Show::All), Vec::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthError(_)));
        assert!(matches!(
            delete_wish(&state, other, view.id).await,
            Err(AppError::AuthError(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_every_object_of_the_wish() {
        let (state, store) = state();
        let owner = user(&state, "owner").await;
        let view = create_wish(&state, owner, payload("Tent", Show::All), vec![png(1, "t1"), png(2, "t2")])
            .await
            .unwrap();

        delete_wish(&state, owner, view.id).await.unwrap();

        assert!(store.keys().is_empty());
        assert!(state.wishes.find_wish(view.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_upload_leaves_no_wish_behind() {
        let (state, _) = state();
        let failing = std::sync::Arc::new(crate::media::MemoryImageStore::new("http://media.test").failing_next(1));
        let state = AppState {
            images: failing.clone(),
            ..state
        };
        let owner = user(&state, "owner").await;

        let err = create_wish(&state, owner, payload("Drone", Show::All), vec![png(1, "d")])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::StorageError(_)));
        assert!(require_user(&state, owner).await.unwrap().wish_list.is_empty());
        assert!(failing.keys().is_empty());
    }

    #[tokio::test]
    async fn failed_save_keeps_the_stored_images() {
        let (state, store) = state();
        let owner = user(&state, "owner").await;
        let view = create_wish(&state, owner, payload("Bike", Show::All), vec![png(1, "b1"), png(2, "b2")])
            .await
            .unwrap();
        let before = store.keys();

        let paths = |images: &[crate::models::wish::ImageView]| -> Vec<Option<String>> {
            images.iter().map(|image| image.path.clone()).collect()
        };
        let directives = vec![ImageDirective::Delete {
            path: view.images[0].path.clone().unwrap(),
        }];
        let err = update_wish(
            &failing_writes(&state),
            owner,
            view.id,
            payload("Bike", Show::All),
            directives,
            vec![png(1, "b1"), png(3, "b3")],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::InternalServerError(_)));
        let mut after = store.keys();
        after.sort();
        let mut expected = before;
        expected.sort();
        assert_eq!(after, expected);
        let stored = get_wish(&state, owner, view.id).await.unwrap();
        assert_eq!(paths(&stored.images), paths(&view.images));
    }

    #[tokio::test]
    async fn reactions_toggle_and_switch() {
        let (state, _) = state();
        let owner = user(&state, "owner").await;
        let fan = user(&state, "fan").await;
        let view = create_wish(&state, owner, payload("Book", Show::All), Vec::new())
            .await
            .unwrap();

        let liked = react(&state, fan, view.id, ReactionKind::Like).await.unwrap();
        assert_eq!(liked.sort_by_likes, 1);
        assert_eq!(liked.likes[0].user_full_name, "fan");

        let disliked = react(&state, fan, view.id, ReactionKind::Dislike).await.unwrap();
        assert_eq!(disliked.sort_by_likes, -1);
        assert!(disliked.likes.is_empty());

        let cleared = react(&state, fan, view.id, ReactionKind::Dislike).await.unwrap();
        assert_eq!(cleared.sort_by_likes, 0);
        assert!(cleared.dislikes.is_empty());
    }
}
