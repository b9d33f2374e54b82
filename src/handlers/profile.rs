use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    response::IntoResponse,
};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::user::{ProfileUpdate, UserProfile},
    services::{images::NewImage, profile, wishes::require_user},
    state::AppState,
    utils::jwt::Claims,
};

/// The caller's full profile, including relationship sets.
pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&state, claims.user_id()?).await?;
    Ok(Json(user))
}

/// Another user's profile with hidden fields nulled out.
pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&state, id).await?;
    Ok(Json(UserProfile::for_viewer(&user, claims.user_id()?)))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = state.users.update_profile(claims.user_id()?, &payload).await?;
    Ok(Json(user))
}

/// Accepts the first file part of the form as the new avatar.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_none() {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await?;
        image = Some(NewImage {
            position: 1,
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let image = image.ok_or_else(|| AppError::BadRequest("No avatar file was sent".to_string()))?;
    let url = profile::upload_avatar(&state, user_id, image).await?;

    Ok(Json(json!({ "avatar": url })))
}
