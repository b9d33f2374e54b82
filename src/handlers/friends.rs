use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::{Value, json};

use crate::{
    error::AppError,
    models::user::RelationAction,
    state::AppState,
    utils::jwt::Claims,
};

async fn change(
    state: &AppState,
    claims: &Claims,
    other: i64,
    action: RelationAction,
) -> Result<Json<Value>, AppError> {
    let me = claims.user_id()?;
    let relation = state.users.update_relation(me, other, action).await?;

    tracing::info!("User {} -> {}: {:?} now {:?}", me, other, action, relation);
    Ok(Json(json!({ "userId": other, "relation": relation })))
}

/// Sends a friend request, or accepts one if the other user already follows the caller.
pub async fn add_friend(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    change(&state, &claims, id, RelationAction::AddFriend).await
}

/// Removes a friend (who keeps following the caller) or withdraws a request.
pub async fn remove_friend(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    change(&state, &claims, id, RelationAction::RemoveFriend).await
}
