use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::wish::{BookRequest, DoneRequest},
    services::booking,
    state::AppState,
    utils::jwt::Claims,
};

/// Claims a wish the caller intends to fulfil until `end`.
pub async fn book(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<BookRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = booking::book_wish(&state, claims.user_id()?, id, payload.end).await?;
    Ok(Json(view))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    booking::cancel_book(&state, claims.user_id()?, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Owner marks the wish fulfilled, by themselves (`my`) or by the claimant (`someone`).
pub async fn done(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<DoneRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = booking::done_wish(&state, claims.user_id()?, id, payload.whose).await?;
    Ok(Json(view))
}

pub async fn undone(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = booking::undone_wish(&state, claims.user_id()?, id).await?;
    Ok(Json(view))
}
