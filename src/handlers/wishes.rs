use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::wish::{ImageDirectivePayload, ReactionKind, WishPayload},
    services::{
        images::{ImageDirective, NewImage, parse_slot},
        query::{self, SortSpec, WishListParams},
        wishes,
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Parsed wish form: a `data` JSON part plus `image-<n>` parts. A part with a
/// file name is an upload for slot `n`; a text part is a JSON directive about
/// an existing image. A slot may carry one of each, so a delete directive and
/// a file in the same slot replace that image.
struct WishForm {
    payload: WishPayload,
    directives: Vec<ImageDirective>,
    uploads: Vec<NewImage>,
}

async fn read_form(mut multipart: Multipart) -> Result<WishForm, AppError> {
    let mut payload = None;
    let mut directives = Vec::new();
    let mut uploads = Vec::new();
    let mut upload_slots = HashSet::new();
    let mut directive_slots = HashSet::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "data" {
            let text = field.text().await?;
            payload = Some(serde_json::from_str::<WishPayload>(&text)?);
            continue;
        }

        let slot = parse_slot(&name)
            .ok_or_else(|| AppError::BadRequest(format!("Unexpected form field '{}'", name)))?;
        let is_file = field.file_name().is_some();
        let fresh = if is_file {
            upload_slots.insert(slot)
        } else {
            directive_slots.insert(slot)
        };
        if !fresh {
            return Err(AppError::BadRequest(format!("Slot '{}' was sent twice", name)));
        }

        if is_file {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await?;
            uploads.push(NewImage {
                position: slot,
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let text = field.text().await?;
            let directive: ImageDirectivePayload = serde_json::from_str(&text)?;
            directives.push(ImageDirective::from_payload(slot, directive));
        }
    }

    let payload = payload.ok_or_else(|| AppError::BadRequest("Missing 'data' part".to_string()))?;
    Ok(WishForm {
        payload,
        directives,
        uploads,
    })
}

/// Public wishes of everyone, most liked first by default.
pub async fn feed(
    State(state): State<AppState>,
    Query(params): Query<WishListParams>,
) -> Result<impl IntoResponse, AppError> {
    let response = query::feed(&state, params.into_query(SortSpec::MOST_LIKED)?).await?;
    Ok(Json(response))
}

/// Wishes of one user that the caller may see.
pub async fn list_user_wishes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
    Query(params): Query<WishListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.into_query(SortSpec::NEWEST)?;
    let response = query::list_wishes(&state, claims.user_id()?, user_id, query).await?;
    Ok(Json(response))
}

pub async fn create_wish(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_form(multipart).await?;
    if !form.directives.is_empty() {
        return Err(AppError::BadRequest(
            "A new wish has no existing images to refer to".to_string(),
        ));
    }

    let view = wishes::create_wish(&state, claims.user_id()?, form.payload, form.uploads).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_wish(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = wishes::get_wish(&state, claims.user_id()?, id).await?;
    Ok(Json(view))
}

pub async fn update_wish(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_form(multipart).await?;
    let view = wishes::update_wish(
        &state,
        claims.user_id()?,
        id,
        form.payload,
        form.directives,
        form.uploads,
    )
    .await?;
    Ok(Json(view))
}

pub async fn delete_wish(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    wishes::delete_wish(&state, claims.user_id()?, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = wishes::react(&state, claims.user_id()?, id, ReactionKind::Like).await?;
    Ok(Json(view))
}

pub async fn dislike(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = wishes::react(&state, claims.user_id()?, id, ReactionKind::Dislike).await?;
    Ok(Json(view))
}
