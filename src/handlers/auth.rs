// src/handlers/auth.rs

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::user::{CreateUserRequest, LoginRequest, NewUser},
    state::AppState,
    utils::{
        hash::{hash_password, verify_password},
        jwt::sign_jwt,
    },
};

/// Registers a new user.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created and the user object (excluding password).
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let hashed_password = hash_password(&payload.password)?;

    let user = state
        .users
        .create_user(NewUser {
            email: payload.email.trim().to_lowercase(),
            password_hash: hashed_password,
            first_name: payload.first_name.trim().to_string(),
            last_name: payload
                .last_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
        })
        .await
        .map_err(|e| {
            if !matches!(e, AppError::Conflict(_)) {
                tracing::error!("Failed to register user: {:?}", e);
            }
            e
        })?;

    tracing::info!("Registered user {}", user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

/// Authenticates a user and returns a JWT token.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = state
        .users
        .find_user_by_email(payload.email.trim())
        .await?
        .ok_or(AppError::AuthError("Invalid email or password".to_string()))?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(AppError::AuthError("Invalid email or password".to_string()));
    }

    let token = sign_jwt(user.id, &state.config.jwt_secret, state.config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
    })))
}
