// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    handlers::{auth, booking, friends, profile, wishes},
    state::AppState,
    utils::jwt::auth_middleware,
};

/// Assembles the main application router.
///
/// * `/api/auth` is public; every other `/api` route requires a bearer token.
/// * Stored media is served from the media directory under the base URL path.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let user_routes = Router::new()
        .route("/me", get(profile::get_me).put(profile::update_me))
        .route("/me/avatar", post(profile::upload_avatar))
        .route("/{id}", get(profile::get_user))
        .route("/{id}/wishes", get(wishes::list_user_wishes));

    let friend_routes = Router::new().route(
        "/{id}",
        post(friends::add_friend).delete(friends::remove_friend),
    );

    let wish_routes = Router::new()
        .route("/", get(wishes::feed).post(wishes::create_wish))
        .route(
            "/{id}",
            get(wishes::get_wish)
                .put(wishes::update_wish)
                .delete(wishes::delete_wish),
        )
        .route("/{id}/booking", post(booking::book).delete(booking::cancel))
        .route("/{id}/done", post(booking::done))
        .route("/{id}/undone", post(booking::undone))
        .route("/{id}/like", post(wishes::like))
        .route("/{id}/dislike", post(wishes::dislike));

    let protected_routes = Router::new()
        .nest("/api/users", user_routes)
        .nest("/api/friends", friend_routes)
        .nest("/api/wishes", wish_routes)
        .layer(DefaultBodyLimit::max(state.config.body_limit()))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .merge(protected_routes)
        .nest_service(
            &state.config.media_mount(),
            ServeDir::new(&state.config.media_dir),
        )
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
