// src/main.rs

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wishhub::config::Config;
use wishhub::error::AppError;
use wishhub::media::{FsImageStore, ImageStore, RetryPolicy, RetryingStore};
use wishhub::routes;
use wishhub::state::AppState;

const DB_CONNECT_RETRIES: u32 = 5;

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    // Load configuration from environment
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Err(e) = run(config).await {
        tracing::error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let media = Arc::new(FsImageStore::new(&config.media_dir, &config.media_base_url));
    tracing::info!(
        "Storing media in {} (served at {})",
        media.root().display(),
        config.media_base_url
    );
    let images: Arc<dyn ImageStore> = Arc::new(RetryingStore::new(media, RetryPolicy::from_config(&config)));

    let state = match config.database_url.clone() {
        Some(database_url) => {
            let pool = connect(&database_url).await?;

            // Run Migrations Automatically
            tracing::info!("Running migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| AppError::InternalServerError(format!("Migrations failed: {}", e)))?;
            tracing::info!("Migrations applied successfully.");

            AppState::postgres(pool, images, config.clone())?
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, keeping users and wishes in memory");
            AppState::in_memory(images, config.clone())?
        }
    };

    // Create the Axum application router
    let app = routes::create_router(state);

    // Bind to the listening address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Cannot bind {}: {}", addr, e)))?;
    tracing::info!("Listening on {}", addr);

    // Start the server
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Initialize Database Pool with Retry
async fn connect(database_url: &str) -> Result<PgPool, AppError> {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                tracing::info!("Database connected...");
                return Ok(pool);
            }
            Err(e) => {
                retry_count += 1;
                if retry_count > DB_CONNECT_RETRIES {
                    return Err(AppError::InternalServerError(format!(
                        "Failed to connect to database after {} retries: {}",
                        DB_CONNECT_RETRIES, e
                    )));
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
