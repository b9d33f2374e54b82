use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    error::AppError,
    media::ImageStore,
    services::notify::{Notifier, TracingNotifier},
    storage::{MemoryStore, PgStore, UserRepository, WishRepository},
    utils::crypto::Cipher,
};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub wishes: Arc<dyn WishRepository>,
    pub images: Arc<dyn ImageStore>,
    pub cipher: Arc<Cipher>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Config,
}

impl AppState {
    /// State backed by Postgres.
    pub fn postgres(pool: PgPool, images: Arc<dyn ImageStore>, config: Config) -> Result<Self, AppError> {
        let store = Arc::new(PgStore::new(pool));
        Self::with_store(store.clone(), store, images, config)
    }

    /// State backed by process memory; data is lost on restart.
    pub fn in_memory(images: Arc<dyn ImageStore>, config: Config) -> Result<Self, AppError> {
        let store = Arc::new(MemoryStore::new());
        Self::with_store(store.clone(), store, images, config)
    }

    fn with_store(
        users: Arc<dyn UserRepository>,
        wishes: Arc<dyn WishRepository>,
        images: Arc<dyn ImageStore>,
        config: Config,
    ) -> Result<Self, AppError> {
        Ok(Self {
            users,
            wishes,
            images,
            cipher: Arc::new(Cipher::new(&config.crypto_secret)?),
            notifier: Arc::new(TracingNotifier),
            config,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
