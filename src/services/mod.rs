pub mod booking;
pub mod images;
pub mod notify;
pub mod profile;
pub mod query;
pub mod visibility;
pub mod wishes;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::{
        config::{Config, default_extensions},
        error::AppError,
        media::MemoryImageStore,
        models::{
            user::{NewUser, Outcome, ProfileUpdate, RelationAction, RelationState, User},
            wish::{Booking, Currency, Reaction, ReactionKind, Show, Wish, WishPayload},
        },
        state::AppState,
        storage::{UserRepository, WishFilter, WishRepository},
    };

    pub fn config() -> Config {
        Config {
            database_url: None,
            jwt_secret: "test-jwt".to_string(),
            jwt_expiration: 3600,
            crypto_secret: "test-crypto".to_string(),
            rust_log: "debug".to_string(),
            port: 0,
            media_dir: "media".to_string(),
            media_base_url: "http://media.test".to_string(),
            max_file_size_mb: 1,
            max_number_of_files: 10,
            allowed_extensions: default_extensions(),
            store_retry_attempts: 1,
        }
    }

    pub fn state() -> (AppState, Arc<MemoryImageStore>) {
        let images = Arc::new(MemoryImageStore::new("http://media.test"));
        let state = AppState::in_memory(images.clone(), config()).unwrap();
        (state, images)
    }

    pub async fn user(state: &AppState, name: &str) -> i64 {
        state
            .users
            .create_user(NewUser {
                email: format!("{}@example.com", name),
                password_hash: "hash".to_string(),
                first_name: name.to_string(),
                last_name: None,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn befriend(state: &AppState, a: i64, b: i64) {
        state.users.update_relation(a, b, RelationAction::AddFriend).await.unwrap();
        state.users.update_relation(b, a, RelationAction::AddFriend).await.unwrap();
    }

    pub fn payload(name: &str, show: Show) -> WishPayload {
        WishPayload {
            material: true,
            show,
            name: name.to_string(),
            price: Some("99.90".to_string()),
            currency: Some(Currency::Usd),
            addresses: Vec::new(),
            description: Some(format!("About {}", name)),
        }
    }

    /// Delegates to the wrapped repositories except for `set_avatar` and
    /// `save_wish`, which always fail.
    pub struct FailingWrites {
        users: Arc<dyn UserRepository>,
        wishes: Arc<dyn WishRepository>,
    }

    /// `state` with avatar and wish saves failing over the same data.
    pub fn failing_writes(state: &AppState) -> AppState {
        let store = Arc::new(FailingWrites {
            users: state.users.clone(),
            wishes: state.wishes.clone(),
        });
        AppState {
            users: store.clone(),
            wishes: store,
            ..state.clone()
        }
    }

    fn write_failed() -> AppError {
        AppError::InternalServerError("write failed".to_string())
    }

    #[async_trait]
    impl UserRepository for FailingWrites {
        async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
            self.users.create_user(new_user).await
        }

        async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
            self.users.find_user(id).await
        }

        async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
            self.users.find_user_by_email(email).await
        }

        async fn update_profile(&self, id: i64, update: &ProfileUpdate) -> Result<User, AppError> {
            self.users.update_profile(id, update).await
        }

        async fn set_avatar(&self, _id: i64, _avatar: Option<String>) -> Result<(), AppError> {
            Err(write_failed())
        }

        async fn update_relation(
            &self,
            actor: i64,
            other: i64,
            action: RelationAction,
        ) -> Result<RelationState, AppError> {
            self.users.update_relation(actor, other, action).await
        }

        async fn record_outcome(&self, id: i64, outcome: Outcome) -> Result<(), AppError> {
            self.users.record_outcome(id, outcome).await
        }
    }

    #[async_trait]
    impl WishRepository for FailingWrites {
        async fn insert_wish(&self, wish: &Wish) -> Result<Wish, AppError> {
            self.wishes.insert_wish(wish).await
        }

        async fn find_wish(&self, id: i64) -> Result<Option<Wish>, AppError> {
            self.wishes.find_wish(id).await
        }

        async fn save_wish(&self, _wish: &Wish) -> Result<Wish, AppError> {
            Err(write_failed())
        }

        async fn delete_wish(&self, id: i64) -> Result<bool, AppError> {
            self.wishes.delete_wish(id).await
        }

        async fn find_wishes(&self, filter: &WishFilter) -> Result<Vec<Wish>, AppError> {
            self.wishes.find_wishes(filter).await
        }

        async fn book_wish(&self, id: i64, booking: &Booking) -> Result<bool, AppError> {
            self.wishes.book_wish(id, booking).await
        }

        async fn release_booking(
            &self,
            id: i64,
            expected: Option<i64>,
            mark_executed: bool,
        ) -> Result<bool, AppError> {
            self.wishes.release_booking(id, expected, mark_executed).await
        }

        async fn react(
            &self,
            id: i64,
            reaction: Reaction,
            kind: ReactionKind,
        ) -> Result<Option<Wish>, AppError> {
            self.wishes.react(id, reaction, kind).await
        }
    }
}
