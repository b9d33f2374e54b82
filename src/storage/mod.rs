//! Persistence for users and wishes.
//!
//! Every method is a single atomic operation against the backing store.
//! Booking changes are conditional writes keyed on the claimant observed by the
//! caller, so concurrent transitions cannot both succeed.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{
        user::{NewUser, Outcome, ProfileUpdate, RelationAction, RelationState, User},
        wish::{Booking, Reaction, ReactionKind, Show, Wish},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Pre-filter for wish listings; search, sorting and paging happen after
/// restricted fields are revealed.
#[derive(Debug, Clone, Default)]
pub struct WishFilter {
    pub owner_id: Option<i64>,
    /// Only wishes whose `show` is in this list. Empty matches nothing.
    pub shows: Vec<Show>,
    pub executed: Option<bool>,
}

impl WishFilter {
    pub fn matches(&self, wish: &Wish) -> bool {
        self.owner_id.is_none_or(|owner| wish.user_id == owner)
            && self.shows.contains(&wish.show)
            && self.executed.is_none_or(|executed| wish.executed == executed)
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, AppError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn update_profile(&self, id: i64, update: &ProfileUpdate) -> Result<User, AppError>;

    async fn set_avatar(&self, id: i64, avatar: Option<String>) -> Result<(), AppError>;

    /// Applies `action` to the pair and rewrites both users' relationship sets
    /// atomically. Returns the resulting state as seen by `actor`.
    async fn update_relation(
        &self,
        actor: i64,
        other: i64,
        action: RelationAction,
    ) -> Result<RelationState, AppError>;

    async fn record_outcome(&self, id: i64, outcome: Outcome) -> Result<(), AppError>;
}

#[async_trait]
pub trait WishRepository: Send + Sync {
    /// Inserts a draft and returns it with its assigned id and timestamps.
    async fn insert_wish(&self, wish: &Wish) -> Result<Wish, AppError>;

    async fn find_wish(&self, id: i64) -> Result<Option<Wish>, AppError>;

    /// Persists owner-editable fields (content, `show`, images). Booking and
    /// reactions are left untouched.
    async fn save_wish(&self, wish: &Wish) -> Result<Wish, AppError>;

    async fn delete_wish(&self, id: i64) -> Result<bool, AppError>;

    /// Matching wishes, newest first.
    async fn find_wishes(&self, filter: &WishFilter) -> Result<Vec<Wish>, AppError>;

    /// Sets `booking` only if the wish is currently unbooked and not executed.
    async fn book_wish(&self, id: i64, booking: &Booking) -> Result<bool, AppError>;

    /// Clears the booking only if its claimant is still `expected` (`None`
    /// meaning unbooked), optionally marking the wish executed in the same write.
    async fn release_booking(
        &self,
        id: i64,
        expected: Option<i64>,
        mark_executed: bool,
    ) -> Result<bool, AppError>;

    /// Toggles a reaction and returns the updated wish, `None` if it does not exist.
    async fn react(
        &self,
        id: i64,
        reaction: Reaction,
        kind: ReactionKind,
    ) -> Result<Option<Wish>, AppError>;
}
