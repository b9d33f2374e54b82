use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{UserRepository, WishFilter, WishRepository};
use crate::{
    error::AppError,
    models::{
        user::{NewUser, Outcome, ProfileUpdate, RelationAction, RelationState, User},
        wish::{Booking, Reaction, ReactionKind, Show, Wish},
    },
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    wishes: BTreeMap<i64, Wish>,
    next_user_id: i64,
    next_wish_id: i64,
}

impl Tables {
    fn user_with_wishes(&self, user: &User) -> User {
        let mut user = user.clone();
        user.wish_list = self
            .wishes
            .values()
            .filter(|w| w.user_id == user.id)
            .map(|w| w.id)
            .collect();
        user
    }

    fn user_mut(&mut self, id: i64) -> Result<&mut User, AppError> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
    }
}

/// Users and wishes kept in process memory. Each operation runs under one
/// lock, which gives the same atomicity as the conditional writes and row
/// locks of [`super::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::InternalServerError("Store lock poisoned".to_string()))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        let mut tables = self.tables()?;
        if tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        tables.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: tables.next_user_id,
            email: new_user.email,
            password: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            avatar: None,
            birthday: None,
            delivery_address: None,
            show_email: Show::All,
            show_birthday: Show::All,
            show_delivery_address: Show::All,
            friends: BTreeSet::new(),
            follow_from: BTreeSet::new(),
            follow_to: BTreeSet::new(),
            successful_wishes: 0,
            unsuccessful_wishes: 0,
            wish_list: Vec::new(),
            booking_notifications: true,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let tables = self.tables()?;
        Ok(tables.users.get(&id).map(|u| tables.user_with_wishes(u)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| tables.user_with_wishes(u)))
    }

    async fn update_profile(&self, id: i64, update: &ProfileUpdate) -> Result<User, AppError> {
        let mut tables = self.tables()?;
        let user = tables.user_mut(id)?;

        if let Some(first_name) = &update.first_name {
            user.first_name = first_name.clone();
        }
        if let Some(last_name) = &update.last_name {
            user.last_name = Some(last_name.clone());
        }
        if let Some(birthday) = update.birthday {
            user.birthday = Some(birthday);
        }
        if let Some(address) = &update.delivery_address {
            user.delivery_address = Some(address.clone());
        }
        if let Some(show) = update.show_email {
            user.show_email = show;
        }
        if let Some(show) = update.show_birthday {
            user.show_birthday = show;
        }
        if let Some(show) = update.show_delivery_address {
            user.show_delivery_address = show;
        }
        if let Some(enabled) = update.booking_notifications {
            user.booking_notifications = enabled;
        }
        user.updated_at = Utc::now();

        let user = user.clone();
        Ok(tables.user_with_wishes(&user))
    }

    async fn set_avatar(&self, id: i64, avatar: Option<String>) -> Result<(), AppError> {
        let mut tables = self.tables()?;
        let user = tables.user_mut(id)?;
        user.avatar = avatar;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_relation(
        &self,
        actor: i64,
        other: i64,
        action: RelationAction,
    ) -> Result<RelationState, AppError> {
        if actor == other {
            return Err(AppError::BadRequest("Cannot befriend yourself".to_string()));
        }

        let mut tables = self.tables()?;
        let mut actor_user = tables.user_mut(actor)?.clone();
        let mut other_user = tables.user_mut(other)?.clone();

        let next = RelationState::between(&actor_user, other).apply(action);
        next.write(&mut actor_user, &mut other_user);

        tables.users.insert(actor, actor_user);
        tables.users.insert(other, other_user);
        Ok(next)
    }

    async fn record_outcome(&self, id: i64, outcome: Outcome) -> Result<(), AppError> {
        let mut tables = self.tables()?;
        let user = tables.user_mut(id)?;
        match outcome {
            Outcome::Successful => user.successful_wishes += 1,
            Outcome::Unsuccessful => user.unsuccessful_wishes += 1,
        }
        Ok(())
    }
}

#[async_trait]
impl WishRepository for MemoryStore {
    async fn insert_wish(&self, wish: &Wish) -> Result<Wish, AppError> {
        let mut tables = self.tables()?;
        if !tables.users.contains_key(&wish.user_id) {
            return Err(AppError::NotFound(format!("User {} not found", wish.user_id)));
        }

        tables.next_wish_id += 1;
        let now = Utc::now();
        let mut stored = wish.clone();
        stored.id = tables.next_wish_id;
        stored.created_at = now;
        stored.updated_at = now;
        tables.wishes.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_wish(&self, id: i64) -> Result<Option<Wish>, AppError> {
        Ok(self.tables()?.wishes.get(&id).cloned())
    }

    async fn save_wish(&self, wish: &Wish) -> Result<Wish, AppError> {
        let mut tables = self.tables()?;
        let stored = tables
            .wishes
            .get_mut(&wish.id)
            .ok_or_else(|| AppError::NotFound("Wish not found".to_string()))?;

        stored.material = wish.material;
        stored.show = wish.show;
        stored.name = wish.name.clone();
        stored.price = wish.price.clone();
        stored.currency = wish.currency.clone();
        stored.addresses = wish.addresses.clone();
        stored.description = wish.description.clone();
        stored.images = wish.images.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_wish(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.tables()?.wishes.remove(&id).is_some())
    }

    async fn find_wishes(&self, filter: &WishFilter) -> Result<Vec<Wish>, AppError> {
        let tables = self.tables()?;
        let mut wishes: Vec<Wish> = tables
            .wishes
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();
        wishes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(wishes)
    }

    async fn book_wish(&self, id: i64, booking: &Booking) -> Result<bool, AppError> {
        let mut tables = self.tables()?;
        match tables.wishes.get_mut(&id) {
            Some(wish) if wish.booking.is_none() && !wish.executed => {
                wish.booking = Some(booking.clone());
                wish.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_booking(
        &self,
        id: i64,
        expected: Option<i64>,
        mark_executed: bool,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables()?;
        match tables.wishes.get_mut(&id) {
            Some(wish) if wish.booking.as_ref().map(|b| b.user_id) == expected => {
                wish.booking = None;
                wish.executed |= mark_executed;
                wish.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn react(
        &self,
        id: i64,
        reaction: Reaction,
        kind: ReactionKind,
    ) -> Result<Option<Wish>, AppError> {
        let mut tables = self.tables()?;
        Ok(tables.wishes.get_mut(&id).map(|wish| {
            wish.apply_reaction(reaction, kind);
            wish.clone()
        }))
    }
}
