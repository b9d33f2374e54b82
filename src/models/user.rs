// src/models/user.rs

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{models::wish::Show, services::visibility::field_visible};

/// A registered user with their relationship sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,

    pub email: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    pub first_name: String,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub delivery_address: Option<String>,

    pub show_email: Show,
    pub show_birthday: Show,
    pub show_delivery_address: Show,

    /// Mutual friends.
    pub friends: BTreeSet<i64>,
    /// Users following me whom I have not followed back.
    pub follow_from: BTreeSet<i64>,
    /// Users I follow who have not followed me back.
    pub follow_to: BTreeSet<i64>,

    pub successful_wishes: i64,
    pub unsuccessful_wishes: i64,

    /// Ids of owned wishes, oldest first.
    pub wish_list: Vec<i64>,

    /// Whether the user wants to hear about bookings of their wishes.
    pub booking_notifications: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    pub fn is_friend(&self, other: i64) -> bool {
        self.friends.contains(&other)
    }
}

/// Data needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Successful,
    Unsuccessful,
}

/// Relationship between an actor and a counterpart, seen from the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationState {
    None,
    /// The actor follows the counterpart (pending friend request).
    Following,
    /// The counterpart follows the actor.
    FollowedBy,
    Friends,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationAction {
    AddFriend,
    RemoveFriend,
}

impl RelationState {
    /// Reads the relation from the flags stored for the pair. A pair that
    /// follows each other both ways is a friendship.
    pub fn from_flags(friends: bool, following: bool, followed_by: bool) -> Self {
        match (friends, following, followed_by) {
            (true, _, _) | (false, true, true) => RelationState::Friends,
            (false, true, false) => RelationState::Following,
            (false, false, true) => RelationState::FollowedBy,
            (false, false, false) => RelationState::None,
        }
    }

    pub fn between(actor: &User, other: i64) -> Self {
        Self::from_flags(
            actor.is_friend(other),
            actor.follow_to.contains(&other),
            actor.follow_from.contains(&other),
        )
    }

    pub fn apply(self, action: RelationAction) -> Self {
        match (self, action) {
            (RelationState::None, RelationAction::AddFriend) => RelationState::Following,
            (RelationState::FollowedBy, RelationAction::AddFriend) => RelationState::Friends,
            (state, RelationAction::AddFriend) => state,
            (RelationState::Friends, RelationAction::RemoveFriend) => RelationState::FollowedBy,
            (_, RelationAction::RemoveFriend) => RelationState::None,
        }
    }

    /// Rewrites both users' sets so they describe exactly `self`.
    pub fn write(self, actor: &mut User, other: &mut User) {
        for set in [&mut actor.friends, &mut actor.follow_from, &mut actor.follow_to] {
            set.remove(&other.id);
        }
        for set in [&mut other.friends, &mut other.follow_from, &mut other.follow_to] {
            set.remove(&actor.id);
        }

        match self {
            RelationState::None => {}
            RelationState::Following => {
                actor.follow_to.insert(other.id);
                other.follow_from.insert(actor.id);
            }
            RelationState::FollowedBy => {
                actor.follow_from.insert(other.id);
                other.follow_to.insert(actor.id);
            }
            RelationState::Friends => {
                actor.friends.insert(other.id);
                other.friends.insert(actor.id);
            }
        }
    }
}

/// Public profile as seen by a viewer; hidden fields are null.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub email: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub delivery_address: Option<String>,
    pub friends: Vec<i64>,
    pub successful_wishes: i64,
    pub unsuccessful_wishes: i64,
    pub wish_list: Vec<i64>,
}

impl UserProfile {
    pub fn for_viewer(user: &User, viewer_id: i64) -> Self {
        let visible = |show: Show| field_visible(show, user.id, viewer_id, &user.friends);

        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar: user.avatar.clone(),
            email: visible(user.show_email).then(|| user.email.clone()),
            birthday: if visible(user.show_birthday) { user.birthday } else { None },
            delivery_address: if visible(user.show_delivery_address) {
                user.delivery_address.clone()
            } else {
                None
            },
            friends: user.friends.iter().copied().collect(),
            successful_wishes: user.successful_wishes,
            unsuccessful_wishes: user.unsuccessful_wishes,
            wish_list: user.wish_list.clone(),
        }
    }
}

/// Compact author info attached to wish lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// DTO for creating a new user (Registration).
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(email(message = "Email is invalid"), length(max = 255))]
    pub email: String,
    #[validate(length(
        min = 4,
        max = 32,
        message = "Password length must be between 4 and 32 characters."
    ))]
    pub password: String,
    #[validate(length(min = 1, max = 50, message = "First name must be between 1 and 50 characters"))]
    pub first_name: String,
    #[validate(length(max = 50))]
    pub last_name: Option<String>,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 255))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for profile updates. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 50))]
    pub first_name: Option<String>,
    #[validate(length(max = 50))]
    pub last_name: Option<String>,
    pub birthday: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub delivery_address: Option<String>,
    pub show_email: Option<Show>,
    pub show_birthday: Option<Show>,
    pub show_delivery_address: Option<Show>,
    pub booking_notifications: Option<bool>,
}
