use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};

use super::{UserRepository, WishFilter, WishRepository};
use crate::{
    error::AppError,
    models::{
        user::{NewUser, Outcome, ProfileUpdate, RelationAction, RelationState, User},
        wish::{
            Booking, Reaction, ReactionKind, Sealed, Show, StoredImage, Wish, WishAddress, WishImage,
        },
    },
};

const USER_COLUMNS: &str = "id, email, password, first_name, last_name, avatar, birthday, \
     delivery_address, show_email, show_birthday, show_delivery_address, successful_wishes, \
     unsuccessful_wishes, booking_notifications, created_at, updated_at";

const WISH_COLUMNS: &str = "id, user_id, material, visibility, name, price, currency, addresses, \
     description, executed, images, booking_user_id, booking_start, booking_end, likes, dislikes, \
     sort_by_likes, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password: String,
    first_name: String,
    last_name: Option<String>,
    avatar: Option<String>,
    birthday: Option<NaiveDate>,
    delivery_address: Option<String>,
    show_email: String,
    show_birthday: String,
    show_delivery_address: String,
    successful_wishes: i64,
    unsuccessful_wishes: i64,
    booking_notifications: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct WishRow {
    id: i64,
    user_id: i64,
    material: bool,
    visibility: String,
    name: String,
    price: Option<String>,
    currency: Option<String>,
    addresses: Json<Vec<WishAddress>>,
    description: String,
    executed: bool,
    images: Json<Vec<StoredImage>>,
    booking_user_id: Option<i64>,
    booking_start: Option<DateTime<Utc>>,
    booking_end: Option<DateTime<Utc>>,
    likes: Json<Vec<Reaction>>,
    dislikes: Json<Vec<Reaction>>,
    sort_by_likes: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_show(raw: &str) -> Result<Show, AppError> {
    raw.parse()
        .map_err(|_| AppError::InternalServerError(format!("Stored visibility '{}' is corrupt", raw)))
}

impl TryFrom<WishRow> for Wish {
    type Error = AppError;

    fn try_from(row: WishRow) -> Result<Self, Self::Error> {
        let show = parse_show(&row.visibility)?;

        let booking = match (row.booking_user_id, row.booking_start, row.booking_end) {
            (Some(user_id), Some(start), Some(end)) => Some(Booking { user_id, start, end }),
            _ => None,
        };

        let images = row
            .images
            .0
            .into_iter()
            .map(|image| {
                Ok(WishImage {
                    path: Sealed::from_stored(&image.path, show)?,
                    position: image.position,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Wish {
            id: row.id,
            user_id: row.user_id,
            material: row.material,
            show,
            name: Sealed::from_stored(&row.name, show)?,
            price: row.price.as_deref().map(|p| Sealed::from_stored(p, show)).transpose()?,
            currency: row
                .currency
                .as_deref()
                .map(|c| Sealed::from_stored(c, show))
                .transpose()?,
            addresses: row.addresses.0,
            description: row.description,
            executed: row.executed,
            images,
            booking,
            likes: row.likes.0,
            dislikes: row.dislikes.0,
            sort_by_likes: row.sort_by_likes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn unique_violation(err: sqlx::Error, message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message.to_string()),
        _ => AppError::from(err),
    }
}

/// Postgres-backed repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_user(&self, row: UserRow) -> Result<User, AppError> {
        let friends: Vec<i64> = sqlx::query_scalar("SELECT friend_id FROM friendships WHERE user_id = $1")
            .bind(row.id)
            .fetch_all(&self.pool)
            .await?;
        let follow_to: Vec<i64> = sqlx::query_scalar("SELECT followee_id FROM follows WHERE follower_id = $1")
            .bind(row.id)
            .fetch_all(&self.pool)
            .await?;
        let follow_from: Vec<i64> =
            sqlx::query_scalar("SELECT follower_id FROM follows WHERE followee_id = $1")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?;
        let wish_list: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM wishes WHERE user_id = $1 ORDER BY created_at, id")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?;

        Ok(User {
            id: row.id,
            email: row.email,
            password: row.password,
            first_name: row.first_name,
            last_name: row.last_name,
            avatar: row.avatar,
            birthday: row.birthday,
            delivery_address: row.delivery_address,
            show_email: parse_show(&row.show_email)?,
            show_birthday: parse_show(&row.show_birthday)?,
            show_delivery_address: parse_show(&row.show_delivery_address)?,
            friends: friends.into_iter().collect(),
            follow_from: follow_from.into_iter().collect(),
            follow_to: follow_to.into_iter().collect(),
            successful_wishes: row.successful_wishes,
            unsuccessful_wishes: row.unsuccessful_wishes,
            wish_list,
            booking_notifications: row.booking_notifications,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn require_user(&self, id: i64) -> Result<User, AppError> {
        self.find_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (email, password, first_name, last_name) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "Email already exists"))?;

        self.require_user(id).await
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.load_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn update_profile(&self, id: i64, update: &ProfileUpdate) -> Result<User, AppError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
        let mut separated = builder.separated(", ");
        separated.push("updated_at = NOW()");

        if let Some(first_name) = &update.first_name {
            separated.push("first_name = ");
            separated.push_bind_unseparated(first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            separated.push("last_name = ");
            separated.push_bind_unseparated(last_name.clone());
        }
        if let Some(birthday) = update.birthday {
            separated.push("birthday = ");
            separated.push_bind_unseparated(birthday);
        }
        if let Some(address) = &update.delivery_address {
            separated.push("delivery_address = ");
            separated.push_bind_unseparated(address.clone());
        }
        if let Some(show) = update.show_email {
            separated.push("show_email = ");
            separated.push_bind_unseparated(show.as_str());
        }
        if let Some(show) = update.show_birthday {
            separated.push("show_birthday = ");
            separated.push_bind_unseparated(show.as_str());
        }
        if let Some(show) = update.show_delivery_address {
            separated.push("show_delivery_address = ");
            separated.push_bind_unseparated(show.as_str());
        }
        if let Some(enabled) = update.booking_notifications {
            separated.push("booking_notifications = ");
            separated.push_bind_unseparated(enabled);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            tracing::error!("Failed to update profile of user {}: {:?}", id, e);
            AppError::from(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        self.require_user(id).await
    }

    async fn set_avatar(&self, id: i64, avatar: Option<String>) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET avatar = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(avatar)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
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

        let mut tx = self.pool.begin().await?;

        // Lock both rows in id order so concurrent pair updates cannot deadlock.
        let locked: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                .bind(vec![actor, other])
                .fetch_all(&mut *tx)
                .await?;
        for id in [actor, other] {
            if !locked.contains(&id) {
                return Err(AppError::NotFound(format!("User {} not found", id)));
            }
        }

        let friends: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM friendships WHERE user_id = $1 AND friend_id = $2)",
        )
        .bind(actor)
        .bind(other)
        .fetch_one(&mut *tx)
        .await?;
        let following: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND followee_id = $2)",
        )
        .bind(actor)
        .bind(other)
        .fetch_one(&mut *tx)
        .await?;
        let followed_by: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND followee_id = $2)",
        )
        .bind(other)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

        let next = RelationState::from_flags(friends, following, followed_by).apply(action);

        sqlx::query(
            "DELETE FROM friendships WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)",
        )
        .bind(actor)
        .bind(other)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM follows WHERE (follower_id = $1 AND followee_id = $2) OR (follower_id = $2 AND followee_id = $1)",
        )
        .bind(actor)
        .bind(other)
        .execute(&mut *tx)
        .await?;

        match next {
            RelationState::None => {}
            RelationState::Following | RelationState::FollowedBy => {
                let (follower, followee) = if next == RelationState::Following {
                    (actor, other)
                } else {
                    (other, actor)
                };
                sqlx::query("INSERT INTO follows (follower_id, followee_id) VALUES ($1, $2)")
                    .bind(follower)
                    .bind(followee)
                    .execute(&mut *tx)
                    .await?;
            }
            RelationState::Friends => {
                sqlx::query("INSERT INTO friendships (user_id, friend_id) VALUES ($1, $2), ($2, $1)")
                    .bind(actor)
                    .bind(other)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(next)
    }

    async fn record_outcome(&self, id: i64, outcome: Outcome) -> Result<(), AppError> {
        let sql = match outcome {
            Outcome::Successful => "UPDATE users SET successful_wishes = successful_wishes + 1 WHERE id = $1",
            Outcome::Unsuccessful => {
                "UPDATE users SET unsuccessful_wishes = unsuccessful_wishes + 1 WHERE id = $1"
            }
        };
        let result = sqlx::query(sql).bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl WishRepository for PgStore {
    async fn insert_wish(&self, wish: &Wish) -> Result<Wish, AppError> {
        let row = sqlx::query_as::<_, WishRow>(&format!(
            "INSERT INTO wishes (user_id, material, visibility, name, price, currency, addresses, description, images) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            WISH_COLUMNS
        ))
        .bind(wish.user_id)
        .bind(wish.material)
        .bind(wish.show.as_str())
        .bind(wish.name.to_stored())
        .bind(wish.price.as_ref().map(|p| p.to_stored()))
        .bind(wish.currency.as_ref().map(|c| c.to_stored()))
        .bind(Json(&wish.addresses))
        .bind(&wish.description)
        .bind(Json(wish.stored_images()))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_wish(&self, id: i64) -> Result<Option<Wish>, AppError> {
        let row = sqlx::query_as::<_, WishRow>(&format!("SELECT {} FROM wishes WHERE id = $1", WISH_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Wish::try_from).transpose()
    }

    async fn save_wish(&self, wish: &Wish) -> Result<Wish, AppError> {
        let row = sqlx::query_as::<_, WishRow>(&format!(
            "UPDATE wishes SET material = $2, visibility = $3, name = $4, price = $5, currency = $6, \
             addresses = $7, description = $8, images = $9, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            WISH_COLUMNS
        ))
        .bind(wish.id)
        .bind(wish.material)
        .bind(wish.show.as_str())
        .bind(wish.name.to_stored())
        .bind(wish.price.as_ref().map(|p| p.to_stored()))
        .bind(wish.currency.as_ref().map(|c| c.to_stored()))
        .bind(Json(&wish.addresses))
        .bind(&wish.description)
        .bind(Json(wish.stored_images()))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| AppError::NotFound("Wish not found".to_string()))?
            .try_into()
    }

    async fn delete_wish(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM wishes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_wishes(&self, filter: &WishFilter) -> Result<Vec<Wish>, AppError> {
        let shows: Vec<&str> = filter.shows.iter().map(|s| s.as_str()).collect();

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM wishes WHERE visibility = ANY(", WISH_COLUMNS));
        builder.push_bind(shows);
        builder.push(")");

        if let Some(owner_id) = filter.owner_id {
            builder.push(" AND user_id = ");
            builder.push_bind(owner_id);
        }
        if let Some(executed) = filter.executed {
            builder.push(" AND executed = ");
            builder.push_bind(executed);
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows: Vec<WishRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Wish::try_from).collect()
    }

    async fn book_wish(&self, id: i64, booking: &Booking) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE wishes SET booking_user_id = $2, booking_start = $3, booking_end = $4, updated_at = NOW() \
             WHERE id = $1 AND booking_user_id IS NULL AND executed = FALSE",
        )
        .bind(id)
        .bind(booking.user_id)
        .bind(booking.start)
        .bind(booking.end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_booking(
        &self,
        id: i64,
        expected: Option<i64>,
        mark_executed: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE wishes SET booking_user_id = NULL, booking_start = NULL, booking_end = NULL, \
             executed = executed OR $3, updated_at = NOW() \
             WHERE id = $1 AND booking_user_id IS NOT DISTINCT FROM $2",
        )
        .bind(id)
        .bind(expected)
        .bind(mark_executed)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn react(
        &self,
        id: i64,
        reaction: Reaction,
        kind: ReactionKind,
    ) -> Result<Option<Wish>, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, WishRow>(&format!(
            "SELECT {} FROM wishes WHERE id = $1 FOR UPDATE",
            WISH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut wish = Wish::try_from(row)?;
        wish.apply_reaction(reaction, kind);

        sqlx::query("UPDATE wishes SET likes = $2, dislikes = $3, sort_by_likes = $4 WHERE id = $1")
            .bind(id)
            .bind(Json(&wish.likes))
            .bind(Json(&wish.dislikes))
            .bind(wish.sort_by_likes)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(wish))
    }
}
