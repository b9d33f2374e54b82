//! Booking transitions. Each one is a single conditional write keyed on the
//! claimant observed when the wish was read; a lost race surfaces as `Conflict`.

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        user::Outcome,
        wish::{Booking, WhoseWish, WishView},
    },
    services::{
        visibility::Access,
        wishes::{owned_wish, require_wish, view_for, visible_wish},
    },
    state::AppState,
};

fn already_taken() -> AppError {
    AppError::Conflict("Wish is already booked or fulfilled".to_string())
}

pub async fn book_wish(
    state: &AppState,
    viewer_id: i64,
    wish_id: i64,
    end: DateTime<Utc>,
) -> Result<WishView, AppError> {
    let (wish, owner) = visible_wish(state, viewer_id, wish_id).await?;

    if wish.user_id == viewer_id {
        return Err(AppError::BadRequest("You cannot book your own wish".to_string()));
    }
    if wish.executed || wish.booking.is_some() {
        return Err(already_taken());
    }

    let now = Utc::now();
    if end <= now {
        return Err(AppError::BadRequest("Booking end must be in the future".to_string()));
    }

    let booking = Booking {
        user_id: viewer_id,
        start: now,
        end,
    };
    if !state.wishes.book_wish(wish_id, &booking).await? {
        return Err(already_taken());
    }
    tracing::info!("User {} booked wish {} until {}", viewer_id, wish_id, end);

    if owner.booking_notifications {
        state.notifier.wish_booked(&owner, wish_id, viewer_id).await;
    }

    let wish = require_wish(state, wish_id).await?;
    view_for(state, &wish, &owner, viewer_id)
}

/// Withdraws the caller's own booking.
pub async fn cancel_book(state: &AppState, viewer_id: i64, wish_id: i64) -> Result<(), AppError> {
    let wish = require_wish(state, wish_id).await?;

    let claimant = match &wish.booking {
        Some(booking) => booking.user_id,
        None => return Err(AppError::Conflict("Wish is not booked".to_string())),
    };
    if claimant != viewer_id {
        return Err(AppError::AuthError("Wish is booked by someone else".to_string()));
    }

    if !state.wishes.release_booking(wish_id, Some(claimant), false).await? {
        return Err(AppError::Conflict("Booking changed concurrently".to_string()));
    }
    tracing::info!("User {} cancelled booking of wish {}", viewer_id, wish_id);
    Ok(())
}

/// Marks the wish fulfilled. With [`WhoseWish::Someone`] the claimant is the
/// executor and earns a successful wish.
pub async fn done_wish(
    state: &AppState,
    owner_id: i64,
    wish_id: i64,
    whose: WhoseWish,
) -> Result<WishView, AppError> {
    let wish = owned_wish(state, owner_id, wish_id).await?;
    if wish.executed {
        return Err(AppError::Conflict("Wish is already fulfilled".to_string()));
    }

    let claimant = wish.booking.as_ref().map(|b| b.user_id);
    let executor = match whose {
        WhoseWish::My => owner_id,
        WhoseWish::Someone => {
            claimant.ok_or_else(|| AppError::Conflict("Wish is not booked".to_string()))?
        }
    };

    if !state.wishes.release_booking(wish_id, claimant, true).await? {
        return Err(AppError::Conflict("Booking changed concurrently".to_string()));
    }
    if executor != owner_id {
        state.users.record_outcome(executor, Outcome::Successful).await?;
    }
    tracing::info!("Wish {} fulfilled by user {}", wish_id, executor);

    let wish = require_wish(state, wish_id).await?;
    WishView::build(&wish, Access::full(), &state.cipher)
}

/// Records that the claimant did not fulfil the wish and frees it again.
pub async fn undone_wish(state: &AppState, owner_id: i64, wish_id: i64) -> Result<WishView, AppError> {
    let wish = owned_wish(state, owner_id, wish_id).await?;

    let claimant = wish
        .booking
        .as_ref()
        .map(|b| b.user_id)
        .ok_or_else(|| AppError::Conflict("Wish is not booked".to_string()))?;

    if !state.wishes.release_booking(wish_id, Some(claimant), false).await? {
        return Err(AppError::Conflict("Booking changed concurrently".to_string()));
    }
    state.users.record_outcome(claimant, Outcome::Unsuccessful).await?;
    tracing::info!("Wish {} released, user {} did not fulfil it", wish_id, claimant);

    let wish = require_wish(state, wish_id).await?;
    WishView::build(&wish, Access::full(), &state.cipher)
}
