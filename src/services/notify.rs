use async_trait::async_trait;

use crate::models::user::User;

/// Outbound notifications to wish owners.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn wish_booked(&self, owner: &User, wish_id: i64, booker_id: i64);
}

/// Writes notifications to the log instead of delivering them.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn wish_booked(&self, owner: &User, wish_id: i64, booker_id: i64) {
        tracing::info!(
            "Notify user {} <{}>: wish {} was booked by user {}",
            owner.id,
            owner.email,
            wish_id,
            booker_id
        );
    }
}
