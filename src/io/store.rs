//! Storage port for rental rows
//!
//! Services depend on this trait only; one constructed store is shared by
//! reference for the whole process. Adapters must enforce two constraints:
//! - at most one handover session per (booking, handover type)
//! - promo redemption inserts the usage row and bumps the counter atomically

use crate::domain::booking::{Booking, HandoverSession, RentalRecord};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::promo::{PromoCode, PromoUsage};
use crate::domain::types::{BookingId, BookingStatus, PromoCodeId, SessionId, UserId};
use async_trait::async_trait;

/// Row filter for booking listings
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    /// Renter or owner
    pub participant: Option<UserId>,
}

impl BookingFilter {
    pub fn with_status(status: BookingStatus) -> Self {
        Self { status: Some(status), participant: None }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.status.map_or(true, |s| booking.status == s)
            && self.participant.map_or(true, |u| booking.is_participant(u))
    }
}

#[async_trait]
pub trait RentalStore: Send + Sync {
    async fn insert_booking(&self, booking: Booking) -> DomainResult<()>;

    async fn get_booking(&self, id: BookingId) -> DomainResult<Option<Booking>>;

    /// Replace an existing booking row
    async fn update_booking(&self, booking: &Booking) -> DomainResult<()>;

    async fn list_bookings(&self, filter: BookingFilter) -> DomainResult<Vec<Booking>>;

    /// Sessions of a booking ordered by creation time
    async fn sessions_for_booking(&self, booking_id: BookingId)
        -> DomainResult<Vec<HandoverSession>>;

    async fn get_session(&self, id: SessionId) -> DomainResult<Option<HandoverSession>>;

    /// Fails with `DuplicateSession` when the booking already has a session of this type
    async fn insert_session(&self, session: HandoverSession) -> DomainResult<()>;

    async fn update_session(&self, session: &HandoverSession) -> DomainResult<()>;

    async fn insert_promo(&self, promo: PromoCode) -> DomainResult<()>;

    /// Case-insensitive lookup
    async fn find_promo_by_code(&self, code: &str) -> DomainResult<Option<PromoCode>>;

    async fn has_promo_usage(&self, promo_id: PromoCodeId, user_id: UserId) -> DomainResult<bool>;

    /// Record a redemption exactly once
    ///
    /// Re-checks the usage cap and the per-user uniqueness, inserts the usage
    /// row and increments `current_uses` as one unit. Returns the updated code.
    async fn redeem_promo(&self, usage: PromoUsage) -> DomainResult<PromoCode>;

    async fn usages_for_promo(&self, promo_id: PromoCodeId) -> DomainResult<Vec<PromoUsage>>;
}

/// Load a booking together with its sessions
pub async fn load_rental(store: &dyn RentalStore, booking_id: BookingId) -> DomainResult<RentalRecord> {
    let booking = store
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| DomainError::not_found("booking", booking_id))?;
    let sessions = store.sessions_for_booking(booking_id).await?;
    Ok(RentalRecord::new(booking, sessions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CarId;
    use chrono::NaiveDate;

    #[test]
    fn test_booking_filter() {
        let renter = UserId::new();
        let booking = Booking::new(
            renter,
            UserId::new(),
            CarId::new(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 13).unwrap(),
            100,
        )
        .unwrap();

        assert!(BookingFilter::default().matches(&booking));
        assert!(BookingFilter::with_status(BookingStatus::Pending).matches(&booking));
        assert!(!BookingFilter::with_status(BookingStatus::Confirmed).matches(&booking));
        assert!(BookingFilter { status: None, participant: Some(renter) }.matches(&booking));
        assert!(!BookingFilter { status: None, participant: Some(UserId::new()) }.matches(&booking));
    }
}
