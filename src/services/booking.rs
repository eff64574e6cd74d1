//! Booking status transitions driven by users and by the clock

use crate::domain::booking::Booking;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::{BookingId, BookingStatus, UserId, ViewerRole};
use crate::io::audit::AuditEvent;
use crate::io::store::{load_rental, BookingFilter};
use crate::services::context::ServiceContext;
use tracing::{info, warn};

/// Apply a transition, persist it and record it
pub(crate) async fn persist_transition(
    ctx: &ServiceContext,
    booking: &mut Booking,
    to: BookingStatus,
    actor: Option<UserId>,
) -> DomainResult<()> {
    let from = booking.status;
    booking.transition(to)?;
    ctx.store.update_booking(booking).await?;
    ctx.metrics.record_booking_transition();
    ctx.record_audit(AuditEvent::BookingTransitioned { booking_id: booking.id, from, to, user_id: actor });
    info!(
        booking_id = %booking.id,
        from = %from,
        to = %to,
        "booking_transitioned"
    );
    Ok(())
}

pub struct BookingService {
    ctx: ServiceContext,
}

impl BookingService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn load(&self, booking_id: BookingId) -> DomainResult<Booking> {
        self.ctx
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| DomainError::not_found("booking", booking_id))
    }

    /// Owner accepts a pending request
    pub async fn approve(&self, booking_id: BookingId, user: UserId) -> DomainResult<Booking> {
        let mut booking = self.load(booking_id).await?;
        if booking.role_of(user) != ViewerRole::Owner {
            return Err(DomainError::NotParticipant(user.to_string()));
        }
        persist_transition(&self.ctx, &mut booking, BookingStatus::Confirmed, Some(user)).await?;
        Ok(booking)
    }

    /// Either party withdraws before the car has been handed over
    pub async fn cancel(&self, booking_id: BookingId, user: UserId) -> DomainResult<Booking> {
        let record = load_rental(&*self.ctx.store, booking_id).await?;
        if !record.booking.is_participant(user) {
            return Err(DomainError::NotParticipant(user.to_string()));
        }
        if record.pickup_session().is_some_and(|s| s.is_complete()) {
            return Err(DomainError::InvalidStateTransition(format!(
                "booking {} was already picked up",
                booking_id
            )));
        }

        let mut booking = record.booking;
        persist_transition(&self.ctx, &mut booking, BookingStatus::Cancelled, Some(user)).await?;
        Ok(booking)
    }

    /// Expire pending requests whose start date has passed; returns how many
    pub async fn expire_stale(&self) -> DomainResult<usize> {
        let today = self.ctx.clock.today();
        let pending = self
            .ctx
            .store
            .list_bookings(BookingFilter::with_status(BookingStatus::Pending))
            .await?;

        let mut expired = 0;
        for mut booking in pending.into_iter().filter(|b| b.start_date < today) {
            match persist_transition(&self.ctx, &mut booking, BookingStatus::Expired, None).await {
                Ok(()) => expired += 1,
                Err(e) => warn!(booking_id = %booking.id, error = %e, "booking_expire_failed"),
            }
        }

        info!(today = %today, expired = %expired, "bookings_expired");
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::HandoverSession;
    use crate::domain::types::{CarId, HandoverType};
    use crate::infra::clock::FixedClock;
    use crate::infra::metrics::Metrics;
    use crate::io::memory::InMemoryStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn setup(today: u32) -> (BookingService, ServiceContext) {
        let ctx = ServiceContext::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FixedClock::at_date(date(today))),
            Arc::new(Metrics::new()),
        );
        (BookingService::new(ctx.clone()), ctx)
    }

    async fn pending(ctx: &ServiceContext, start: u32) -> Booking {
        let booking =
            Booking::new(UserId::new(), UserId::new(), CarId::new(), date(start), date(start + 3), 100)
                .unwrap();
        ctx.store.insert_booking(booking.clone()).await.unwrap();
        booking
    }

    #[tokio::test]
    async fn test_owner_approves() {
        let (service, ctx) = setup(5);
        let booking = pending(&ctx, 10).await;

        let err = service.approve(booking.id, booking.renter_id).await.unwrap_err();
        assert_eq!(err.code(), "not_participant");

        let approved = service.approve(booking.id, booking.owner_id).await.unwrap();
        assert_eq!(approved.status, BookingStatus::Confirmed);
        let stored = ctx.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);

        let err = service.approve(booking.id, booking.owner_id).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state_transition");
        assert_eq!(ctx.metrics.report().bookings_transitioned, 1);
    }

    #[tokio::test]
    async fn test_cancel_blocked_after_pickup() {
        let (service, ctx) = setup(10);
        let mut booking = pending(&ctx, 10).await;
        booking.transition(BookingStatus::Confirmed).unwrap();
        ctx.store.update_booking(&booking).await.unwrap();

        let mut pickup = HandoverSession::open(&booking, HandoverType::Pickup, ctx.clock.now());
        pickup.mark_completed(booking.renter_id, ctx.clock.now()).unwrap();
        ctx.store.insert_session(pickup).await.unwrap();

        let err = service.cancel(booking.id, booking.renter_id).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state_transition");

        let err = service.cancel(booking.id, UserId::new()).await.unwrap_err();
        assert_eq!(err.code(), "not_participant");
    }

    #[tokio::test]
    async fn test_cancel_by_renter() {
        let (service, ctx) = setup(5);
        let booking = pending(&ctx, 10).await;
        let cancelled = service.cancel(booking.id, booking.renter_id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_expire_stale_only_past_start() {
        let (service, ctx) = setup(10);
        let stale = pending(&ctx, 9).await;
        let today = pending(&ctx, 10).await;

        assert_eq!(service.expire_stale().await.unwrap(), 1);
        let stale = ctx.store.get_booking(stale.id).await.unwrap().unwrap();
        let today = ctx.store.get_booking(today.id).await.unwrap().unwrap();
        assert_eq!(stale.status, BookingStatus::Expired);
        assert_eq!(today.status, BookingStatus::Pending);

        assert_eq!(service.expire_stale().await.unwrap(), 0);
    }
}
