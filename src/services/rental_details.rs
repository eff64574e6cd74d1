//! Rental details read model

use crate::domain::booking::RentalRecord;
use crate::domain::error::DomainResult;
use crate::domain::lifecycle::{derive_view, HandoverPolicy, RentalView};
use crate::domain::types::{BookingId, UserId};
use crate::io::store::load_rental;
use crate::services::context::ServiceContext;
use serde::Serialize;
use tracing::debug;

/// Booking row plus the lifecycle view for one viewer
#[derive(Debug, Clone, Serialize)]
pub struct RentalDetails {
    #[serde(flatten)]
    pub record: RentalRecord,
    pub view: RentalView,
}

pub struct RentalDetailsService {
    ctx: ServiceContext,
    policy: HandoverPolicy,
}

impl RentalDetailsService {
    pub fn new(ctx: ServiceContext, policy: HandoverPolicy) -> Self {
        Self { ctx, policy }
    }

    pub async fn rental_view(&self, booking_id: BookingId, viewer: UserId) -> DomainResult<RentalView> {
        Ok(self.rental_details(booking_id, viewer).await?.view)
    }

    pub async fn rental_details(
        &self,
        booking_id: BookingId,
        viewer: UserId,
    ) -> DomainResult<RentalDetails> {
        let record = load_rental(&*self.ctx.store, booking_id).await?;
        let today = self.ctx.clock.today();
        let view = derive_view(&record, viewer, today, self.policy);
        debug!(
            booking_id = %booking_id,
            viewer = %viewer,
            state = %view.state.as_str(),
            "rental_view_derived"
        );
        Ok(RentalDetails { record, view })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::{Booking, HandoverSession};
    use crate::domain::lifecycle::RentalState;
    use crate::domain::types::{BookingStatus, CarId, HandoverType, ViewerRole};
    use crate::infra::clock::FixedClock;
    use crate::infra::metrics::Metrics;
    use crate::io::memory::InMemoryStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[tokio::test]
    async fn test_view_follows_clock() {
        let clock = Arc::new(FixedClock::at_date(date(9)));
        let ctx = ServiceContext::new(
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            Arc::new(Metrics::new()),
        );
        let service = RentalDetailsService::new(ctx.clone(), HandoverPolicy::default());

        let mut booking =
            Booking::new(UserId::new(), UserId::new(), CarId::new(), date(10), date(13), 36_000)
                .unwrap();
        booking.transition(BookingStatus::Confirmed).unwrap();
        ctx.store.insert_booking(booking.clone()).await.unwrap();

        let view = service.rental_view(booking.id, booking.renter_id).await.unwrap();
        assert_eq!(view.state, RentalState::Inactive(BookingStatus::Confirmed));

        clock.set_date(date(10));
        let view = service.rental_view(booking.id, booking.renter_id).await.unwrap();
        assert_eq!(view.state, RentalState::PendingPickup);
        assert!(view.can_initiate_pickup);

        let owner_view = service.rental_view(booking.id, booking.owner_id).await.unwrap();
        assert_eq!(owner_view.role, ViewerRole::Owner);
        assert!(!owner_view.can_initiate_pickup);

        let mut pickup = HandoverSession::open(&booking, HandoverType::Pickup, ctx.clock.now());
        pickup.mark_completed(booking.owner_id, ctx.clock.now()).unwrap();
        ctx.store.insert_session(pickup.clone()).await.unwrap();

        let details = service.rental_details(booking.id, booking.renter_id).await.unwrap();
        assert_eq!(details.view.state, RentalState::InProgress);
        assert_eq!(details.view.pickup_session, Some(pickup.id));
        assert_eq!(details.record.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_booking() {
        let ctx = ServiceContext::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FixedClock::at_date(date(9))),
            Arc::new(Metrics::new()),
        );
        let service = RentalDetailsService::new(ctx, HandoverPolicy::default());
        let err = service.rental_view(BookingId::new(), UserId::new()).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
