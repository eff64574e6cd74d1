//! Handover session orchestration
//!
//! Owns the write side of pickup and return: starting (or resuming) a
//! session, ticking checklist steps, completing sessions, and relaying live
//! participant positions. A completed return session completes the booking.

use crate::domain::booking::{Booking, HandoverSession, RentalRecord};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::lifecycle::{derive_view, HandoverPolicy};
use crate::domain::types::{BookingId, BookingStatus, HandoverType, SessionId, UserId};
use crate::io::audit::AuditEvent;
use crate::io::realtime::{HandoverEventPayload, LocationPayload};
use crate::io::store::load_rental;
use crate::services::booking::persist_transition;
use crate::services::context::ServiceContext;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of a start-handover call
#[derive(Debug, Clone, Serialize)]
pub struct StartedHandover {
    pub session: HandoverSession,
    /// False when an open session was resumed
    pub created: bool,
}

pub struct HandoverService {
    ctx: ServiceContext,
    policy: HandoverPolicy,
}

impl HandoverService {
    pub fn new(ctx: ServiceContext, policy: HandoverPolicy) -> Self {
        Self { ctx, policy }
    }

    /// Start a pickup or return, or resume the open one
    ///
    /// Only confirmed bookings have live handovers. Any participant may
    /// resume an open session of the requested type; creating a new one
    /// requires the derived view to allow it for the initiator today.
    /// Concurrent creators converge on a single session.
    pub async fn start_handover(
        &self,
        booking_id: BookingId,
        initiator: UserId,
        handover_type: HandoverType,
    ) -> DomainResult<StartedHandover> {
        let record = load_rental(&*self.ctx.store, booking_id).await?;
        if !record.booking.is_participant(initiator) {
            return Err(DomainError::NotParticipant(initiator.to_string()));
        }

        if let Some(existing) = record.session(handover_type).filter(|s| !s.is_complete()) {
            ensure_confirmed(&record.booking)?;
            return Ok(self.started(existing.clone(), initiator, false));
        }

        let view = derive_view(&record, initiator, self.ctx.clock.today(), self.policy);
        if !view.can_initiate(handover_type) {
            return Err(DomainError::HandoverNotAllowed(format!(
                "{} cannot start {} while booking {} is {}",
                view.role.as_str(),
                handover_type,
                booking_id,
                view.state.as_str()
            )));
        }

        let session = HandoverSession::open(&record.booking, handover_type, self.ctx.clock.now());
        match self.ctx.store.insert_session(session.clone()).await {
            Ok(()) => Ok(self.started(session, initiator, true)),
            Err(DomainError::DuplicateSession(_)) => {
                // Lost the race; return the winner's session
                let sessions = self.ctx.store.sessions_for_booking(booking_id).await?;
                let winner = RentalRecord::new(record.booking, sessions)
                    .session(handover_type)
                    .cloned()
                    .ok_or_else(|| DomainError::not_found("handover session", booking_id))?;
                debug!(booking_id = %booking_id, session_id = %winner.id, "handover_session_race_resolved");
                Ok(self.started(winner, initiator, false))
            }
            Err(e) => Err(e),
        }
    }

    fn started(&self, session: HandoverSession, initiator: UserId, created: bool) -> StartedHandover {
        self.ctx.metrics.record_handover_started(created);
        self.ctx.record_audit(AuditEvent::HandoverStarted {
            booking_id: session.booking_id,
            session_id: session.id,
            handover_type: session.handover_type,
            initiator,
            created,
        });
        if created {
            self.publish_event(&session, "created", None, initiator);
        }
        info!(
            booking_id = %session.booking_id,
            session_id = %session.id,
            handover_type = %session.handover_type,
            initiator = %initiator,
            created = %created,
            "handover_started"
        );
        StartedHandover { session, created }
    }

    /// Reject writes to sessions whose booking is no longer confirmed
    async fn ensure_booking_confirmed(&self, booking_id: BookingId) -> DomainResult<()> {
        let booking = self
            .ctx
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| DomainError::not_found("booking", booking_id))?;
        ensure_confirmed(&booking)
    }

    async fn load_session(&self, session_id: SessionId) -> DomainResult<HandoverSession> {
        self.ctx
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| DomainError::not_found("handover session", session_id))
    }

    /// Tick one checklist step; the last step completes the session
    pub async fn complete_step(
        &self,
        session_id: SessionId,
        step_name: &str,
        user: UserId,
    ) -> DomainResult<HandoverSession> {
        let mut session = self.load_session(session_id).await?;
        self.ensure_booking_confirmed(session.booking_id).await?;
        let already_done = session.steps.iter().any(|s| s.step_name == step_name && s.is_completed);
        let now = self.ctx.clock.now();
        let finished = session.complete_step(step_name, user, now)?;
        if already_done {
            return Ok(session);
        }

        self.ctx.store.update_session(&session).await?;
        self.ctx.metrics.record_step_completed();
        self.ctx.record_audit(AuditEvent::StepCompleted {
            session_id,
            step: step_name.to_string(),
            user_id: user,
        });
        self.publish_event(&session, "step_completed", Some(step_name), user);
        debug!(
            session_id = %session_id,
            step = %step_name,
            done = %session.completed_steps(),
            total = %session.steps.len(),
            "handover_step_completed"
        );

        if finished {
            self.on_session_completed(&session, user).await?;
        }
        Ok(session)
    }

    /// Mark the session complete regardless of checklist progress
    pub async fn complete_session(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> DomainResult<HandoverSession> {
        let mut session = self.load_session(session_id).await?;
        if !session.is_complete() {
            self.ensure_booking_confirmed(session.booking_id).await?;
        }
        if session.mark_completed(user, self.ctx.clock.now())? {
            self.ctx.store.update_session(&session).await?;
            self.on_session_completed(&session, user).await?;
        }
        Ok(session)
    }

    async fn on_session_completed(&self, session: &HandoverSession, user: UserId) -> DomainResult<()> {
        self.ctx.metrics.record_session_completed();
        self.ctx.record_audit(AuditEvent::SessionCompleted {
            booking_id: session.booking_id,
            session_id: session.id,
            handover_type: session.handover_type,
            user_id: user,
        });
        self.publish_event(session, "completed", None, user);
        info!(
            booking_id = %session.booking_id,
            session_id = %session.id,
            handover_type = %session.handover_type,
            "handover_completed"
        );

        if session.handover_type != HandoverType::Return {
            return Ok(());
        }

        let mut booking = self
            .ctx
            .store
            .get_booking(session.booking_id)
            .await?
            .ok_or_else(|| DomainError::not_found("booking", session.booking_id))?;
        match booking.status {
            BookingStatus::Confirmed => {
                persist_transition(&self.ctx, &mut booking, BookingStatus::Completed, Some(user)).await
            }
            BookingStatus::Completed => Ok(()),
            other => {
                warn!(booking_id = %booking.id, status = %other, "return_completed_on_inactive_booking");
                Ok(())
            }
        }
    }

    /// Relay a participant's live position; returns false if it was dropped
    pub async fn share_location(
        &self,
        session_id: SessionId,
        user: UserId,
        lat: f64,
        lng: f64,
    ) -> DomainResult<bool> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(DomainError::InvalidInput(format!("latitude out of range: {lat}")));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(DomainError::InvalidInput(format!("longitude out of range: {lng}")));
        }

        let session = self.load_session(session_id).await?;
        if !session.is_participant(user) {
            return Err(DomainError::NotParticipant(user.to_string()));
        }
        if session.is_complete() {
            return Err(DomainError::InvalidStateTransition(format!(
                "session {} is already completed",
                session_id
            )));
        }
        self.ensure_booking_confirmed(session.booking_id).await?;

        let Some(realtime) = &self.ctx.realtime else {
            debug!(session_id = %session_id, "location_not_published_realtime_disabled");
            return Ok(false);
        };
        let published = realtime.send_location(LocationPayload {
            site: None,
            session_id,
            user_id: user,
            lat,
            lng,
            ts: self.ctx.clock.now().timestamp_millis(),
        });
        self.ctx.metrics.record_location_update(!published);
        if !published {
            debug!(session_id = %session_id, "location_dropped_channel_full");
        }
        Ok(published)
    }

    fn publish_event(&self, session: &HandoverSession, t: &str, step: Option<&str>, user: UserId) {
        let Some(realtime) = &self.ctx.realtime else {
            return;
        };
        let sent = realtime.send_handover_event(HandoverEventPayload {
            site: None,
            session_id: session.id,
            booking_id: session.booking_id,
            handover_type: session.handover_type,
            t: t.to_string(),
            step: step.map(str::to_string),
            user_id: user,
            ts: self.ctx.clock.now().timestamp_millis(),
        });
        if !sent {
            warn!(session_id = %session.id, event = %t, "handover_event_dropped");
        }
    }
}

fn ensure_confirmed(booking: &Booking) -> DomainResult<()> {
    if booking.status != BookingStatus::Confirmed {
        return Err(DomainError::HandoverNotAllowed(format!(
            "booking {} is {}",
            booking.id, booking.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::DEFAULT_HANDOVER_STEPS;
    use crate::domain::types::CarId;
    use crate::infra::clock::FixedClock;
    use crate::infra::metrics::Metrics;
    use crate::io::memory::InMemoryStore;
    use crate::io::realtime::{create_realtime_channel, RealtimeMessage};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    struct Fixture {
        service: HandoverService,
        ctx: ServiceContext,
        clock: Arc<FixedClock>,
        booking: Booking,
    }

    async fn fixture(today: u32, policy: HandoverPolicy) -> Fixture {
        let clock = Arc::new(FixedClock::at_date(date(today)));
        let ctx = ServiceContext::new(
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            Arc::new(Metrics::new()),
        );
        let mut booking =
            Booking::new(UserId::new(), UserId::new(), CarId::new(), date(10), date(13), 36_000)
                .unwrap();
        booking.transition(BookingStatus::Confirmed).unwrap();
        ctx.store.insert_booking(booking.clone()).await.unwrap();
        Fixture { service: HandoverService::new(ctx.clone(), policy), ctx, clock, booking }
    }

    #[tokio::test]
    async fn test_start_pickup_then_resume() {
        let f = fixture(10, HandoverPolicy::default()).await;
        let first = f
            .service
            .start_handover(f.booking.id, f.booking.renter_id, HandoverType::Pickup)
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.session.steps.len(), DEFAULT_HANDOVER_STEPS.len());

        // Owner joins the open session even though owners may not initiate
        let joined = f
            .service
            .start_handover(f.booking.id, f.booking.owner_id, HandoverType::Pickup)
            .await
            .unwrap();
        assert!(!joined.created);
        assert_eq!(joined.session.id, first.session.id);

        let sessions = f.ctx.store.sessions_for_booking(f.booking.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let summary = f.ctx.metrics.report();
        assert_eq!(summary.handovers_started, 2);
        assert_eq!(summary.sessions_created, 1);
    }

    #[tokio::test]
    async fn test_start_rejected_before_start_date_and_for_owner() {
        let f = fixture(9, HandoverPolicy::default()).await;
        let err = f
            .service
            .start_handover(f.booking.id, f.booking.renter_id, HandoverType::Pickup)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "handover_not_allowed");

        f.clock.set_date(date(10));
        let err = f
            .service
            .start_handover(f.booking.id, f.booking.owner_id, HandoverType::Pickup)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "handover_not_allowed");

        let err = f
            .service
            .start_handover(f.booking.id, UserId::new(), HandoverType::Pickup)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_participant");
    }

    #[tokio::test]
    async fn test_owner_may_initiate_when_configured() {
        let f = fixture(10, HandoverPolicy { owner_may_initiate: true }).await;
        let started = f
            .service
            .start_handover(f.booking.id, f.booking.owner_id, HandoverType::Pickup)
            .await
            .unwrap();
        assert!(started.created);
    }

    #[tokio::test]
    async fn test_concurrent_starts_converge() {
        let f = fixture(10, HandoverPolicy::default()).await;
        let service = Arc::new(f.service);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let booking = f.booking.clone();
            handles.push(tokio::spawn(async move {
                service.start_handover(booking.id, booking.renter_id, HandoverType::Pickup).await
            }));
        }

        let mut ids = Vec::new();
        let mut created = 0;
        for handle in handles {
            let started = handle.await.unwrap().unwrap();
            created += usize::from(started.created);
            ids.push(started.session.id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_full_rental_completes_booking() {
        let f = fixture(10, HandoverPolicy::default()).await;
        let (sender, mut rx) = create_realtime_channel(64, "site".to_string());
        let ctx = f.ctx.clone().with_realtime(sender);
        let service = HandoverService::new(ctx, HandoverPolicy::default());
        let renter = f.booking.renter_id;
        let owner = f.booking.owner_id;

        let pickup = service.start_handover(f.booking.id, renter, HandoverType::Pickup).await.unwrap();
        for (i, step) in DEFAULT_HANDOVER_STEPS.iter().enumerate() {
            let user = if i % 2 == 0 { renter } else { owner };
            let session = service.complete_step(pickup.session.id, step, user).await.unwrap();
            assert_eq!(session.is_complete(), i + 1 == DEFAULT_HANDOVER_STEPS.len());
        }

        f.clock.set_date(date(13));
        let ret = service.start_handover(f.booking.id, renter, HandoverType::Return).await.unwrap();
        assert!(ret.created);
        service.complete_session(ret.session.id, owner).await.unwrap();

        let booking = f.ctx.store.get_booking(f.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);

        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let RealtimeMessage::Handover(p) = msg {
                kinds.push(p.t);
            }
        }
        assert_eq!(kinds.first().map(String::as_str), Some("created"));
        assert_eq!(kinds.iter().filter(|t| *t == "completed").count(), 2);
        assert_eq!(kinds.iter().filter(|t| *t == "step_completed").count(), 7);
    }

    #[tokio::test]
    async fn test_repeat_step_is_noop() {
        let f = fixture(10, HandoverPolicy::default()).await;
        let started = f
            .service
            .start_handover(f.booking.id, f.booking.renter_id, HandoverType::Pickup)
            .await
            .unwrap();
        let id = started.session.id;
        f.service.complete_step(id, "key_transfer", f.booking.renter_id).await.unwrap();
        f.service.complete_step(id, "key_transfer", f.booking.owner_id).await.unwrap();

        let stored = f.ctx.store.get_session(id).await.unwrap().unwrap();
        let step = stored.steps.iter().find(|s| s.step_name == "key_transfer").unwrap();
        assert_eq!(step.completed_by, Some(f.booking.renter_id));
        assert_eq!(f.ctx.metrics.report().steps_completed, 1);

        let err = f.service.complete_step(id, "wash_car", f.booking.renter_id).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_share_location() {
        let f = fixture(10, HandoverPolicy::default()).await;
        let started = f
            .service
            .start_handover(f.booking.id, f.booking.renter_id, HandoverType::Pickup)
            .await
            .unwrap();
        let id = started.session.id;

        // Realtime disabled
        assert!(!f.service.share_location(id, f.booking.renter_id, -24.6, 25.9).await.unwrap());

        let err = f.service.share_location(id, f.booking.renter_id, 91.0, 0.0).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        let err = f.service.share_location(id, UserId::new(), 0.0, 0.0).await.unwrap_err();
        assert_eq!(err.code(), "not_participant");

        let (sender, mut rx) = create_realtime_channel(4, "site".to_string());
        let service = HandoverService::new(f.ctx.clone().with_realtime(sender), HandoverPolicy::default());
        assert!(service.share_location(id, f.booking.owner_id, -24.6, 25.9).await.unwrap());
        match rx.recv().await.unwrap() {
            RealtimeMessage::Location(p) => assert_eq!(p.user_id, f.booking.owner_id),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_booking_freezes_open_session() {
        let f = fixture(10, HandoverPolicy::default()).await;
        let renter = f.booking.renter_id;
        let started = f
            .service
            .start_handover(f.booking.id, renter, HandoverType::Pickup)
            .await
            .unwrap();
        let id = started.session.id;
        f.service.complete_step(id, "identity_verification", renter).await.unwrap();

        let mut booking = f.ctx.store.get_booking(f.booking.id).await.unwrap().unwrap();
        booking.transition(BookingStatus::Cancelled).unwrap();
        f.ctx.store.update_booking(&booking).await.unwrap();

        let err = f
            .service
            .start_handover(f.booking.id, renter, HandoverType::Pickup)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "handover_not_allowed");
        let err = f.service.complete_step(id, "key_transfer", renter).await.unwrap_err();
        assert_eq!(err.code(), "handover_not_allowed");
        let err = f.service.complete_session(id, renter).await.unwrap_err();
        assert_eq!(err.code(), "handover_not_allowed");
        let err = f.service.share_location(id, renter, 0.0, 0.0).await.unwrap_err();
        assert_eq!(err.code(), "handover_not_allowed");

        let stored = f.ctx.store.get_session(id).await.unwrap().unwrap();
        assert!(!stored.is_complete());
        assert_eq!(stored.completed_steps(), 1);
    }
}
