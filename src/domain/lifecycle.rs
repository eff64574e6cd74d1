//! Rental lifecycle derivation
//!
//! Reduces a booking row, its handover sessions and the current date to a
//! single display state plus the handover actions the viewer may start.
//! The derivation is pure: no I/O, no clock reads.
//!
//! Rules are evaluated in precedence order:
//! 1. `Completed` - booking completed, or the return session is complete
//! 2. `PendingPickup` - confirmed, no pickup session yet, start date reached
//! 3. `InProgress` - confirmed, pickup complete, today in `[start, end + 1)`
//! 4. `PendingReturn` - confirmed, pickup complete, today past the end date
//! 5. `Inactive` - anything else, carrying the raw booking status

use crate::domain::booking::RentalRecord;
use crate::domain::types::{BookingStatus, HandoverType, SessionId, UserId, ViewerRole};
use chrono::{Days, NaiveDate};
use serde::Serialize;

/// Mutually exclusive rental state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "status", rename_all = "snake_case")]
pub enum RentalState {
    PendingPickup,
    InProgress,
    PendingReturn,
    Completed,
    /// Not yet due, or cancelled/expired; surfaced as-is
    Inactive(BookingStatus),
}

impl RentalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RentalState::PendingPickup => "pending_pickup",
            RentalState::InProgress => "in_progress",
            RentalState::PendingReturn => "pending_return",
            RentalState::Completed => "completed",
            RentalState::Inactive(_) => "inactive",
        }
    }
}

/// Which roles may start a handover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandoverPolicy {
    /// Owners may start pickup/return in addition to renters
    pub owner_may_initiate: bool,
}

impl HandoverPolicy {
    pub fn permits(&self, role: ViewerRole) -> bool {
        match role {
            ViewerRole::Renter => true,
            ViewerRole::Owner => self.owner_may_initiate,
            ViewerRole::Observer => false,
        }
    }
}

/// Derived lifecycle view for one viewer on one day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RentalView {
    pub state: RentalState,
    pub role: ViewerRole,
    pub can_initiate_pickup: bool,
    pub can_initiate_return: bool,
    pub pickup_session: Option<SessionId>,
    pub return_session: Option<SessionId>,
    /// Whole days past the end date while the car is still out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overdue_days: Option<i64>,
}

impl RentalView {
    pub fn can_initiate(&self, handover_type: HandoverType) -> bool {
        match handover_type {
            HandoverType::Pickup => self.can_initiate_pickup,
            HandoverType::Return => self.can_initiate_return,
        }
    }
}

/// Compute the lifecycle state only
pub fn derive_state(record: &RentalRecord, today: NaiveDate) -> RentalState {
    let booking = &record.booking;
    let pickup = record.pickup_session();
    let return_complete = record.return_session().is_some_and(|s| s.is_complete());

    if booking.status == BookingStatus::Completed || return_complete {
        return RentalState::Completed;
    }

    if booking.status != BookingStatus::Confirmed {
        return RentalState::Inactive(booking.status);
    }

    let Some(pickup) = pickup else {
        if today >= booking.start_date {
            return RentalState::PendingPickup;
        }
        return RentalState::Inactive(booking.status);
    };

    if !pickup.is_complete() {
        return RentalState::Inactive(booking.status);
    }

    let return_due = booking.end_date.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);
    if today >= booking.start_date && today < return_due {
        return RentalState::InProgress;
    }
    if today >= booking.end_date {
        return RentalState::PendingReturn;
    }

    RentalState::Inactive(booking.status)
}

/// Derive the full view for a viewer
///
/// # Example
///
/// ```
/// use carshare::domain::booking::{Booking, RentalRecord};
/// use carshare::domain::lifecycle::{derive_view, HandoverPolicy, RentalState};
/// use carshare::domain::types::{BookingStatus, CarId, UserId};
/// use chrono::NaiveDate;
///
/// let renter = UserId::new();
/// let mut booking = Booking::new(
///     renter,
///     UserId::new(),
///     CarId::new(),
///     NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
///     NaiveDate::from_ymd_opt(2024, 1, 13).unwrap(),
///     36_000,
/// )
/// .unwrap();
/// booking.status = BookingStatus::Confirmed;
///
/// let record = RentalRecord::new(booking, []);
/// let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
/// let view = derive_view(&record, renter, today, HandoverPolicy::default());
/// assert_eq!(view.state, RentalState::PendingPickup);
/// assert!(view.can_initiate_pickup);
/// assert!(!view.can_initiate_return);
/// ```
pub fn derive_view(
    record: &RentalRecord,
    viewer: UserId,
    today: NaiveDate,
    policy: HandoverPolicy,
) -> RentalView {
    let state = derive_state(record, today);
    let role = record.booking.role_of(viewer);
    let permitted = policy.permits(role);

    let return_complete = record.return_session().is_some_and(|s| s.is_complete());

    let can_initiate_pickup = permitted && state == RentalState::PendingPickup;
    let can_initiate_return = permitted
        && matches!(state, RentalState::InProgress | RentalState::PendingReturn)
        && !return_complete;

    let overdue_days = (state == RentalState::PendingReturn)
        .then(|| (today - record.booking.end_date).num_days())
        .filter(|days| *days > 0);

    RentalView {
        state,
        role,
        can_initiate_pickup,
        can_initiate_return,
        pickup_session: record.pickup_session().map(|s| s.id),
        return_session: record.return_session().map(|s| s.id),
        overdue_days,
    }
}
