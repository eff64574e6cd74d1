//! Booking, handover session and checklist data model

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::{
    BookingId, BookingStatus, CarId, Cents, HandoverType, SessionId, UserId, ViewerRole,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Checklist every new handover session starts with, in order
pub const DEFAULT_HANDOVER_STEPS: [&str; 7] = [
    "identity_verification",
    "vehicle_inspection_exterior",
    "vehicle_inspection_interior",
    "damage_documentation",
    "fuel_and_mileage_check",
    "key_transfer",
    "digital_signature",
];

/// A rental of one car by one renter over a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub renter_id: UserId,
    pub owner_id: UserId,
    pub car_id: CarId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    pub total_price: Cents,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Create a pending booking
    ///
    /// # Example
    ///
    /// ```
    /// use carshare::domain::booking::Booking;
    /// use carshare::domain::types::{BookingStatus, CarId, UserId};
    /// use chrono::NaiveDate;
    ///
    /// let booking = Booking::new(
    ///     UserId::new(),
    ///     UserId::new(),
    ///     CarId::new(),
    ///     NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
    ///     NaiveDate::from_ymd_opt(2024, 1, 13).unwrap(),
    ///     36_000,
    /// )
    /// .unwrap();
    /// assert_eq!(booking.status, BookingStatus::Pending);
    /// ```
    pub fn new(
        renter_id: UserId,
        owner_id: UserId,
        car_id: CarId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        total_price: Cents,
    ) -> DomainResult<Self> {
        if end_date < start_date {
            return Err(DomainError::InvalidInput(format!(
                "end_date {end_date} is before start_date {start_date}"
            )));
        }
        if total_price < 0 {
            return Err(DomainError::InvalidInput("total_price must not be negative".into()));
        }
        Ok(Self {
            id: BookingId::new(),
            renter_id,
            owner_id,
            car_id,
            start_date,
            end_date,
            status: BookingStatus::Pending,
            total_price,
            created_at: Utc::now(),
        })
    }

    pub fn role_of(&self, user: UserId) -> ViewerRole {
        if user == self.renter_id {
            ViewerRole::Renter
        } else if user == self.owner_id {
            ViewerRole::Owner
        } else {
            ViewerRole::Observer
        }
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.role_of(user) != ViewerRole::Observer
    }

    /// Move to a new status if the lifecycle allows it
    pub fn transition(&mut self, to: BookingStatus) -> DomainResult<()> {
        use BookingStatus::*;

        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition(format!(
                "booking {} is already {}",
                self.id, self.status
            )));
        }

        let allowed = matches!(
            (self.status, to),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        );

        if !allowed {
            return Err(DomainError::InvalidStateTransition(format!(
                "booking {} cannot go from {} to {}",
                self.id, self.status, to
            )));
        }

        self.status = to;
        Ok(())
    }
}

/// One checklist item within a handover session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub step_name: String,
    pub step_order: u32,
    pub is_completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_by: Option<UserId>,
}

impl StepCompletion {
    pub fn new(step_name: &str, step_order: u32) -> Self {
        Self {
            step_name: step_name.to_string(),
            step_order,
            is_completed: false,
            completed_at: None,
            completed_by: None,
        }
    }
}

/// Record of one physical vehicle exchange for a booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverSession {
    pub id: SessionId,
    pub booking_id: BookingId,
    pub handover_type: HandoverType,
    pub renter_id: UserId,
    pub owner_id: UserId,
    pub handover_completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<StepCompletion>,
}

impl HandoverSession {
    /// Open a session for a booking with the default checklist
    pub fn open(booking: &Booking, handover_type: HandoverType, now: DateTime<Utc>) -> Self {
        let steps = DEFAULT_HANDOVER_STEPS
            .iter()
            .zip(1u32..)
            .map(|(name, order)| StepCompletion::new(name, order))
            .collect();

        Self {
            id: SessionId::new(),
            booking_id: booking.id,
            handover_type,
            renter_id: booking.renter_id,
            owner_id: booking.owner_id,
            handover_completed: false,
            created_at: now,
            completed_at: None,
            steps,
        }
    }

    /// Explicit flag set, or a non-empty checklist with every step done
    pub fn is_complete(&self) -> bool {
        self.handover_completed
            || (!self.steps.is_empty() && self.steps.iter().all(|s| s.is_completed))
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        user == self.renter_id || user == self.owner_id
    }

    /// Mark a checklist step done
    ///
    /// Completing an already-completed step is a no-op. Returns true when this
    /// call completed the whole session.
    pub fn complete_step(
        &mut self,
        step_name: &str,
        user: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if !self.is_participant(user) {
            return Err(DomainError::NotParticipant(user.to_string()));
        }
        if self.handover_completed {
            return Err(DomainError::InvalidStateTransition(format!(
                "session {} is already completed",
                self.id
            )));
        }

        let step = self
            .steps
            .iter_mut()
            .find(|s| s.step_name == step_name)
            .ok_or_else(|| DomainError::not_found("handover step", step_name))?;

        if step.is_completed {
            return Ok(false);
        }

        step.is_completed = true;
        step.completed_at = Some(now);
        step.completed_by = Some(user);

        if self.steps.iter().all(|s| s.is_completed) {
            self.handover_completed = true;
            self.completed_at = Some(now);
            return Ok(true);
        }
        Ok(false)
    }

    /// Set the completion flag regardless of checklist progress
    pub fn mark_completed(&mut self, user: UserId, now: DateTime<Utc>) -> DomainResult<bool> {
        if !self.is_participant(user) {
            return Err(DomainError::NotParticipant(user.to_string()));
        }
        if self.handover_completed {
            return Ok(false);
        }
        self.handover_completed = true;
        self.completed_at = Some(now);
        Ok(true)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_completed).count()
    }
}

/// Booking row with its embedded handover sessions (at most two)
///
/// Deserialized records are validated and ordered like [`RentalRecord::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RentalRows")]
pub struct RentalRecord {
    pub booking: Booking,
    #[serde(default)]
    pub sessions: SmallVec<[HandoverSession; 2]>,
}

impl RentalRecord {
    /// Sessions are kept ordered by creation time
    pub fn new(booking: Booking, sessions: impl IntoIterator<Item = HandoverSession>) -> Self {
        let mut sessions: SmallVec<[HandoverSession; 2]> = sessions.into_iter().collect();
        sessions.sort_by_key(|s| s.created_at);
        Self { booking, sessions }
    }

    /// Like `new`, but rejects sessions of another booking or pair of users
    /// and more than one session per type
    pub fn validated(
        booking: Booking,
        sessions: impl IntoIterator<Item = HandoverSession>,
    ) -> DomainResult<Self> {
        let record = Self::new(booking, sessions);
        for (i, session) in record.sessions.iter().enumerate() {
            if session.booking_id != record.booking.id
                || session.renter_id != record.booking.renter_id
                || session.owner_id != record.booking.owner_id
            {
                return Err(DomainError::InvalidInput(format!(
                    "session {} does not belong to booking {}",
                    session.id, record.booking.id
                )));
            }
            if record.sessions[..i].iter().any(|s| s.handover_type == session.handover_type) {
                return Err(DomainError::DuplicateSession(record.booking.id.to_string()));
            }
        }
        Ok(record)
    }

    pub fn session(&self, handover_type: HandoverType) -> Option<&HandoverSession> {
        self.sessions.iter().find(|s| s.handover_type == handover_type)
    }

    pub fn pickup_session(&self) -> Option<&HandoverSession> {
        self.session(HandoverType::Pickup)
    }

    pub fn return_session(&self) -> Option<&HandoverSession> {
        self.session(HandoverType::Return)
    }
}

#[derive(Deserialize)]
struct RentalRows {
    booking: Booking,
    #[serde(default)]
    sessions: Vec<HandoverSession>,
}

impl TryFrom<RentalRows> for RentalRecord {
    type Error = DomainError;

    fn try_from(rows: RentalRows) -> DomainResult<Self> {
        Self::validated(rows.booking, rows.sessions)
    }
}
