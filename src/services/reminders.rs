//! Pickup and return reminders
//!
//! A periodic sweep notifies both parties of confirmed bookings the day
//! before pickup and the day before return. Each (booking, kind, recipient)
//! is delivered at most once per process, even when sweeps overlap; failed
//! deliveries are released and retried on the next sweep. Delivery records
//! are dropped once the announced date has passed.

use crate::domain::booking::Booking;
use crate::domain::error::DomainResult;
use crate::domain::types::{BookingId, BookingStatus, UserId, ViewerRole};
use crate::io::store::BookingFilter;
use crate::services::context::ServiceContext;
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Pickup,
    Return,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::Pickup => "pickup",
            ReminderKind::Return => "return",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    pub booking_id: BookingId,
    pub kind: ReminderKind,
    pub recipient: UserId,
    pub role: ViewerRole,
    /// Pickup or return date being announced
    pub date: NaiveDate,
}

type ReminderKey = (BookingId, ReminderKind, UserId, NaiveDate);

impl Reminder {
    fn key(&self) -> ReminderKey {
        (self.booking_id, self.kind, self.recipient, self.date)
    }
}

/// Delivery channel for reminders
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()>;
}

/// Reminders due on `today` for the given bookings
pub fn due_reminders(bookings: &[Booking], today: NaiveDate) -> Vec<Reminder> {
    let Some(tomorrow) = today.checked_add_days(Days::new(1)) else {
        return Vec::new();
    };

    let mut due = Vec::new();
    for booking in bookings.iter().filter(|b| b.status == BookingStatus::Confirmed) {
        let kinds = [
            (ReminderKind::Pickup, booking.start_date),
            (ReminderKind::Return, booking.end_date),
        ];
        for (kind, date) in kinds.into_iter().filter(|(_, date)| *date == tomorrow) {
            for (recipient, role) in
                [(booking.renter_id, ViewerRole::Renter), (booking.owner_id, ViewerRole::Owner)]
            {
                due.push(Reminder { booking_id: booking.id, kind, recipient, role, date });
            }
        }
    }
    due
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct ReminderService {
    ctx: ServiceContext,
    notifier: Arc<dyn Notifier>,
    /// Claimed or delivered reminders; a key is claimed before delivery
    sent: Mutex<FxHashSet<ReminderKey>>,
}

impl ReminderService {
    pub fn new(ctx: ServiceContext, notifier: Arc<dyn Notifier>) -> Self {
        Self { ctx, notifier, sent: Mutex::new(FxHashSet::default()) }
    }

    pub async fn run_sweep(&self) -> DomainResult<SweepReport> {
        let today = self.ctx.clock.today();
        let confirmed = self
            .ctx
            .store
            .list_bookings(BookingFilter::with_status(BookingStatus::Confirmed))
            .await?;
        let due = due_reminders(&confirmed, today);
        self.prune_before(today);

        let mut report = SweepReport { due: due.len(), ..Default::default() };
        for reminder in &due {
            if !self.sent.lock().insert(reminder.key()) {
                report.skipped += 1;
                continue;
            }

            match self.notifier.notify(reminder).await {
                Ok(()) => {
                    self.ctx.metrics.record_reminder(true);
                    report.sent += 1;
                    debug!(
                        booking_id = %reminder.booking_id,
                        kind = %reminder.kind.as_str(),
                        recipient = %reminder.recipient,
                        "reminder_sent"
                    );
                }
                Err(e) => {
                    self.sent.lock().remove(&reminder.key());
                    self.ctx.metrics.record_reminder(false);
                    report.failed += 1;
                    warn!(
                        booking_id = %reminder.booking_id,
                        kind = %reminder.kind.as_str(),
                        recipient = %reminder.recipient,
                        error = %e,
                        "reminder_failed"
                    );
                }
            }
        }

        info!(
            today = %today,
            due = %report.due,
            sent = %report.sent,
            failed = %report.failed,
            skipped = %report.skipped,
            "reminder_sweep_complete"
        );
        Ok(report)
    }

    /// Forget reminders whose announced date is already past
    fn prune_before(&self, today: NaiveDate) {
        let mut sent = self.sent.lock();
        let before = sent.len();
        sent.retain(|(_, _, _, date)| *date >= today);
        if sent.len() < before {
            debug!(pruned = %(before - sent.len()), remaining = %sent.len(), "reminder_keys_pruned");
        }
    }

    /// Sweep on a fixed interval until shutdown
    pub async fn run(self: Arc<Self>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        info!(interval_secs = %interval_secs, "reminder_loop_started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_sweep().await {
                        warn!(error = %e, "reminder_sweep_failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reminder_loop_shutdown");
                        return;
                    }
                }
            }
        }
    }
}
