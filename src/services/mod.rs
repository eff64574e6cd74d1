//! Services - business operations over the storage port
//!
//! This module contains the core business logic services:
//! - `context` - Shared store, clock, metrics and egress handles
//! - `rental_details` - Derived lifecycle view for a viewer
//! - `handover` - Pickup/return sessions, checklist steps, live location
//! - `booking` - Approve, cancel and expire transitions
//! - `promo` - Promo code validation and exactly-once redemption
//! - `reminders` - Day-before pickup and return reminders

pub mod booking;
pub mod context;
pub mod handover;
pub mod promo;
pub mod reminders;
pub mod rental_details;

// Re-export commonly used types
pub use booking::BookingService;
pub use context::ServiceContext;
pub use handover::{HandoverService, StartedHandover};
pub use promo::PromoService;
pub use reminders::{Notifier, Reminder, ReminderKind, ReminderService};
pub use rental_details::{RentalDetails, RentalDetailsService};
