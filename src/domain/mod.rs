//! Domain models - core rental types and pure business rules
//!
//! This module contains the canonical data types used throughout the system:
//! - `Booking` / `HandoverSession` / `StepCompletion` - rental rows
//! - `RentalState` / `RentalView` - derived lifecycle state
//! - `PromoCode` / `PromoUsage` - promo rules and redemption rows
//! - `DomainError` - error taxonomy shared by services and adapters

pub mod booking;
pub mod error;
pub mod lifecycle;
pub mod promo;
pub mod types;

// Re-export commonly used types at module level
pub use booking::{Booking, HandoverSession, RentalRecord, StepCompletion};
pub use error::{DomainError, DomainResult};
pub use lifecycle::{derive_view, HandoverPolicy, RentalState, RentalView};
pub use promo::{PromoCode, PromoQuote, PromoRejection, PromoUsage};
