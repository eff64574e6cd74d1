//! In-memory implementation of the storage port
//!
//! All tables live behind one lock so multi-row operations (session
//! uniqueness, promo redemption) are atomic. Suitable for development,
//! tests and single-node deployments seeded from a JSON file.

use crate::domain::booking::{Booking, HandoverSession};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::promo::{PromoCode, PromoRejection, PromoUsage};
use crate::domain::types::{BookingId, PromoCodeId, SessionId, UserId};
use crate::io::store::{BookingFilter, RentalStore};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

#[derive(Default)]
struct Tables {
    bookings: FxHashMap<BookingId, Booking>,
    sessions: FxHashMap<SessionId, HandoverSession>,
    promos: FxHashMap<PromoCodeId, PromoCode>,
    /// Upper-case code -> promo id
    promo_codes: FxHashMap<String, PromoCodeId>,
    usages: Vec<PromoUsage>,
}

impl Tables {
    fn has_usage(&self, promo_id: PromoCodeId, user_id: UserId) -> bool {
        self.usages.iter().any(|u| u.promo_code_id == promo_id && u.user_id == user_id)
    }
}

/// Rows loaded at startup
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub bookings: Vec<Booking>,
    #[serde(default)]
    pub sessions: Vec<HandoverSession>,
    #[serde(default)]
    pub promo_codes: Vec<PromoCode>,
    #[serde(default)]
    pub promo_usages: Vec<PromoUsage>,
}

impl SeedData {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from seed rows, enforcing the same constraints as inserts
    pub fn from_seed(seed: SeedData) -> DomainResult<Self> {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for booking in seed.bookings {
                tables.bookings.insert(booking.id, booking);
            }
            for session in seed.sessions {
                Self::insert_session_locked(&mut tables, session)?;
            }
            for mut promo in seed.promo_codes {
                promo.code = PromoCode::normalize_code(&promo.code);
                tables.promo_codes.insert(promo.code.clone(), promo.id);
                tables.promos.insert(promo.id, promo);
            }
            for usage in seed.promo_usages {
                if !tables.promos.contains_key(&usage.promo_code_id) {
                    return Err(DomainError::Storage(format!(
                        "usage {} references unknown promo {}",
                        usage.id, usage.promo_code_id
                    )));
                }
                if tables.has_usage(usage.promo_code_id, usage.user_id) {
                    return Err(DomainError::Storage(format!(
                        "promo {} used twice by user {}",
                        usage.promo_code_id, usage.user_id
                    )));
                }
                tables.usages.push(usage);
            }

            info!(
                bookings = %tables.bookings.len(),
                sessions = %tables.sessions.len(),
                promo_codes = %tables.promos.len(),
                promo_usages = %tables.usages.len(),
                "store_seeded"
            );
        }
        Ok(store)
    }

    fn insert_session_locked(tables: &mut Tables, session: HandoverSession) -> DomainResult<()> {
        if !tables.bookings.contains_key(&session.booking_id) {
            return Err(DomainError::not_found("booking", session.booking_id));
        }
        let duplicate = tables.sessions.values().any(|s| {
            s.booking_id == session.booking_id && s.handover_type == session.handover_type
        });
        if duplicate {
            return Err(DomainError::DuplicateSession(session.booking_id.to_string()));
        }
        tables.sessions.insert(session.id, session);
        Ok(())
    }
}

#[async_trait]
impl RentalStore for InMemoryStore {
    async fn insert_booking(&self, booking: Booking) -> DomainResult<()> {
        let mut tables = self.tables.write();
        if tables.bookings.contains_key(&booking.id) {
            return Err(DomainError::Storage(format!("booking {} already exists", booking.id)));
        }
        tables.bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn get_booking(&self, id: BookingId) -> DomainResult<Option<Booking>> {
        Ok(self.tables.read().bookings.get(&id).cloned())
    }

    async fn update_booking(&self, booking: &Booking) -> DomainResult<()> {
        let mut tables = self.tables.write();
        let row = tables
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| DomainError::not_found("booking", booking.id))?;
        *row = booking.clone();
        Ok(())
    }

    async fn list_bookings(&self, filter: BookingFilter) -> DomainResult<Vec<Booking>> {
        let tables = self.tables.read();
        let mut rows: Vec<Booking> =
            tables.bookings.values().filter(|b| filter.matches(b)).cloned().collect();
        rows.sort_by_key(|b| (b.start_date, b.created_at));
        Ok(rows)
    }

    async fn sessions_for_booking(
        &self,
        booking_id: BookingId,
    ) -> DomainResult<Vec<HandoverSession>> {
        let tables = self.tables.read();
        let mut rows: Vec<HandoverSession> =
            tables.sessions.values().filter(|s| s.booking_id == booking_id).cloned().collect();
        rows.sort_by_key(|s| s.created_at);
        Ok(rows)
    }

    async fn get_session(&self, id: SessionId) -> DomainResult<Option<HandoverSession>> {
        Ok(self.tables.read().sessions.get(&id).cloned())
    }

    async fn insert_session(&self, session: HandoverSession) -> DomainResult<()> {
        let mut tables = self.tables.write();
        debug!(session_id = %session.id, booking_id = %session.booking_id, "session_insert");
        Self::insert_session_locked(&mut tables, session)
    }

    async fn update_session(&self, session: &HandoverSession) -> DomainResult<()> {
        let mut tables = self.tables.write();
        let row = tables
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| DomainError::not_found("handover session", session.id))?;
        *row = session.clone();
        Ok(())
    }

    async fn insert_promo(&self, mut promo: PromoCode) -> DomainResult<()> {
        promo.code = PromoCode::normalize_code(&promo.code);
        let mut tables = self.tables.write();
        if tables.promo_codes.contains_key(&promo.code) {
            return Err(DomainError::Storage(format!("promo code {} already exists", promo.code)));
        }
        tables.promo_codes.insert(promo.code.clone(), promo.id);
        tables.promos.insert(promo.id, promo);
        Ok(())
    }

    async fn find_promo_by_code(&self, code: &str) -> DomainResult<Option<PromoCode>> {
        let key = PromoCode::normalize_code(code);
        let tables = self.tables.read();
        Ok(tables.promo_codes.get(&key).and_then(|id| tables.promos.get(id)).cloned())
    }

    async fn has_promo_usage(&self, promo_id: PromoCodeId, user_id: UserId) -> DomainResult<bool> {
        Ok(self.tables.read().has_usage(promo_id, user_id))
    }

    async fn redeem_promo(&self, usage: PromoUsage) -> DomainResult<PromoCode> {
        let mut tables = self.tables.write();

        if tables.has_usage(usage.promo_code_id, usage.user_id) {
            return Err(PromoRejection::AlreadyUsed.into());
        }

        let promo = tables
            .promos
            .get_mut(&usage.promo_code_id)
            .ok_or(DomainError::PromoRejected(PromoRejection::NotFound))?;
        if promo.usage_cap_reached() {
            return Err(PromoRejection::UsageLimitReached.into());
        }
        let promo_id = promo.id;
        promo.current_uses = promo
            .current_uses
            .checked_add(1)
            .ok_or_else(|| DomainError::Storage(format!("promo {} usage counter overflow", promo_id)))?;
        let updated = promo.clone();

        tables.usages.push(usage);
        Ok(updated)
    }

    async fn usages_for_promo(&self, promo_id: PromoCodeId) -> DomainResult<Vec<PromoUsage>> {
        let tables = self.tables.read();
        Ok(tables.usages.iter().filter(|u| u.promo_code_id == promo_id).cloned().collect())
    }
}
