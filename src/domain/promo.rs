//! Promo code rules: validation order, discount math, usage rows

use crate::domain::types::{BookingId, Cents, PromoCodeId, UsageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// `discount_amount` is percent points
    Percentage,
    /// `discount_amount` is in cents
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: PromoCodeId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_amount: i64,
    pub is_active: bool,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub current_uses: u32,
    #[serde(default)]
    pub min_booking_amount: Option<Cents>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Why a code cannot be applied; the first failing check wins
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromoRejection {
    #[error("booking amount must not be negative")]
    InvalidAmount,
    #[error("promo code does not exist")]
    NotFound,
    #[error("promo code is not active")]
    Inactive,
    #[error("promo code is not valid yet")]
    NotYetValid,
    #[error("promo code has expired")]
    Expired,
    #[error("promo code usage limit reached")]
    UsageLimitReached,
    #[error("booking amount is below the minimum of {minimum}")]
    BelowMinimum { minimum: Cents },
    #[error("promo code already used by this user")]
    AlreadyUsed,
}

impl PromoRejection {
    pub fn code(&self) -> &'static str {
        match self {
            PromoRejection::InvalidAmount => "promo_invalid_amount",
            PromoRejection::NotFound => "promo_not_found",
            PromoRejection::Inactive => "promo_inactive",
            PromoRejection::NotYetValid => "promo_not_yet_valid",
            PromoRejection::Expired => "promo_expired",
            PromoRejection::UsageLimitReached => "promo_usage_limit_reached",
            PromoRejection::BelowMinimum { .. } => "promo_below_minimum",
            PromoRejection::AlreadyUsed => "promo_already_used",
        }
    }
}

impl PromoCode {
    /// Codes are stored and matched upper-case
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn new(code: &str, discount_type: DiscountType, discount_amount: i64) -> Self {
        Self {
            id: PromoCodeId::new(),
            code: Self::normalize_code(code),
            discount_type,
            discount_amount,
            is_active: true,
            valid_from: None,
            valid_until: None,
            max_uses: None,
            current_uses: 0,
            min_booking_amount: None,
            description: None,
        }
    }

    /// `current_uses == max_uses` already counts as exhausted
    pub fn usage_cap_reached(&self) -> bool {
        self.max_uses.is_some_and(|max| self.current_uses >= max)
    }

    /// Discount in cents, never more than the booking amount
    pub fn discount_for(&self, amount: Cents) -> Cents {
        if amount <= 0 {
            return 0;
        }
        let raw = match self.discount_type {
            DiscountType::Fixed => self.discount_amount.max(0),
            DiscountType::Percentage => {
                let pct = i128::from(self.discount_amount.max(0));
                // half-up rounding to the cent
                let scaled = (i128::from(amount) * pct + 50) / 100;
                Cents::try_from(scaled).unwrap_or(Cents::MAX)
            }
        };
        raw.min(amount)
    }

    /// Checks that depend only on the code row and the amount
    pub fn check(&self, amount: Cents, now: DateTime<Utc>) -> Result<(), PromoRejection> {
        if !self.is_active {
            return Err(PromoRejection::Inactive);
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(PromoRejection::NotYetValid);
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return Err(PromoRejection::Expired);
        }
        if self.usage_cap_reached() {
            return Err(PromoRejection::UsageLimitReached);
        }
        if let Some(minimum) = self.min_booking_amount {
            if amount < minimum {
                return Err(PromoRejection::BelowMinimum { minimum });
            }
        }
        Ok(())
    }
}

/// Result of a successful validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromoQuote {
    pub promo_code_id: PromoCodeId,
    pub code: String,
    pub discount: Cents,
    pub original_amount: Cents,
    pub final_amount: Cents,
}

/// Run the full validation chain
///
/// `already_used` is whether a usage row exists for this user and code,
/// independent of the code's usage counter.
pub fn evaluate(
    promo: Option<&PromoCode>,
    amount: Cents,
    now: DateTime<Utc>,
    already_used: bool,
) -> Result<PromoQuote, PromoRejection> {
    if amount < 0 {
        return Err(PromoRejection::InvalidAmount);
    }
    let promo = promo.ok_or(PromoRejection::NotFound)?;
    promo.check(amount, now)?;
    if already_used {
        return Err(PromoRejection::AlreadyUsed);
    }

    let discount = promo.discount_for(amount);
    Ok(PromoQuote {
        promo_code_id: promo.id,
        code: promo.code.clone(),
        discount,
        original_amount: amount,
        final_amount: amount - discount,
    })
}

/// One redemption of a code by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoUsage {
    pub id: UsageId,
    pub promo_code_id: PromoCodeId,
    pub user_id: UserId,
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    pub discount_applied: Cents,
    pub original_amount: Cents,
    pub final_amount: Cents,
    pub used_at: DateTime<Utc>,
}

impl PromoUsage {
    pub fn from_quote(
        quote: &PromoQuote,
        user_id: UserId,
        booking_id: Option<BookingId>,
        used_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UsageId::new(),
            promo_code_id: quote.promo_code_id,
            user_id,
            booking_id,
            discount_applied: quote.discount,
            original_amount: quote.original_amount,
            final_amount: quote.final_amount,
            used_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(PromoCode::normalize_code("  welcome10 "), "WELCOME10");
        assert_eq!(PromoCode::new("summer", DiscountType::Fixed, 500).code, "SUMMER");
    }

    #[test]
    fn test_fixed_discount_caps_at_amount() {
        let promo = PromoCode::new("FIX", DiscountType::Fixed, 5_000);
        assert_eq!(promo.discount_for(20_000), 5_000);
        assert_eq!(promo.discount_for(3_000), 3_000);
        assert_eq!(promo.discount_for(0), 0);
    }

    #[test]
    fn test_percentage_discount_rounds_half_up() {
        let promo = PromoCode::new("PCT", DiscountType::Percentage, 15);
        assert_eq!(promo.discount_for(10_000), 1_500);
        // 15% of 333 = 49.95 -> 50
        assert_eq!(promo.discount_for(333), 50);
    }

    #[test]
    fn test_percentage_over_hundred_caps_exactly() {
        let promo = PromoCode::new("PCT", DiscountType::Percentage, 150);
        assert_eq!(promo.discount_for(12_345), 12_345);
        let quote = evaluate(Some(&promo), 12_345, now(), false).unwrap();
        assert_eq!(quote.final_amount, 0);
    }

    #[test]
    fn test_validation_order() {
        assert_eq!(evaluate(None, 100, now(), false), Err(PromoRejection::NotFound));
        assert_eq!(evaluate(None, -1, now(), false), Err(PromoRejection::InvalidAmount));

        let mut promo = PromoCode::new("X", DiscountType::Fixed, 100);
        promo.is_active = false;
        promo.max_uses = Some(1);
        promo.current_uses = 1;
        // Inactive wins over usage cap
        assert_eq!(evaluate(Some(&promo), 100, now(), true), Err(PromoRejection::Inactive));

        promo.is_active = true;
        promo.valid_until = Some(now() - Duration::days(1));
        assert_eq!(evaluate(Some(&promo), 100, now(), true), Err(PromoRejection::Expired));

        promo.valid_until = None;
        promo.valid_from = Some(now() + Duration::hours(1));
        assert_eq!(evaluate(Some(&promo), 100, now(), true), Err(PromoRejection::NotYetValid));

        promo.valid_from = None;
        assert_eq!(
            evaluate(Some(&promo), 100, now(), true),
            Err(PromoRejection::UsageLimitReached)
        );

        promo.max_uses = None;
        promo.min_booking_amount = Some(1_000);
        assert_eq!(
            evaluate(Some(&promo), 100, now(), true),
            Err(PromoRejection::BelowMinimum { minimum: 1_000 })
        );

        assert_eq!(evaluate(Some(&promo), 1_000, now(), true), Err(PromoRejection::AlreadyUsed));
        assert!(evaluate(Some(&promo), 1_000, now(), false).is_ok());
    }

    #[test]
    fn test_usage_cap_boundary_is_equality() {
        let mut promo = PromoCode::new("CAP", DiscountType::Fixed, 100);
        promo.max_uses = Some(3);
        promo.current_uses = 2;
        assert!(!promo.usage_cap_reached());
        promo.current_uses = 3;
        assert!(promo.usage_cap_reached());
        assert_eq!(promo.check(500, now()), Err(PromoRejection::UsageLimitReached));
    }

    #[test]
    fn test_window_edges_are_inclusive() {
        let mut promo = PromoCode::new("WIN", DiscountType::Fixed, 100);
        promo.valid_from = Some(now());
        promo.valid_until = Some(now());
        assert!(promo.check(500, now()).is_ok());
    }

    #[test]
    fn test_usage_from_quote() {
        let promo = PromoCode::new("FIX", DiscountType::Fixed, 700);
        let quote = evaluate(Some(&promo), 2_000, now(), false).unwrap();
        let user = UserId::new();
        let booking = BookingId::new();
        let usage = PromoUsage::from_quote(&quote, user, Some(booking), now());

        assert_eq!(usage.promo_code_id, promo.id);
        assert_eq!(usage.discount_applied, 700);
        assert_eq!(usage.original_amount, 2_000);
        assert_eq!(usage.final_amount, 1_300);
        assert_eq!(usage.booking_id, Some(booking));
    }
}
