//! Promo code validation and redemption

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::promo::{evaluate, PromoCode, PromoQuote, PromoUsage};
use crate::domain::types::{BookingId, Cents, UserId};
use crate::io::audit::AuditEvent;
use crate::services::context::ServiceContext;
use tracing::{debug, info};

pub struct PromoService {
    ctx: ServiceContext,
}

impl PromoService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Quote the discount for `amount` without recording anything
    pub async fn validate(&self, code: &str, user: UserId, amount: Cents) -> DomainResult<PromoQuote> {
        let result = self.quote(code, user, amount).await;
        self.ctx.metrics.record_promo_validation(result.is_ok());
        match &result {
            Ok(quote) => debug!(code = %quote.code, user = %user, discount = %quote.discount, "promo_validated"),
            Err(e) => debug!(code = %code, user = %user, reason = %e.code(), "promo_rejected"),
        }
        result
    }

    async fn quote(&self, code: &str, user: UserId, amount: Cents) -> DomainResult<PromoQuote> {
        let normalized = PromoCode::normalize_code(code);
        let promo = self.ctx.store.find_promo_by_code(&normalized).await?;
        let already_used = match &promo {
            Some(promo) => self.ctx.store.has_promo_usage(promo.id, user).await?,
            None => false,
        };
        Ok(evaluate(promo.as_ref(), amount, self.ctx.clock.now(), already_used)?)
    }

    /// Validate and record one redemption for this user
    ///
    /// With a booking, only its renter may redeem and `amount` must equal the
    /// booking's total price. The usage row and counter bump happen
    /// atomically in the store, so a concurrent redemption of the last
    /// available use fails cleanly.
    pub async fn apply(
        &self,
        code: &str,
        user: UserId,
        booking_id: Option<BookingId>,
        amount: Cents,
    ) -> DomainResult<PromoUsage> {
        if let Some(booking_id) = booking_id {
            let booking = self
                .ctx
                .store
                .get_booking(booking_id)
                .await?
                .ok_or_else(|| DomainError::not_found("booking", booking_id))?;
            if booking.renter_id != user {
                return Err(DomainError::NotParticipant(user.to_string()));
            }
            if booking.total_price != amount {
                return Err(DomainError::InvalidInput(format!(
                    "amount {} does not match booking {} total {}",
                    amount, booking_id, booking.total_price
                )));
            }
        }

        let quote = self.validate(code, user, amount).await?;
        let usage = PromoUsage::from_quote(&quote, user, booking_id, self.ctx.clock.now());
        let promo = self.ctx.store.redeem_promo(usage.clone()).await?;

        self.ctx.metrics.record_promo_redemption();
        self.ctx.record_audit(AuditEvent::PromoRedeemed {
            promo_code_id: promo.id,
            code: promo.code.clone(),
            user_id: user,
            booking_id,
            discount: usage.discount_applied,
        });
        info!(
            code = %promo.code,
            user = %user,
            discount = %usage.discount_applied,
            final_amount = %usage.final_amount,
            current_uses = %promo.current_uses,
            "promo_redeemed"
        );
        Ok(usage)
    }
}
