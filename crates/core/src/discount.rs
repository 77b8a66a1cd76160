//! Promotion codes and gift cards.
//!
//! Resolution never fails: a code that does not exist, is inactive, outside
//! its validity window or below its minimum subtotal simply applies nothing.
//! Callers cannot distinguish "unknown code" from "invalid code".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Cents, GiftCardId, GiftCardStatus, PromotionId};

/// How a promotion's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.promotion_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PromotionKind {
    /// Whole percent of the raw subtotal, 1 to 100.
    Percent,
    /// Fixed amount in cents.
    Fixed,
}

/// A promotion code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    /// Normalised (upper-case) code.
    pub code: String,
    pub kind: PromotionKind,
    pub value: i64,
    pub active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub min_subtotal: Option<Cents>,
}

impl Promotion {
    /// Whether the promotion can be applied to `raw_subtotal` at `now`.
    #[must_use]
    pub fn is_applicable(&self, raw_subtotal: Cents, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if self.starts_at.is_some_and(|start| now < start) {
            return false;
        }
        if self.ends_at.is_some_and(|end| now > end) {
            return false;
        }
        if self.min_subtotal.is_some_and(|min| raw_subtotal < min) {
            return false;
        }
        match self.kind {
            PromotionKind::Percent => (1..=100).contains(&self.value),
            PromotionKind::Fixed => self.value >= 0,
        }
    }

    /// Discount this promotion yields on `raw_subtotal`, ignoring validity.
    #[must_use]
    pub fn amount_for(&self, raw_subtotal: Cents) -> Cents {
        match self.kind {
            PromotionKind::Percent => {
                let bps = u32::try_from(self.value.clamp(0, 100)).unwrap_or(0) * 100;
                raw_subtotal.basis_points(bps)
            }
            PromotionKind::Fixed => Cents::new(self.value),
        }
    }
}

/// A gift card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftCard {
    pub id: GiftCardId,
    /// Normalised (upper-case) code.
    pub code: String,
    pub balance: Cents,
    pub original_amount: Cents,
    pub status: GiftCardStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GiftCard {
    /// Whether the card can pay for anything at `now`.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == GiftCardStatus::Active
            && self.balance > Cents::ZERO
            && self.expires_at.is_none_or(|exp| now < exp)
    }
}

/// Normalise a user-entered code for lookup.
///
/// Returns `None` for blank input.
///
/// ```
/// use backline_core::discount::normalize_code;
///
/// assert_eq!(normalize_code(" summer10 ").as_deref(), Some("SUMMER10"));
/// assert_eq!(normalize_code("   "), None);
/// ```
#[must_use]
pub fn normalize_code(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// A code together with the cents it actually took off the subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCode {
    pub code: String,
    pub amount: Cents,
}

/// Discounts resolved for one cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscounts {
    pub promotion: Option<AppliedCode>,
    pub gift_card: Option<AppliedCode>,
}

impl AppliedDiscounts {
    /// Combined discount to feed the pricing engine.
    #[must_use]
    pub fn total(&self) -> Cents {
        self.promotion.as_ref().map_or(Cents::ZERO, |p| p.amount)
            + self.gift_card.as_ref().map_or(Cents::ZERO, |g| g.amount)
    }

    /// Gift-card cents to debit when the order is paid.
    #[must_use]
    pub fn gift_card_amount(&self) -> Cents {
        self.gift_card.as_ref().map_or(Cents::ZERO, |g| g.amount)
    }
}

/// Resolve a looked-up promotion and gift card against a raw subtotal.
///
/// The promotion is applied first. The gift card then covers at most what is
/// left of the raw subtotal, so the recorded gift-card amount is exactly the
/// amount that reduced the subtotal. Either code is dropped if it does not
/// apply or would take nothing off.
#[must_use]
pub fn apply_discounts(
    raw_subtotal: Cents,
    promotion: Option<&Promotion>,
    gift_card: Option<&GiftCard>,
    now: DateTime<Utc>,
) -> AppliedDiscounts {
    let raw_subtotal = raw_subtotal.clamp_to(Cents::ZERO, Cents::new(i64::MAX));

    let promotion = promotion
        .filter(|p| p.is_applicable(raw_subtotal, now))
        .map(|p| AppliedCode {
            code: p.code.clone(),
            amount: p.amount_for(raw_subtotal).clamp_to(Cents::ZERO, raw_subtotal),
        })
        .filter(|applied| !applied.amount.is_zero());

    let remaining =
        raw_subtotal.saturating_sub(promotion.as_ref().map_or(Cents::ZERO, |p| p.amount));

    let gift_card = gift_card
        .filter(|g| g.is_usable(now))
        .map(|g| AppliedCode {
            code: g.code.clone(),
            amount: g.balance.clamp_to(Cents::ZERO, remaining),
        })
        .filter(|applied| !applied.amount.is_zero());

    AppliedDiscounts {
        promotion,
        gift_card,
    }
}
