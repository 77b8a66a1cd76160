//! Promotion and gift card lookups.

use backline_core::discount::{GiftCard, Promotion, PromotionKind};
use backline_core::types::Cents;
use backline_core::{GiftCardId, GiftCardStatus, PromotionId};
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::PgStore;
use crate::db::{DiscountStore, RepositoryError};

#[derive(Debug, sqlx::FromRow)]
struct PromotionRow {
    id: PromotionId,
    code: String,
    kind: PromotionKind,
    value: i64,
    active: bool,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    min_subtotal_cents: Option<Cents>,
}

impl From<PromotionRow> for Promotion {
    fn from(row: PromotionRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            kind: row.kind,
            value: row.value,
            active: row.active,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            min_subtotal: row.min_subtotal_cents,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GiftCardRow {
    id: GiftCardId,
    code: String,
    balance_cents: Cents,
    original_amount_cents: Cents,
    status: GiftCardStatus,
    expires_at: Option<DateTime<Utc>>,
}

impl From<GiftCardRow> for GiftCard {
    fn from(row: GiftCardRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            balance: row.balance_cents,
            original_amount: row.original_amount_cents,
            status: row.status,
            expires_at: row.expires_at,
        }
    }
}

impl DiscountStore for PgStore {
    #[instrument(skip(self))]
    async fn promotion_by_code(&self, code: &str) -> Result<Option<Promotion>, RepositoryError> {
        let row: Option<PromotionRow> = sqlx::query_as(
            r"
            SELECT id, code, kind, value, active, starts_at, ends_at, min_subtotal_cents
            FROM storefront.promotions
            WHERE code = $1
            ",
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(Promotion::from))
    }

    #[instrument(skip(self, code))]
    async fn gift_card_by_code(&self, code: &str) -> Result<Option<GiftCard>, RepositoryError> {
        let row: Option<GiftCardRow> = sqlx::query_as(
            r"
            SELECT id, code, balance_cents, original_amount_cents, status, expires_at
            FROM storefront.gift_cards
            WHERE code = $1
            ",
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(GiftCard::from))
    }
}
