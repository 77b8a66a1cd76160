//! Order persistence and reconciliation writes.
//!
//! Every status change is a conditional `UPDATE ... WHERE status = ...`, so
//! two concurrent deliveries of the same gateway event cannot both apply it.

use backline_core::order::{
    NewOrder, Order, OrderLineItem, PaymentConfirmation, ShippingAddress, StockDecrement,
    decrement_floor, stock_decrements,
};
use backline_core::types::Cents;
use backline_core::{CountryCode, CurrencyCode, OrderId, OrderStatus, PaymentProvider};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument, warn};

use super::PgStore;
use crate::db::{ConfirmOutcome, OrderStore, RepositoryError, TransitionOutcome};

const ORDER_COLUMNS: &str = r"
    id, status, currency, country, line_items,
    raw_subtotal_cents, subtotal_cents, shipping_cents, tax_cents, total_cents,
    promotion_code, promotion_amount_cents, gift_card_code, gift_card_amount_cents,
    provider, checkout_session_id, payment_intent_id, customer_email,
    shipping_address, tracking_number, created_at, updated_at, paid_at
";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    status: OrderStatus,
    currency: String,
    country: String,
    line_items: Json<Vec<OrderLineItem>>,
    raw_subtotal_cents: Cents,
    subtotal_cents: Cents,
    shipping_cents: Cents,
    tax_cents: Cents,
    total_cents: Cents,
    promotion_code: Option<String>,
    promotion_amount_cents: Cents,
    gift_card_code: Option<String>,
    gift_card_amount_cents: Cents,
    provider: Option<PaymentProvider>,
    checkout_session_id: Option<String>,
    payment_intent_id: Option<String>,
    customer_email: Option<String>,
    shipping_address: Option<Json<ShippingAddress>>,
    tracking_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let currency = row.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("order {}: {e}", row.id))
        })?;
        let country = CountryCode::parse(&row.country).map_err(|e| {
            RepositoryError::DataCorruption(format!("order {}: {e}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            status: row.status,
            currency,
            country,
            line_items: row.line_items.0,
            raw_subtotal: row.raw_subtotal_cents,
            subtotal: row.subtotal_cents,
            shipping: row.shipping_cents,
            tax: row.tax_cents,
            total: row.total_cents,
            promotion_code: row.promotion_code,
            promotion_amount: row.promotion_amount_cents,
            gift_card_code: row.gift_card_code,
            gift_card_amount: row.gift_card_amount_cents,
            provider: row.provider,
            checkout_session_id: row.checkout_session_id,
            payment_intent_id: row.payment_intent_id,
            customer_email: row.customer_email,
            shipping_address: row.shipping_address.map(|Json(address)| address),
            tracking_number: row.tracking_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
        })
    }
}

fn into_order(row: Option<OrderRow>) -> Result<Option<Order>, RepositoryError> {
    row.map(Order::try_from).transpose()
}

impl PgStore {
    async fn current_status(&self, id: OrderId) -> Result<Option<OrderStatus>, RepositoryError> {
        let row: Option<(OrderStatus,)> =
            sqlx::query_as("SELECT status FROM storefront.orders WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(status,)| status))
    }

    /// Run a conditional status update and classify the result.
    async fn transition(
        &self,
        id: OrderId,
        query: sqlx::query::QueryAs<'_, Postgres, OrderRow, sqlx::postgres::PgArguments>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        if let Some(row) = query.fetch_optional(self.pool()).await? {
            return Ok(TransitionOutcome::Applied(Order::try_from(row)?));
        }
        Ok(match self.current_status(id).await? {
            Some(status) => TransitionOutcome::Rejected(status),
            None => TransitionOutcome::NotFound,
        })
    }
}

/// Take units off the variant's own counter, or the product's if the variant
/// has none. Clamped at zero; an oversell is logged, not rejected.
async fn decrement_stock(
    tx: &mut Transaction<'_, Postgres>,
    decrement: StockDecrement,
) -> Result<(), RepositoryError> {
    let quantity = i32::try_from(decrement.quantity).unwrap_or(i32::MAX);

    let mut previous: Option<(i32,)> = None;
    if let Some(index) = decrement.variant_index {
        previous = sqlx::query_as(
            r"
            UPDATE storefront.product_variants v
            SET stock = GREATEST(v.stock - $3, 0)
            FROM (
                SELECT stock FROM storefront.product_variants
                WHERE product_id = $1 AND position = $2 AND stock IS NOT NULL
                FOR UPDATE
            ) old
            WHERE v.product_id = $1 AND v.position = $2 AND v.stock IS NOT NULL
            RETURNING old.stock
            ",
        )
        .bind(decrement.product_id)
        .bind(index.as_i32())
        .bind(quantity)
        .fetch_optional(&mut **tx)
        .await?;
    }

    if previous.is_none() {
        previous = sqlx::query_as(
            r"
            UPDATE storefront.products p
            SET stock = GREATEST(p.stock - $2, 0), updated_at = NOW()
            FROM (
                SELECT stock FROM storefront.products WHERE id = $1 FOR UPDATE
            ) old
            WHERE p.id = $1
            RETURNING old.stock
            ",
        )
        .bind(decrement.product_id)
        .bind(quantity)
        .fetch_optional(&mut **tx)
        .await?;
    }

    match previous {
        Some((stock,)) => {
            let (remaining, oversold) = decrement_floor(stock, decrement.quantity);
            if oversold {
                warn!(
                    product_id = %decrement.product_id,
                    variant_index = ?decrement.variant_index,
                    requested = decrement.quantity,
                    available = stock,
                    "Stock oversold, clamped at zero"
                );
            } else {
                debug!(product_id = %decrement.product_id, remaining, "Stock decremented");
            }
        }
        None => warn!(
            product_id = %decrement.product_id,
            "Product for paid line item no longer exists, stock not decremented"
        ),
    }

    Ok(())
}

/// Debit the amount recorded on the order. The card is not re-validated.
async fn debit_gift_card(
    tx: &mut Transaction<'_, Postgres>,
    code: &str,
    amount: Cents,
) -> Result<(), RepositoryError> {
    let row: Option<(Cents, Cents)> = sqlx::query_as(
        r"
        UPDATE storefront.gift_cards g
        SET balance_cents = GREATEST(g.balance_cents - $2, 0),
            status = CASE
                WHEN g.balance_cents - $2 <= 0 THEN 'redeemed'::storefront.gift_card_status
                ELSE g.status
            END,
            updated_at = NOW()
        FROM (
            SELECT balance_cents FROM storefront.gift_cards WHERE code = $1 FOR UPDATE
        ) old
        WHERE g.code = $1
        RETURNING old.balance_cents, g.balance_cents
        ",
    )
    .bind(code)
    .bind(amount)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some((before, _)) if before < amount => warn!(
            gift_card = code,
            debit = %amount,
            balance = %before,
            "Gift card balance below recorded amount, clamped at zero"
        ),
        Some((_, after)) => debug!(gift_card = code, balance = %after, "Gift card debited"),
        None => warn!(gift_card = code, "Gift card on paid order no longer exists"),
    }

    Ok(())
}

impl OrderStore for PgStore {
    #[instrument(skip(self, order), fields(items = order.line_items.len(), total = %order.totals.total))]
    async fn create_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let promotion = order.discounts.promotion.as_ref();
        let gift_card = order.discounts.gift_card.as_ref();

        let row: OrderRow = sqlx::query_as(&format!(
            r"
            INSERT INTO storefront.orders (
                status, currency, country, line_items,
                raw_subtotal_cents, subtotal_cents, shipping_cents, tax_cents, total_cents,
                promotion_code, promotion_amount_cents, gift_card_code, gift_card_amount_cents,
                provider, customer_email
            )
            VALUES ('pending', $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(order.currency.code())
        .bind(order.country.as_str())
        .bind(Json(&order.line_items))
        .bind(order.totals.raw_subtotal)
        .bind(order.totals.subtotal)
        .bind(order.totals.shipping)
        .bind(order.totals.tax)
        .bind(order.totals.total)
        .bind(promotion.map(|p| p.code.as_str()))
        .bind(promotion.map_or(Cents::ZERO, |p| p.amount))
        .bind(gift_card.map(|g| g.code.as_str()))
        .bind(order.discounts.gift_card_amount())
        .bind(order.provider)
        .bind(order.customer_email.as_deref())
        .fetch_one(self.pool())
        .await
        .map_err(|e| RepositoryError::from_insert(e, "order"))?;

        let order = Order::try_from(row)?;
        debug!(order_id = %order.id, "Created draft order");
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        into_order(row)
    }

    #[instrument(skip(self))]
    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE payment_intent_id = $1"
        ))
        .bind(payment_intent_id)
        .fetch_optional(self.pool())
        .await?;

        into_order(row)
    }

    #[instrument(skip(self))]
    async fn set_checkout_session(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        session_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.orders
            SET provider = $2, checkout_session_id = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(id)
        .bind(provider)
        .bind(session_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, confirmation), fields(order_id = %confirmation.order_id))]
    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmOutcome, RepositoryError> {
        let mut tx = self.pool().begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r"
            UPDATE storefront.orders
            SET status = 'paid',
                payment_intent_id = COALESCE($2, payment_intent_id),
                customer_email = COALESCE($3, customer_email),
                shipping_address = COALESCE($4, shipping_address),
                paid_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(confirmation.order_id)
        .bind(confirmation.payment_intent_id.as_deref())
        .bind(confirmation.customer_email.as_deref())
        .bind(confirmation.shipping_address.as_ref().map(Json))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(match self.current_status(confirmation.order_id).await? {
                Some(status) => ConfirmOutcome::NotPending(status),
                None => ConfirmOutcome::NotFound,
            });
        };
        let order = Order::try_from(row)?;

        for decrement in stock_decrements(&order.line_items) {
            decrement_stock(&mut tx, decrement).await?;
        }

        if let Some(code) = order.gift_card_code.as_deref()
            && order.gift_card_amount > Cents::ZERO
        {
            debit_gift_card(&mut tx, code, order.gift_card_amount).await?;
        }

        tx.commit().await?;
        Ok(ConfirmOutcome::Confirmed(order))
    }

    #[instrument(skip(self))]
    async fn mark_refunded(&self, id: OrderId) -> Result<TransitionOutcome, RepositoryError> {
        let sql = format!(
            r"
            UPDATE storefront.orders
            SET status = 'refunded', updated_at = NOW()
            WHERE id = $1 AND status = 'paid'
            RETURNING {ORDER_COLUMNS}
            "
        );
        self.transition(id, sqlx::query_as(&sql).bind(id)).await
    }

    #[instrument(skip(self))]
    async fn mark_fulfilled(
        &self,
        id: OrderId,
        tracking_number: &str,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let sql = format!(
            r"
            UPDATE storefront.orders
            SET status = 'fulfilled', tracking_number = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'paid'
            RETURNING {ORDER_COLUMNS}
            "
        );
        self.transition(id, sqlx::query_as(&sql).bind(id).bind(tracking_number))
            .await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, id: OrderId) -> Result<TransitionOutcome, RepositoryError> {
        let sql = format!(
            r"
            UPDATE storefront.orders
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'paid')
            RETURNING {ORDER_COLUMNS}
            "
        );
        self.transition(id, sqlx::query_as(&sql).bind(id)).await
    }
}
