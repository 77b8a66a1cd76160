//! Price a cart from the command line.
//!
//! Items are written `<product_id>[:<variant>]x<qty>`, so `7:1x2` is two of
//! variant 1 of product 7. Shipping and VAT use the same environment
//! settings as the storefront (`SHIPPING_*`, `VAT_FALLBACK_BPS`,
//! `STORE_CURRENCY`).

use backline_core::catalog::{CartItem, VariantIndex};
use backline_core::types::Cents;
use backline_core::{CurrencyCode, ProductId};
use backline_storefront::config::{ConfigError, PricingConfig, StorefrontConfig, get_database_url};
use backline_storefront::services::{CheckoutRequest, CheckoutService, Quote};

use super::{CommandError, connect};

/// Parse one `--item` argument.
fn parse_item(raw: &str) -> Result<CartItem, CommandError> {
    let invalid = || {
        CommandError::InvalidArgument(format!(
            "item `{raw}` must look like <product_id>[:<variant>]x<qty>"
        ))
    };

    let (target, quantity) = raw.trim().rsplit_once(['x', 'X']).ok_or_else(invalid)?;
    let quantity: u32 = quantity.parse().map_err(|_| invalid())?;

    let (product, variant) = match target.split_once(':') {
        Some((product, variant)) => (product, Some(variant)),
        None => (target, None),
    };
    let product_id: i32 = product.parse().map_err(|_| invalid())?;
    let variant_index = variant
        .map(|v| v.parse::<u16>().map(VariantIndex::new))
        .transpose()
        .map_err(|_| invalid())?;

    Ok(CartItem {
        product_id: ProductId::new(product_id),
        quantity,
        variant_index,
    })
}

fn amount_line(label: &str, amount: Cents, currency: CurrencyCode) -> String {
    format!("{label:<24}{:>12}", amount.display(currency))
}

fn render(quote: &Quote) -> Vec<String> {
    let currency = quote.currency;
    let mut out: Vec<String> = quote
        .lines
        .iter()
        .map(|line| {
            let name = line.variant_label.as_ref().map_or_else(
                || line.title.clone(),
                |label| format!("{} ({label})", line.title),
            );
            format!(
                "{} x {name} @ {}",
                line.quantity,
                line.unit_price.display(currency)
            )
        })
        .collect();

    out.push(String::new());
    out.push(amount_line("Items", quote.totals.raw_subtotal, currency));
    if let Some(promotion) = &quote.discounts.promotion {
        out.push(amount_line(
            &format!("Promotion {}", promotion.code),
            promotion.amount,
            currency,
        ));
    }
    if let Some(gift_card) = &quote.discounts.gift_card {
        out.push(amount_line(
            &format!("Gift card {}", gift_card.code),
            gift_card.amount,
            currency,
        ));
    }
    out.push(amount_line("Subtotal", quote.totals.subtotal, currency));
    out.push(amount_line(
        &format!("Shipping to {}", quote.country),
        quote.totals.shipping,
        currency,
    ));
    out.push(amount_line("VAT", quote.totals.tax, currency));
    out.push(amount_line("Total", quote.totals.total, currency));
    out
}

/// Price the cart and print the breakdown.
///
/// # Errors
///
/// Returns an error for malformed items, unknown products, or database failures.
pub async fn print(
    country: &str,
    items: &[String],
    promotion_code: Option<String>,
    gift_card_code: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let items = items
        .iter()
        .map(|raw| parse_item(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let store = connect().await?;

    let mut config = StorefrontConfig::new(
        get_database_url("STOREFRONT_DATABASE_URL")?,
        "http://localhost",
    );
    config.pricing = PricingConfig::from_env()?;
    if let Ok(currency) = std::env::var("STORE_CURRENCY") {
        config.currency = currency.parse::<CurrencyCode>().map_err(|e| {
            ConfigError::InvalidEnvVar("STORE_CURRENCY".to_string(), e.to_string())
        })?;
    }

    let request = CheckoutRequest {
        items,
        country: country.to_string(),
        promotion_code,
        gift_card_code,
        email: None,
    };
    let quote = CheckoutService::new(&store, &config).quote(&request).await?;

    #[allow(clippy::print_stdout)]
    {
        for line in render(&quote) {
            println!("{line}");
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item_without_variant() {
        let item = parse_item("12x3").unwrap();
        assert_eq!(item.product_id, ProductId::new(12));
        assert_eq!(item.quantity, 3);
        assert_eq!(item.variant_index, None);
    }

    #[test]
    fn test_parse_item_with_variant() {
        let item = parse_item("7:1x2").unwrap();
        assert_eq!(item.product_id, ProductId::new(7));
        assert_eq!(item.quantity, 2);
        assert_eq!(item.variant_index, Some(VariantIndex::new(1)));
    }

    #[test]
    fn test_parse_item_rejects_garbage() {
        for raw in ["", "12", "x2", "12x", "a:1x2", "7:bx2", "7:1x-1"] {
            assert!(parse_item(raw).is_err(), "{raw} should be rejected");
        }
    }
}
