//! Pricing engine.
//!
//! [`PricingPolicy::quote`] is a pure function of its inputs: the same lines,
//! country and discount always produce the same [`Totals`]. Nothing here
//! reads the clock, the database or the environment; the policy tables are
//! built once from configuration and passed in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::ResolvedLine;
use crate::types::{Cents, CountryCode};

/// Default VAT rate for countries missing from the table: 19 %.
pub const DEFAULT_VAT_FALLBACK_BPS: u32 = 1_900;

/// Default flat shipping fee inside the shipping zone.
pub const DEFAULT_ZONE_FEE: Cents = Cents::new(500);

/// Default subtotal at or above which zone shipping is free.
pub const DEFAULT_FREE_SHIPPING_THRESHOLD: Cents = Cents::new(5_000);

/// Default flat shipping fee outside the zone.
pub const DEFAULT_INTERNATIONAL_FEE: Cents = Cents::new(1_500);

/// EU member states plus GB, NO and CH.
const SHIPPING_ZONE: [&str; 30] = [
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT", "LV",
    "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE", "GB", "NO", "CH",
];

/// Standard VAT rates in basis points.
const STANDARD_VAT_RATES: [(&str, u32); 30] = [
    ("AT", 2_000),
    ("BE", 2_100),
    ("BG", 2_000),
    ("HR", 2_500),
    ("CY", 1_900),
    ("CZ", 2_100),
    ("DK", 2_500),
    ("EE", 2_400),
    ("FI", 2_550),
    ("FR", 2_000),
    ("DE", 1_900),
    ("GR", 2_400),
    ("HU", 2_700),
    ("IE", 2_300),
    ("IT", 2_200),
    ("LV", 2_100),
    ("LT", 2_100),
    ("LU", 1_700),
    ("MT", 1_800),
    ("NL", 2_100),
    ("PL", 2_300),
    ("PT", 2_300),
    ("RO", 2_100),
    ("SK", 2_300),
    ("SI", 2_200),
    ("ES", 2_100),
    ("SE", 2_500),
    ("GB", 2_000),
    ("NO", 2_500),
    ("CH", 810),
];

/// Anything that has a unit price and a quantity.
pub trait PricedLine {
    fn unit_price(&self) -> Cents;
    fn quantity(&self) -> u32;

    /// `unit_price × quantity`.
    fn line_total(&self) -> Cents {
        self.unit_price().times(self.quantity())
    }
}

impl PricedLine for ResolvedLine {
    fn unit_price(&self) -> Cents {
        self.unit_price
    }

    fn quantity(&self) -> u32 {
        self.quantity
    }
}

impl<T: PricedLine> PricedLine for &T {
    fn unit_price(&self) -> Cents {
        (*self).unit_price()
    }

    fn quantity(&self) -> u32 {
        (*self).quantity()
    }
}

/// VAT rates by destination country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatTable {
    rates: BTreeMap<String, u32>,
    fallback_bps: u32,
}

impl VatTable {
    /// Build a table from explicit rates.
    #[must_use]
    pub fn new(rates: impl IntoIterator<Item = (CountryCode, u32)>, fallback_bps: u32) -> Self {
        Self {
            rates: rates
                .into_iter()
                .map(|(country, bps)| (country.as_str().to_owned(), bps))
                .collect(),
            fallback_bps,
        }
    }

    /// Standard European rates with a custom fallback.
    #[must_use]
    pub fn standard(fallback_bps: u32) -> Self {
        Self {
            rates: STANDARD_VAT_RATES
                .iter()
                .map(|(code, bps)| ((*code).to_owned(), *bps))
                .collect(),
            fallback_bps,
        }
    }

    /// Rate for `country` in basis points, or the fallback.
    #[must_use]
    pub fn rate_bps(&self, country: &CountryCode) -> u32 {
        self.rates
            .get(country.as_str())
            .copied()
            .unwrap_or(self.fallback_bps)
    }
}

impl Default for VatTable {
    fn default() -> Self {
        Self::standard(DEFAULT_VAT_FALLBACK_BPS)
    }
}

/// Shipping fee schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPolicy {
    pub zone_fee: Cents,
    pub free_threshold: Cents,
    pub international_fee: Cents,
    /// Per-country flat fees replacing the zone schedule for that country.
    pub overrides: BTreeMap<String, Cents>,
}

impl ShippingPolicy {
    /// Policy with the given fee schedule and no overrides.
    #[must_use]
    pub const fn new(zone_fee: Cents, free_threshold: Cents, international_fee: Cents) -> Self {
        Self {
            zone_fee,
            free_threshold,
            international_fee,
            overrides: BTreeMap::new(),
        }
    }

    /// Replace the fee for one country.
    #[must_use]
    pub fn with_override(mut self, country: &CountryCode, fee: Cents) -> Self {
        self.overrides.insert(country.as_str().to_owned(), fee);
        self
    }

    /// Whether `country` belongs to the reduced-fee zone.
    #[must_use]
    pub fn in_zone(country: &CountryCode) -> bool {
        SHIPPING_ZONE.contains(&country.as_str())
    }

    /// Shipping fee for a discounted `subtotal` sent to `country`.
    #[must_use]
    pub fn fee(&self, country: &CountryCode, subtotal: Cents) -> Cents {
        if let Some(fee) = self.overrides.get(country.as_str()) {
            return *fee;
        }
        if Self::in_zone(country) {
            if subtotal >= self.free_threshold {
                Cents::ZERO
            } else {
                self.zone_fee
            }
        } else {
            self.international_fee
        }
    }
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_ZONE_FEE,
            DEFAULT_FREE_SHIPPING_THRESHOLD,
            DEFAULT_INTERNATIONAL_FEE,
        )
    }
}

/// Priced totals for a cart.
///
/// `total == subtotal + shipping + tax` and `subtotal == raw_subtotal - discount`
/// always hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub raw_subtotal: Cents,
    /// Discount actually applied, after clamping.
    pub discount: Cents,
    pub subtotal: Cents,
    pub shipping: Cents,
    pub tax: Cents,
    pub total: Cents,
}

/// VAT and shipping tables used to price carts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub vat: VatTable,
    pub shipping: ShippingPolicy,
}

impl PricingPolicy {
    #[must_use]
    pub const fn new(vat: VatTable, shipping: ShippingPolicy) -> Self {
        Self { vat, shipping }
    }

    /// Price `lines` for delivery to `country` with a combined `discount`.
    ///
    /// The discount is clamped to `[0, raw_subtotal]`, so the subtotal never
    /// goes negative. An empty cart prices to all zeros, shipping included.
    #[must_use]
    pub fn quote<L: PricedLine>(&self, lines: &[L], country: &CountryCode, discount: Cents) -> Totals {
        if lines.is_empty() {
            return Totals::default();
        }

        let raw_subtotal: Cents = lines.iter().map(PricedLine::line_total).sum();
        let discount = discount.clamp_to(Cents::ZERO, raw_subtotal);
        let subtotal = raw_subtotal.saturating_sub(discount);
        let shipping = self.shipping.fee(country, subtotal);
        let tax = subtotal.basis_points(self.vat.rate_bps(country));

        Totals {
            raw_subtotal,
            discount,
            subtotal,
            shipping,
            tax,
            total: subtotal + shipping + tax,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone)]
    struct Line(i64, u32);

    impl PricedLine for Line {
        fn unit_price(&self) -> Cents {
            Cents::new(self.0)
        }

        fn quantity(&self) -> u32 {
            self.1
        }
    }

    fn country(code: &str) -> CountryCode {
        CountryCode::parse(code).unwrap()
    }

    #[test]
    fn test_simple_order_to_germany() {
        let totals =
            PricingPolicy::default().quote(&[Line(1500, 2)], &country("DE"), Cents::ZERO);
        assert_eq!(totals.subtotal, Cents::new(3000));
        assert_eq!(totals.shipping, Cents::new(500));
        assert_eq!(totals.tax, Cents::new(570));
        assert_eq!(totals.total, Cents::new(4070));
    }

    #[test]
    fn test_gift_card_exceeding_subtotal() {
        let totals =
            PricingPolicy::default().quote(&[Line(1000, 1)], &country("DE"), Cents::new(5000));
        assert_eq!(totals.discount, Cents::new(1000));
        assert_eq!(totals.subtotal, Cents::ZERO);
        assert_eq!(totals.tax, Cents::ZERO);
        assert_eq!(totals.total, totals.shipping);
    }

    #[test]
    fn test_free_shipping_threshold_uses_discounted_subtotal() {
        let policy = PricingPolicy::default();
        let lines = [Line(5000, 1)];
        assert_eq!(
            policy.quote(&lines, &country("FR"), Cents::ZERO).shipping,
            Cents::ZERO
        );
        assert_eq!(
            policy.quote(&lines, &country("FR"), Cents::new(1)).shipping,
            Cents::new(500)
        );
    }

    #[test]
    fn test_international_fee_and_fallback_vat() {
        let totals =
            PricingPolicy::default().quote(&[Line(10_000, 1)], &country("US"), Cents::ZERO);
        assert_eq!(totals.shipping, Cents::new(1500));
        assert_eq!(totals.tax, Cents::new(1900));
    }

    #[test]
    fn test_uk_is_gb() {
        let policy = PricingPolicy::default();
        assert_eq!(
            policy.quote(&[Line(1000, 1)], &country("uk"), Cents::ZERO),
            policy.quote(&[Line(1000, 1)], &country("GB"), Cents::ZERO)
        );
    }

    #[test]
    fn test_shipping_override() {
        let policy = PricingPolicy::new(
            VatTable::default(),
            ShippingPolicy::default().with_override(&country("CH"), Cents::new(1200)),
        );
        let totals = policy.quote(&[Line(9000, 1)], &country("CH"), Cents::ZERO);
        assert_eq!(totals.shipping, Cents::new(1200));
        // 9000 * 8.1% = 729
        assert_eq!(totals.tax, Cents::new(729));
    }

    #[test]
    fn test_empty_cart_is_all_zero() {
        let lines: [Line; 0] = [];
        assert_eq!(
            PricingPolicy::default().quote(&lines, &country("US"), Cents::new(300)),
            Totals::default()
        );
    }

    #[test]
    fn test_negative_discount_is_ignored() {
        let totals =
            PricingPolicy::default().quote(&[Line(1000, 1)], &country("DE"), Cents::new(-500));
        assert_eq!(totals.discount, Cents::ZERO);
        assert_eq!(totals.subtotal, Cents::new(1000));
    }

    fn arb_lines() -> impl Strategy<Value = Vec<Line>> {
        prop::collection::vec((0i64..100_000, 1u32..=99).prop_map(|(p, q)| Line(p, q)), 0..8)
    }

    fn arb_country() -> impl Strategy<Value = CountryCode> {
        prop::sample::select(vec!["DE", "FI", "CH", "GB", "US", "JP", "NO", "BR"])
            .prop_map(|c| CountryCode::parse(c).unwrap())
    }

    proptest! {
        #[test]
        fn prop_quote_is_deterministic(
            lines in arb_lines(),
            country in arb_country(),
            discount in 0i64..1_000_000,
        ) {
            let policy = PricingPolicy::default();
            let first = policy.quote(&lines, &country, Cents::new(discount));
            let second = policy.quote(&lines, &country, Cents::new(discount));
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_subtotal_never_negative(
            lines in arb_lines(),
            country in arb_country(),
            discount in 0i64..10_000_000,
        ) {
            let totals = PricingPolicy::default().quote(&lines, &country, Cents::new(discount));
            prop_assert!(totals.subtotal >= Cents::ZERO);
            prop_assert!(totals.discount <= totals.raw_subtotal);
        }

        #[test]
        fn prop_total_is_sum_of_parts(
            lines in arb_lines(),
            country in arb_country(),
            discount in 0i64..1_000_000,
        ) {
            let totals = PricingPolicy::default().quote(&lines, &country, Cents::new(discount));
            prop_assert_eq!(totals.total, totals.subtotal + totals.tax + totals.shipping);
            prop_assert_eq!(totals.subtotal, totals.raw_subtotal.saturating_sub(totals.discount));
        }
    }
}
