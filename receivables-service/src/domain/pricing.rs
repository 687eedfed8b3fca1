//! Line-item aggregation: quantities, unit prices, discounts, and taxes
//! reduced to invoice totals in minor units.

use receivables_core::error::AppError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::{checked_sum, round_minor};

/// How a line discount is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percent,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percent => "percent",
            DiscountType::Fixed => "fixed",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, AppError> {
        match s {
            "percent" => Ok(DiscountType::Percent),
            "fixed" => Ok(DiscountType::Fixed),
            other => Err(AppError::validation(format!(
                "unknown discount type '{}'",
                other
            ))),
        }
    }
}

/// A validated line item awaiting pricing.
///
/// Construction rejects malformed input outright; nothing is silently
/// clamped to zero. The one clamp in the system is the fixed-discount cap
/// at the line base (a discount must never invert the sign of a line).
#[derive(Debug, Clone, PartialEq)]
pub struct LineInput {
    pub description: String,
    pub quantity: Decimal,
    /// Unit price in minor units.
    pub unit_price: i64,
    pub discount: Decimal,
    pub discount_type: DiscountType,
    /// Tax rate as a percentage, 0..=100.
    pub tax_rate: Decimal,
}

impl LineInput {
    pub fn new(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: i64,
        discount: Decimal,
        discount_type: DiscountType,
        tax_rate: Decimal,
    ) -> Result<Self, AppError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(AppError::validation("line item description must not be empty"));
        }
        if quantity <= Decimal::ZERO {
            return Err(AppError::validation("line item quantity must be positive"));
        }
        if unit_price < 0 {
            return Err(AppError::validation("line item unit price must not be negative"));
        }
        if discount < Decimal::ZERO {
            return Err(AppError::validation("line item discount must not be negative"));
        }
        if discount_type == DiscountType::Percent && discount > Decimal::ONE_HUNDRED {
            return Err(AppError::validation(
                "percent discount must not exceed 100",
            ));
        }
        if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
            return Err(AppError::validation("tax rate must be between 0 and 100"));
        }
        Ok(Self {
            description,
            quantity,
            unit_price,
            discount,
            discount_type,
            tax_rate,
        })
    }
}

/// Priced amounts for one line, all in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    /// quantity * unit_price, rounded.
    pub base: i64,
    pub discount: i64,
    pub tax: i64,
    /// base - discount + tax.
    pub total: i64,
}

/// Aggregated invoice totals, all in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub grand_total: i64,
}

/// Price a single line. Rounding happens at each step, half-to-even, so the
/// per-line identity `total == base - discount + tax` holds exactly.
pub fn price_line(line: &LineInput) -> Result<LineAmounts, AppError> {
    let base = round_minor(line.quantity * Decimal::from(line.unit_price))?;

    let raw_discount = match line.discount_type {
        DiscountType::Percent => {
            round_minor(Decimal::from(base) * line.discount / Decimal::ONE_HUNDRED)?
        }
        DiscountType::Fixed => round_minor(line.discount)?,
    };
    // Cap at the line base: a discount never inverts the sign of a line.
    let discount = raw_discount.clamp(0, base);

    let after_discount = base - discount;
    let tax = round_minor(Decimal::from(after_discount) * line.tax_rate / Decimal::ONE_HUNDRED)?;
    let total = after_discount
        .checked_add(tax)
        .ok_or_else(|| AppError::validation("line total overflow"))?;

    Ok(LineAmounts {
        base,
        discount,
        tax,
        total,
    })
}

/// Aggregate an ordered set of lines into invoice totals.
///
/// Because each line is rounded independently, `grand_total` is the sum of
/// line totals, not a re-derivation from the aggregate columns; the identity
/// `grand_total == subtotal - discount_total + tax_total` still holds
/// because it holds per line.
pub fn aggregate(lines: &[LineInput]) -> Result<InvoiceTotals, AppError> {
    let amounts = lines.iter().map(price_line).collect::<Result<Vec<_>, _>>()?;

    Ok(InvoiceTotals {
        subtotal: checked_sum(amounts.iter().map(|a| a.base))?,
        discount_total: checked_sum(amounts.iter().map(|a| a.discount))?,
        tax_total: checked_sum(amounts.iter().map(|a| a.tax))?,
        grand_total: checked_sum(amounts.iter().map(|a| a.total))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn line(
        quantity: &str,
        unit_price: i64,
        discount: &str,
        discount_type: DiscountType,
        tax_rate: &str,
    ) -> LineInput {
        LineInput::new(
            "test line",
            d(quantity),
            unit_price,
            d(discount),
            discount_type,
            d(tax_rate),
        )
        .unwrap()
    }

    #[test]
    fn prices_three_units_with_percent_discount_and_tax() {
        // 3 x 10.00 with 10% discount and 5% tax
        let amounts = price_line(&line("3", 1000, "10", DiscountType::Percent, "5")).unwrap();
        assert_eq!(amounts.base, 3000);
        assert_eq!(amounts.discount, 300);
        assert_eq!(amounts.tax, 135);
        assert_eq!(amounts.total, 2835);

        let totals = aggregate(&[line("3", 1000, "10", DiscountType::Percent, "5")]).unwrap();
        assert_eq!(totals.grand_total, 2835);
        assert_eq!(
            totals.grand_total,
            totals.subtotal - totals.discount_total + totals.tax_total
        );
    }

    #[test]
    fn fractional_quantity_rounds_half_to_even() {
        // 1.5 hours x 5.55 = 8.325 -> 832.5 minor units -> 832 (even)
        let amounts = price_line(&line("1.5", 555, "0", DiscountType::Fixed, "0")).unwrap();
        assert_eq!(amounts.base, 832);
    }

    #[test]
    fn fixed_discount_is_clamped_to_base() {
        let amounts = price_line(&line("1", 500, "900", DiscountType::Fixed, "0")).unwrap();
        assert_eq!(amounts.discount, 500);
        assert_eq!(amounts.total, 0);
    }

    #[test]
    fn zero_lines_aggregate_to_zero() {
        let totals = aggregate(&[]).unwrap();
        assert_eq!(totals, InvoiceTotals::default());
    }

    #[test]
    fn rejects_malformed_input_at_construction() {
        assert!(LineInput::new("", d("1"), 100, d("0"), DiscountType::Fixed, d("0")).is_err());
        assert!(LineInput::new("x", d("0"), 100, d("0"), DiscountType::Fixed, d("0")).is_err());
        assert!(LineInput::new("x", d("-1"), 100, d("0"), DiscountType::Fixed, d("0")).is_err());
        assert!(LineInput::new("x", d("1"), -1, d("0"), DiscountType::Fixed, d("0")).is_err());
        assert!(LineInput::new("x", d("1"), 100, d("-5"), DiscountType::Fixed, d("0")).is_err());
        assert!(LineInput::new("x", d("1"), 100, d("101"), DiscountType::Percent, d("0")).is_err());
        assert!(LineInput::new("x", d("1"), 100, d("0"), DiscountType::Fixed, d("101")).is_err());
        assert!(LineInput::new("x", d("1"), 100, d("0"), DiscountType::Fixed, d("-1")).is_err());
    }

    proptest! {
        /// The single most important rounding property: the aggregate
        /// identity holds exactly, post-rounding, for arbitrary line sets.
        #[test]
        fn grand_total_identity_holds(
            lines in proptest::collection::vec(
                (1u32..10_000, 0i64..1_000_000, 0u32..=100, any::<bool>(), 0u32..=100),
                0..12,
            )
        ) {
            let inputs: Vec<LineInput> = lines
                .into_iter()
                .map(|(qty_hundredths, unit_price, discount, percent, tax)| {
                    LineInput::new(
                        "prop line",
                        Decimal::new(qty_hundredths as i64, 2),
                        unit_price,
                        Decimal::from(discount),
                        if percent { DiscountType::Percent } else { DiscountType::Fixed },
                        Decimal::from(tax),
                    )
                    .unwrap()
                })
                .collect();

            let totals = aggregate(&inputs).unwrap();
            prop_assert_eq!(
                totals.grand_total,
                totals.subtotal - totals.discount_total + totals.tax_total
            );
            prop_assert!(totals.discount_total >= 0);
            prop_assert!(totals.discount_total <= totals.subtotal);
        }

        /// Per-line sign invariant: a discount never inverts a line.
        #[test]
        fn line_total_never_negative(
            qty_hundredths in 1u32..10_000,
            unit_price in 0i64..1_000_000,
            discount in 0i64..2_000_000,
            tax in 0u32..=100,
        ) {
            let input = LineInput::new(
                "prop line",
                Decimal::new(qty_hundredths as i64, 2),
                unit_price,
                Decimal::from(discount),
                DiscountType::Fixed,
                Decimal::from(tax),
            )
            .unwrap();
            let amounts = price_line(&input).unwrap();
            prop_assert!(amounts.total >= 0);
            prop_assert!(amounts.discount <= amounts.base);
        }
    }
}
