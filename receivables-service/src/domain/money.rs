//! Minor-unit money arithmetic.
//!
//! All monetary values are `i64` minor units (pesewas, cents). Fractional
//! quantities and rates are `rust_decimal::Decimal`; the only place a
//! decimal becomes money is [`round_minor`], which applies the single
//! rounding rule for the whole service: half-to-even, at the line-item
//! level, in minor units.

use receivables_core::error::AppError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round a decimal amount to whole minor units, half-to-even.
pub fn round_minor(amount: Decimal) -> Result<i64, AppError> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .ok_or_else(|| AppError::validation(format!("amount {} overflows minor units", amount)))
}

/// Sum minor-unit amounts with overflow checking.
pub fn checked_sum<I: IntoIterator<Item = i64>>(amounts: I) -> Result<i64, AppError> {
    let mut total: i64 = 0;
    for amount in amounts {
        total = total
            .checked_add(amount)
            .ok_or_else(|| AppError::validation("monetary total overflow"))?;
    }
    Ok(total)
}
