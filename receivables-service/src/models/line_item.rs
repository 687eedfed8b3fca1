//! Line item model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{DiscountType, LineInput};
use receivables_core::error::AppError;

/// Line item row. The derived amount columns mirror `domain::LineAmounts`
/// at the time the invoice was last recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    /// Minor units.
    pub unit_price: i64,
    pub discount: Decimal,
    pub discount_type: String,
    /// Percentage, 0..=100.
    pub tax_rate: Decimal,
    pub amount: i64,
    pub discount_amount: i64,
    pub tax_amount: i64,
    pub total: i64,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a line item.
#[derive(Debug, Clone)]
pub struct CreateLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: i64,
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub tax_rate: Decimal,
}

impl CreateLineItem {
    /// Validate into the pure pricing input.
    pub fn to_line_input(&self) -> Result<LineInput, AppError> {
        LineInput::new(
            self.description.clone(),
            self.quantity,
            self.unit_price,
            self.discount,
            self.discount_type,
            self.tax_rate,
        )
    }
}
