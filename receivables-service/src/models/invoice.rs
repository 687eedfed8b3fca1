//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use receivables_core::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Supported invoice currencies. Rejected at the boundary rather than
/// defaulted; the core never formats amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ghs,
    Usd,
    Eur,
    Gbp,
    Ngn,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ghs => "GHS",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Ngn => "NGN",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, AppError> {
        match s {
            "GHS" => Ok(Currency::Ghs),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "NGN" => Ok(Currency::Ngn),
            other => Err(AppError::validation(format!(
                "unsupported currency '{}'",
                other
            ))),
        }
    }
}

/// Invoice row. All monetary columns are integer minor units; the derived
/// columns (subtotal through balance_due, and status) are recomputed from
/// line items and allocations on every mutation, never edited directly.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    /// Assigned when the invoice is sent; unique per tenant.
    pub invoice_number: Option<String>,
    pub status: String,
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub total: i64,
    pub amount_paid: i64,
    pub balance_due: i64,
    pub notes: Option<String>,
    /// Optimistic-concurrency token, incremented on every mutation.
    pub version: i64,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<crate::domain::InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub tenant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub currency: Currency,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Input for updating a draft invoice's metadata.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoice {
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub expected_version: Option<i64>,
}
