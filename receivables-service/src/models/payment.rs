//! Payment model.

use chrono::{DateTime, NaiveDate, Utc};
use receivables_core::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How the funds arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    Card,
    BankTransfer,
    Cash,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, AppError> {
        match s {
            "mobile_money" => Ok(PaymentMethod::MobileMoney),
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "cash" => Ok(PaymentMethod::Cash),
            "other" => Ok(PaymentMethod::Other),
            other => Err(AppError::validation(format!(
                "unknown payment method '{}'",
                other
            ))),
        }
    }
}

/// Payment row. Immutable once allocated, except `notes`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    /// Minor units, > 0.
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub payment_date: NaiveDate,
    pub payer_name: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default)]
pub struct ListPaymentsFilter {
    pub method: Option<PaymentMethod>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Input for recording a payment (processor webhook, manual entry, or an
/// external payment recorded after the fact).
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub tenant_id: Uuid,
    pub amount: i64,
    pub currency: crate::models::Currency,
    pub payment_method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub payer_name: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}
