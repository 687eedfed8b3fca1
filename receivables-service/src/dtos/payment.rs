//! Payment DTOs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{CreatePayment, Currency, Payment, PaymentAllocation, PaymentMethod};

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    /// Minor units, must be positive.
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub payment_date: NaiveDate,
    #[validate(length(max = 255))]
    pub payer_name: Option<String>,
    #[validate(length(max = 255))]
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl CreatePaymentRequest {
    pub fn into_create(self, tenant_id: Uuid) -> CreatePayment {
        CreatePayment {
            tenant_id,
            amount: self.amount,
            currency: self.currency,
            payment_method: self.payment_method,
            payment_date: self.payment_date,
            payer_name: self.payer_name,
            reference: self.reference,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentNotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    pub method: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "super::invoice::default_page_size")]
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Payment with its allocations and remaining unallocated amount.
#[derive(Debug, Serialize)]
pub struct PaymentDetailResponse {
    #[serde(flatten)]
    pub payment: Payment,
    pub allocations: Vec<PaymentAllocation>,
    pub allocated: i64,
    pub unallocated: i64,
}

#[derive(Debug, Serialize)]
pub struct ListPaymentsResponse {
    pub payments: Vec<Payment>,
    pub next_page_token: Option<Uuid>,
}
