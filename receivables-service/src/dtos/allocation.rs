//! Allocation DTOs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::PaymentAllocation;

use super::invoice::InvoiceResponse;

#[derive(Debug, Deserialize, Validate)]
pub struct AllocatePaymentRequest {
    pub invoice_id: Uuid,
    /// Minor units, must be positive.
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    pub allocation: PaymentAllocation,
    /// Invoice state after (or, on replay, as of) the allocation.
    pub invoice: InvoiceResponse,
    pub receipt_id: Option<Uuid>,
    /// True when an idempotency key matched an earlier allocation.
    pub replayed: bool,
}

#[derive(Debug, Serialize)]
pub struct ListAllocationsResponse {
    pub allocations: Vec<PaymentAllocation>,
}
