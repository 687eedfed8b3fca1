//! Payment allocation model: the many-to-many claim of payment amounts
//! against invoice balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Allocation row. Invariants (enforced transactionally, never assumed):
/// per payment, `SUM(amount) <= payment.amount`; per invoice,
/// `SUM(amount) <= invoice.total`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAllocation {
    pub allocation_id: Uuid,
    pub tenant_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    /// Minor units, > 0.
    pub amount: i64,
    pub idempotency_key: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for allocating (part of) a payment to an invoice.
#[derive(Debug, Clone)]
pub struct AllocatePayment {
    pub tenant_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: i64,
    /// Webhook retry safety: replays with the same key return the original
    /// allocation instead of double-allocating.
    pub idempotency_key: Option<String>,
}
