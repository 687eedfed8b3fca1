//! Receipt snapshot model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Immutable point-in-time copy of invoice + payment + customer state,
/// written when a receipt is issued. Later edits to the source records must
/// not change it, so it is never updated or deleted; it survives even the
/// reversal of the allocation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReceiptSnapshot {
    pub receipt_id: Uuid,
    pub tenant_id: Uuid,
    /// Unique per tenant, assigned from the receipt counter.
    pub receipt_number: String,
    pub payment_id: Uuid,
    pub invoice_id: Option<Uuid>,
    /// One snapshot per allocation; the exactly-once key for the hook.
    pub allocation_id: Option<Uuid>,
    pub snapshot_data: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

/// Filter parameters for listing receipt snapshots.
#[derive(Debug, Clone, Default)]
pub struct ListReceiptsFilter {
    pub payment_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
