//! Receipt snapshot lookup. Read-only by design.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::{
    dtos::{ListReceiptsQuery, ListReceiptsResponse},
    middleware::TenantContext,
    models::{ListReceiptsFilter, ReceiptSnapshot},
    AppState,
};
use receivables_core::error::AppError;

/// Get a receipt snapshot by ID.
pub async fn get_receipt(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(receipt_id): Path<Uuid>,
) -> Result<Json<ReceiptSnapshot>, AppError> {
    let receipt = state
        .db
        .get_receipt(tenant.tenant_id, receipt_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receipt not found")))?;

    Ok(Json(receipt))
}

/// List receipt snapshots with cursor pagination.
pub async fn list_receipts(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListReceiptsQuery>,
) -> Result<Json<ListReceiptsResponse>, AppError> {
    let filter = ListReceiptsFilter {
        payment_id: query.payment_id,
        invoice_id: query.invoice_id,
        page_size: query.page_size,
        page_token: query.page_token,
    };

    let receipts = state.db.list_receipts(tenant.tenant_id, &filter).await?;

    let next_page_token = if receipts.len() as i64 >= filter.page_size.clamp(1, 100) as i64 {
        receipts.last().map(|r| r.receipt_id)
    } else {
        None
    };

    Ok(Json(ListReceiptsResponse {
        receipts,
        next_page_token,
    }))
}
