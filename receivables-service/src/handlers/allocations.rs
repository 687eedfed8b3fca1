//! Allocation reversal.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{dtos::InvoiceResponse, middleware::TenantContext, AppState};
use receivables_core::error::AppError;

/// Reverse an allocation and return the restored invoice. The receipt
/// snapshot written at allocation time is kept.
pub async fn deallocate_payment(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(allocation_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .db
        .deallocate_payment(tenant.tenant_id, allocation_id)
        .await?;

    Ok(Json(InvoiceResponse::from_invoice(invoice)?))
}
