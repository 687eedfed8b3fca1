//! Payment handlers: recording, lookup, and allocation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        AllocatePaymentRequest, AllocationResponse, CreatePaymentRequest, InvoiceResponse,
        ListAllocationsResponse, ListPaymentsQuery, ListPaymentsResponse, PaymentDetailResponse,
        UpdatePaymentNotesRequest,
    },
    middleware::TenantContext,
    models::{AllocatePayment, ListPaymentsFilter, PaymentMethod},
    AppState,
};
use receivables_core::error::AppError;

/// Record a payment.
pub async fn create_payment(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<crate::models::Payment>), AppError> {
    payload.validate()?;

    let payment = state
        .db
        .create_payment(&payload.into_create(tenant.tenant_id))
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

/// Get a payment with its allocations and unallocated remainder.
pub async fn get_payment(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentDetailResponse>, AppError> {
    let payment = state
        .db
        .get_payment(tenant.tenant_id, payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    let allocations = state
        .db
        .list_payment_allocations(tenant.tenant_id, payment_id)
        .await?;

    let allocated: i64 = allocations.iter().map(|a| a.amount).sum();
    let unallocated = payment.amount - allocated;

    Ok(Json(PaymentDetailResponse {
        payment,
        allocations,
        allocated,
        unallocated,
    }))
}

/// List payments with cursor pagination.
pub async fn list_payments(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<ListPaymentsResponse>, AppError> {
    let method = query
        .method
        .as_deref()
        .map(PaymentMethod::from_string)
        .transpose()?;

    let filter = ListPaymentsFilter {
        method,
        start_date: query.start_date,
        end_date: query.end_date,
        page_size: query.page_size,
        page_token: query.page_token,
    };

    let payments = state.db.list_payments(tenant.tenant_id, &filter).await?;

    let next_page_token = if payments.len() as i64 >= filter.page_size.clamp(1, 100) as i64 {
        payments.last().map(|p| p.payment_id)
    } else {
        None
    };

    Ok(Json(ListPaymentsResponse {
        payments,
        next_page_token,
    }))
}

/// Update a payment's notes.
pub async fn update_payment_notes(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentNotesRequest>,
) -> Result<Json<crate::models::Payment>, AppError> {
    let payment = state
        .db
        .update_payment_notes(tenant.tenant_id, payment_id, payload.notes.as_deref())
        .await?;

    Ok(Json(payment))
}

/// Allocate (part of) a payment against an invoice. An idempotency-key
/// replay returns the original allocation with 200 instead of 201.
pub async fn allocate_payment(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<AllocatePaymentRequest>,
) -> Result<(StatusCode, Json<AllocationResponse>), AppError> {
    payload.validate()?;

    let input = AllocatePayment {
        tenant_id: tenant.tenant_id,
        payment_id,
        invoice_id: payload.invoice_id,
        amount: payload.amount,
        idempotency_key: payload.idempotency_key,
    };

    let outcome = state.db.allocate_payment(&input).await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(AllocationResponse {
            allocation: outcome.allocation,
            invoice: InvoiceResponse::from_invoice(outcome.invoice)?,
            receipt_id: outcome.receipt.map(|r| r.receipt_id),
            replayed: outcome.replayed,
        }),
    ))
}

/// List allocations made from a payment.
pub async fn list_payment_allocations(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ListAllocationsResponse>, AppError> {
    state
        .db
        .get_payment(tenant.tenant_id, payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    let allocations = state
        .db
        .list_payment_allocations(tenant.tenant_id, payment_id)
        .await?;

    Ok(Json(ListAllocationsResponse { allocations }))
}
