//! Invoice handlers: CRUD, line items, and lifecycle transitions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::InvoiceStatus,
    dtos::{
        AddLineItemRequest, CreateInvoiceRequest, InvoiceDetailResponse, InvoiceResponse,
        LifecycleRequest, ListAllocationsResponse, ListInvoicesQuery, ListInvoicesResponse,
        ReplaceLineItemsRequest, UpdateInvoiceRequest,
    },
    middleware::TenantContext,
    models::ListInvoicesFilter,
    AppState,
};
use receivables_core::error::AppError;

/// Create a draft invoice, optionally with initial line items.
pub async fn create_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    payload.validate()?;

    let (input, lines) = payload.into_parts(tenant.tenant_id);
    let invoice = state.db.create_invoice(&input, &lines).await?;

    Ok((
        StatusCode::CREATED,
        Json(InvoiceResponse::from_invoice(invoice)?),
    ))
}

/// List invoices with cursor pagination.
pub async fn list_invoices(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<ListInvoicesResponse>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(InvoiceStatus::from_string)
        .transpose()?;
    if status == Some(InvoiceStatus::Overdue) {
        // Overdue is derived at read time; it is never stored.
        return Err(AppError::validation(
            "cannot filter by 'overdue'; filter by due date instead",
        ));
    }

    let filter = ListInvoicesFilter {
        status,
        customer_id: query.customer_id,
        start_date: query.start_date,
        end_date: query.end_date,
        page_size: query.page_size,
        page_token: query.page_token,
    };

    let invoices = state.db.list_invoices(tenant.tenant_id, &filter).await?;

    let next_page_token = if invoices.len() as i64 >= filter.page_size.clamp(1, 100) as i64 {
        invoices.last().map(|i| i.invoice_id)
    } else {
        None
    };

    let invoices = invoices
        .into_iter()
        .map(InvoiceResponse::from_invoice)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ListInvoicesResponse {
        invoices,
        next_page_token,
    }))
}

/// Get an invoice with its line items.
pub async fn get_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    let invoice = state
        .db
        .get_invoice(tenant.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let line_items = state.db.list_line_items(tenant.tenant_id, invoice_id).await?;

    Ok(Json(InvoiceDetailResponse {
        invoice: InvoiceResponse::from_invoice(invoice)?,
        line_items,
    }))
}

/// Update draft invoice metadata.
pub async fn update_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceResponse>, AppError> {
    payload.validate()?;

    let invoice = state
        .db
        .update_invoice(tenant.tenant_id, invoice_id, &payload.into_update())
        .await?;

    Ok(Json(InvoiceResponse::from_invoice(invoice)?))
}

/// Delete an invoice. Blocked while payments are allocated.
pub async fn delete_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.db.delete_invoice(tenant.tenant_id, invoice_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send a draft invoice: assigns its number and opens it for payment.
pub async fn send_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    payload: Option<Json<LifecycleRequest>>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let expected_version = payload.and_then(|Json(p)| p.expected_version);

    let invoice = state
        .db
        .send_invoice(tenant.tenant_id, invoice_id, expected_version)
        .await?;

    Ok(Json(InvoiceResponse::from_invoice(invoice)?))
}

/// Record that the recipient viewed the invoice.
pub async fn mark_invoice_viewed(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .db
        .mark_invoice_viewed(tenant.tenant_id, invoice_id)
        .await?;

    Ok(Json(InvoiceResponse::from_invoice(invoice)?))
}

/// Cancel an invoice. Blocked while payments are allocated.
pub async fn cancel_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    payload: Option<Json<LifecycleRequest>>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let expected_version = payload.and_then(|Json(p)| p.expected_version);

    let invoice = state
        .db
        .cancel_invoice(tenant.tenant_id, invoice_id, expected_version)
        .await?;

    Ok(Json(InvoiceResponse::from_invoice(invoice)?))
}

/// Append a line item to an invoice.
pub async fn add_line_item(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<AddLineItemRequest>,
) -> Result<(StatusCode, Json<InvoiceDetailResponse>), AppError> {
    payload.validate()?;

    let invoice = state
        .db
        .add_line_item(
            tenant.tenant_id,
            invoice_id,
            &payload.line.into_create(),
            payload.expected_version,
        )
        .await?;

    let line_items = state.db.list_line_items(tenant.tenant_id, invoice_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(InvoiceDetailResponse {
            invoice: InvoiceResponse::from_invoice(invoice)?,
            line_items,
        }),
    ))
}

/// Replace all line items on an invoice.
pub async fn replace_line_items(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<ReplaceLineItemsRequest>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    payload.validate()?;

    let lines: Vec<_> = payload
        .line_items
        .into_iter()
        .map(|l| l.into_create())
        .collect();

    let invoice = state
        .db
        .replace_line_items(tenant.tenant_id, invoice_id, &lines, payload.expected_version)
        .await?;

    let line_items = state.db.list_line_items(tenant.tenant_id, invoice_id).await?;

    Ok(Json(InvoiceDetailResponse {
        invoice: InvoiceResponse::from_invoice(invoice)?,
        line_items,
    }))
}

/// Remove one line item from an invoice.
pub async fn remove_line_item(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((invoice_id, line_item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .db
        .remove_line_item(tenant.tenant_id, invoice_id, line_item_id, None)
        .await?;

    Ok(Json(InvoiceResponse::from_invoice(invoice)?))
}

/// List allocations against an invoice.
pub async fn list_invoice_allocations(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ListAllocationsResponse>, AppError> {
    // 404 for an unknown invoice rather than an empty list.
    state
        .db
        .get_invoice(tenant.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let allocations = state
        .db
        .list_invoice_allocations(tenant.tenant_id, invoice_id)
        .await?;

    Ok(Json(ListAllocationsResponse { allocations }))
}
