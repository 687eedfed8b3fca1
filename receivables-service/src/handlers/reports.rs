//! Reporting endpoints.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use chrono::Utc;

use crate::{
    domain::{self, StatusFlags},
    dtos::{OutstandingInvoice, OutstandingReportResponse},
    middleware::TenantContext,
    AppState,
};
use receivables_core::error::AppError;

/// Invoices with money still owed, overdue flagged, cancelled and draft
/// excluded.
pub async fn outstanding_report(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<OutstandingReportResponse>, AppError> {
    let invoices = state.db.outstanding_invoices(tenant.tenant_id).await?;
    let today = Utc::now().date_naive();

    let mut totals_by_currency: BTreeMap<String, i64> = BTreeMap::new();
    let mut rows = Vec::with_capacity(invoices.len());

    for invoice in invoices {
        let stored = domain::InvoiceStatus::from_string(&invoice.status)?;
        let flags = StatusFlags {
            sent_at: invoice.sent_at,
            viewed_at: invoice.viewed_at,
            cancelled_at: invoice.cancelled_at,
            due_date: invoice.due_date,
        };
        let display = domain::presentation_status(stored, invoice.balance_due, &flags, today);

        *totals_by_currency.entry(invoice.currency.clone()).or_insert(0) +=
            invoice.balance_due;

        rows.push(OutstandingInvoice {
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number,
            customer_name: invoice.customer_name,
            currency: invoice.currency,
            due_date: invoice.due_date,
            total: invoice.total,
            amount_paid: invoice.amount_paid,
            balance_due: invoice.balance_due,
            display_status: display.as_str().to_string(),
        });
    }

    let count = rows.len();
    Ok(Json(OutstandingReportResponse {
        invoices: rows,
        totals_by_currency,
        count,
    }))
}
