//! Reporting DTOs.

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

/// One row of the outstanding report.
#[derive(Debug, Serialize)]
pub struct OutstandingInvoice {
    pub invoice_id: Uuid,
    pub invoice_number: Option<String>,
    pub customer_name: Option<String>,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub total: i64,
    pub amount_paid: i64,
    pub balance_due: i64,
    /// Stored status with the overdue overlay applied.
    pub display_status: String,
}

#[derive(Debug, Serialize)]
pub struct OutstandingReportResponse {
    pub invoices: Vec<OutstandingInvoice>,
    /// Sum of balances due across the report, in minor units. Only
    /// meaningful when all rows share a currency; broken out per currency
    /// in `totals_by_currency`.
    pub totals_by_currency: std::collections::BTreeMap<String, i64>,
    pub count: usize,
}
