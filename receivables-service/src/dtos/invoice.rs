//! Invoice DTOs.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{self, DiscountType, StatusFlags};
use crate::models::{CreateInvoice, CreateLineItem, Currency, Invoice, LineItem, UpdateInvoice};
use receivables_core::error::AppError;

/// One line item in a create/replace request. Amount fields are priced
/// server-side; clients only send the inputs.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LineItemRequest {
    #[validate(length(min = 1, max = 1000, message = "Description is required"))]
    pub description: String,
    pub quantity: Decimal,
    /// Minor units.
    pub unit_price: i64,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default = "default_discount_type")]
    pub discount_type: DiscountType,
    #[serde(default)]
    pub tax_rate: Decimal,
}

fn default_discount_type() -> DiscountType {
    DiscountType::Fixed
}

impl LineItemRequest {
    pub fn into_create(self) -> CreateLineItem {
        CreateLineItem {
            description: self.description,
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount: self.discount,
            discount_type: self.discount_type,
            tax_rate: self.tax_rate,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub customer_id: Option<Uuid>,
    #[validate(length(max = 255))]
    pub customer_name: Option<String>,
    pub currency: Currency,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub line_items: Vec<LineItemRequest>,
}

impl CreateInvoiceRequest {
    pub fn into_parts(self, tenant_id: Uuid) -> (CreateInvoice, Vec<CreateLineItem>) {
        let lines = self
            .line_items
            .into_iter()
            .map(LineItemRequest::into_create)
            .collect();
        let invoice = CreateInvoice {
            tenant_id,
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            currency: self.currency,
            issue_date: self.issue_date,
            due_date: self.due_date,
            notes: self.notes,
        };
        (invoice, lines)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    pub customer_id: Option<Uuid>,
    #[validate(length(max = 255))]
    pub customer_name: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub expected_version: Option<i64>,
}

impl UpdateInvoiceRequest {
    pub fn into_update(self) -> UpdateInvoice {
        UpdateInvoice {
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            due_date: self.due_date,
            notes: self.notes,
            expected_version: self.expected_version,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddLineItemRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub line: LineItemRequest,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReplaceLineItemsRequest {
    #[validate(nested)]
    pub line_items: Vec<LineItemRequest>,
    pub expected_version: Option<i64>,
}

/// Body for send/cancel. Optional; an absent body skips the version check.
#[derive(Debug, Default, Deserialize)]
pub struct LifecycleRequest {
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_page_size")]
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

pub(crate) fn default_page_size() -> i32 {
    50
}

/// Invoice as returned by the API. `display_status` applies the overdue
/// overlay; `status` is the stored value.
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub invoice_id: Uuid,
    pub invoice_number: Option<String>,
    pub status: String,
    pub display_status: String,
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub total: i64,
    pub amount_paid: i64,
    pub balance_due: i64,
    pub notes: Option<String>,
    pub version: i64,
    pub sent_at: Option<chrono::DateTime<Utc>>,
    pub viewed_at: Option<chrono::DateTime<Utc>>,
    pub cancelled_at: Option<chrono::DateTime<Utc>>,
    pub created_utc: chrono::DateTime<Utc>,
    pub updated_utc: chrono::DateTime<Utc>,
}

impl InvoiceResponse {
    pub fn from_invoice(invoice: Invoice) -> Result<Self, AppError> {
        let stored = domain::InvoiceStatus::from_string(&invoice.status)?;
        let flags = StatusFlags {
            sent_at: invoice.sent_at,
            viewed_at: invoice.viewed_at,
            cancelled_at: invoice.cancelled_at,
            due_date: invoice.due_date,
        };
        let display = domain::presentation_status(
            stored,
            invoice.balance_due,
            &flags,
            Utc::now().date_naive(),
        );
        Ok(Self {
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number,
            status: invoice.status,
            display_status: display.as_str().to_string(),
            customer_id: invoice.customer_id,
            customer_name: invoice.customer_name,
            currency: invoice.currency,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            subtotal: invoice.subtotal,
            discount_total: invoice.discount_total,
            tax_total: invoice.tax_total,
            total: invoice.total,
            amount_paid: invoice.amount_paid,
            balance_due: invoice.balance_due,
            notes: invoice.notes,
            version: invoice.version,
            sent_at: invoice.sent_at,
            viewed_at: invoice.viewed_at,
            cancelled_at: invoice.cancelled_at,
            created_utc: invoice.created_utc,
            updated_utc: invoice.updated_utc,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    #[serde(flatten)]
    pub invoice: InvoiceResponse,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
pub struct ListInvoicesResponse {
    pub invoices: Vec<InvoiceResponse>,
    pub next_page_token: Option<Uuid>,
}
