//! Database service for receivables-service.
//!
//! Every mutation that touches derived invoice columns (totals, balances,
//! status, version) runs as one transaction: lock the rows, apply the
//! change, recompute from base records, commit. Payment rows are always
//! locked before invoice rows so concurrent allocations cannot deadlock.

use crate::domain::{self, InvoiceStatus, StatusFlags};
use crate::models::{
    AllocatePayment, CreateInvoice, CreateLineItem, CreatePayment, Invoice, LineItem,
    ListInvoicesFilter, ListPaymentsFilter, ListReceiptsFilter, Payment, PaymentAllocation,
    ReceiptSnapshot, UpdateInvoice,
};
use crate::services::metrics::{
    ALLOCATIONS_TOTAL, DB_QUERY_DURATION, INVOICES_TOTAL, PAYMENT_AMOUNT_TOTAL, RECEIPTS_TOTAL,
};
use crate::services::receipts;
use receivables_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of an allocation attempt.
#[derive(Debug)]
pub struct AllocationOutcome {
    pub allocation: PaymentAllocation,
    /// Invoice state after the allocation was applied (or current state on
    /// an idempotent replay).
    pub invoice: Invoice,
    pub receipt: Option<ReceiptSnapshot>,
    /// True when an idempotency key matched an earlier allocation and
    /// nothing was written.
    pub replayed: bool,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "receivables-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create a draft invoice with its initial line items.
    #[instrument(skip(self, input, lines), fields(tenant_id = %input.tenant_id))]
    pub async fn create_invoice(
        &self,
        input: &CreateInvoice,
        lines: &[CreateLineItem],
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        // Validate and price up front so nothing is written for bad input.
        for line in lines {
            line.to_line_input()?;
        }

        let mut tx = self.begin().await?;

        let invoice_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoices (invoice_id, tenant_id, status, customer_id, customer_name,
                                  currency, issue_date, due_date, notes)
            VALUES ($1, $2, 'draft', $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(invoice_id)
        .bind(input.tenant_id)
        .bind(input.customer_id)
        .bind(&input.customer_name)
        .bind(input.currency.as_str())
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(&input.notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

        for (idx, line) in lines.iter().enumerate() {
            Self::insert_line_item(&mut tx, input.tenant_id, invoice_id, line, idx as i32).await?;
        }

        let invoice = Self::recompute_invoice(&mut tx, input.tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        INVOICES_TOTAL.with_label_values(&["draft"]).inc();
        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, total = invoice.total, "Invoice created");

        Ok(invoice)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT * FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices for a tenant with cursor pagination.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status = filter.status.map(|s| s.as_str().to_string());

        let invoices = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT * FROM invoices
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::uuid IS NULL OR customer_id = $3)
                  AND ($4::date IS NULL OR issue_date >= $4)
                  AND ($5::date IS NULL OR issue_date <= $5)
                  AND invoice_id > $6
                ORDER BY invoice_id
                LIMIT $7
                "#,
            )
            .bind(tenant_id)
            .bind(&status)
            .bind(filter.customer_id)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT * FROM invoices
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::uuid IS NULL OR customer_id = $3)
                  AND ($4::date IS NULL OR issue_date >= $4)
                  AND ($5::date IS NULL OR issue_date <= $5)
                ORDER BY invoice_id
                LIMIT $6
                "#,
            )
            .bind(tenant_id)
            .bind(&status)
            .bind(filter.customer_id)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Update a draft invoice's metadata.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn update_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;
        Self::check_version(&invoice, input.expected_version)?;

        if invoice.status != InvoiceStatus::Draft.as_str() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "only draft invoices can be edited (status is '{}')",
                invoice.status
            )));
        }

        sqlx::query(
            r#"
            UPDATE invoices
            SET customer_id = COALESCE($3, customer_id),
                customer_name = COALESCE($4, customer_name),
                due_date = COALESCE($5, due_date),
                notes = COALESCE($6, notes)
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(input.customer_id)
        .bind(&input.customer_name)
        .bind(input.due_date)
        .bind(&input.notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Delete an invoice. Blocked while allocations exist; line items
    /// cascade.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;

        let allocations = Self::count_allocations(&mut tx, tenant_id, invoice_id).await?;
        if allocations > 0 {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "cannot delete invoice with {} allocation(s); deallocate first",
                allocations
            )));
        }

        sqlx::query("DELETE FROM invoices WHERE tenant_id = $1 AND invoice_id = $2")
            .bind(tenant_id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, "Invoice deleted");

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Invoice Lifecycle Operations
    // -------------------------------------------------------------------------

    /// Send a draft invoice: assign its number and set `sent_at`.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn send_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        expected_version: Option<i64>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["send_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;
        Self::check_version(&invoice, expected_version)?;

        if invoice.status != InvoiceStatus::Draft.as_str() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "only draft invoices can be sent (status is '{}')",
                invoice.status
            )));
        }

        let line_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM line_items WHERE tenant_id = $1 AND invoice_id = $2",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count lines: {}", e)))?;

        if line_count == 0 {
            return Err(AppError::validation(
                "invoice must have at least one line item before sending",
            ));
        }

        let invoice_number = sqlx::query_scalar::<_, String>("SELECT next_invoice_number($1)")
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to assign invoice number: {}", e))
            })?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET invoice_number = $3, sent_at = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(&invoice_number)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to send invoice: {}", e)))?;

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, invoice_number = %invoice_number, "Invoice sent");

        Ok(invoice)
    }

    /// Record that the recipient viewed the invoice. Idempotent: the first
    /// view timestamp wins.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn mark_invoice_viewed(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_viewed"])
            .start_timer();

        let mut tx = self.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;

        if invoice.sent_at.is_none() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice has not been sent"
            )));
        }
        if invoice.cancelled_at.is_some() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice is cancelled"
            )));
        }

        sqlx::query(
            r#"
            UPDATE invoices
            SET viewed_at = COALESCE(viewed_at, NOW())
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark viewed: {}", e)))?;

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Cancel an invoice. Blocked once payments are allocated; deallocate
    /// first.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        expected_version: Option<i64>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;
        Self::check_version(&invoice, expected_version)?;

        if invoice.cancelled_at.is_some() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice is already cancelled"
            )));
        }
        if invoice.amount_paid > 0 {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "cannot cancel invoice with allocated payments; deallocate first"
            )));
        }

        sqlx::query(
            r#"
            UPDATE invoices
            SET cancelled_at = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel invoice: {}", e)))?;

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, "Invoice cancelled");

        Ok(invoice)
    }

    // -------------------------------------------------------------------------
    // Line Item Operations
    // -------------------------------------------------------------------------

    /// List line items for an invoice in sort order.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn list_line_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_line_items"])
            .start_timer();

        let items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT * FROM line_items
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY sort_order, line_item_id
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list line items: {}", e)))?;

        timer.observe_duration();

        Ok(items)
    }

    /// Append a line item to an invoice and recompute its totals.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn add_line_item(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        input: &CreateLineItem,
        expected_version: Option<i64>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_line_item"])
            .start_timer();

        input.to_line_input()?;

        let mut tx = self.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;
        Self::check_version(&invoice, expected_version)?;
        Self::check_lines_mutable(&mut tx, &invoice).await?;

        let next_sort = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM line_items WHERE tenant_id = $1 AND invoice_id = $2",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get sort order: {}", e)))?;

        Self::insert_line_item(&mut tx, tenant_id, invoice_id, input, next_sort).await?;

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Replace all line items on an invoice and recompute its totals.
    #[instrument(skip(self, lines), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn replace_line_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        lines: &[CreateLineItem],
        expected_version: Option<i64>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_line_items"])
            .start_timer();

        for line in lines {
            line.to_line_input()?;
        }

        let mut tx = self.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;
        Self::check_version(&invoice, expected_version)?;
        Self::check_lines_mutable(&mut tx, &invoice).await?;

        sqlx::query("DELETE FROM line_items WHERE tenant_id = $1 AND invoice_id = $2")
            .bind(tenant_id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear line items: {}", e))
            })?;

        for (idx, line) in lines.iter().enumerate() {
            Self::insert_line_item(&mut tx, tenant_id, invoice_id, line, idx as i32).await?;
        }

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Remove one line item and recompute invoice totals.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn remove_line_item(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        line_item_id: Uuid,
        expected_version: Option<i64>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_line_item"])
            .start_timer();

        let mut tx = self.begin().await?;

        let invoice = Self::lock_invoice(&mut tx, tenant_id, invoice_id).await?;
        Self::check_version(&invoice, expected_version)?;
        Self::check_lines_mutable(&mut tx, &invoice).await?;

        let result = sqlx::query(
            "DELETE FROM line_items WHERE tenant_id = $1 AND invoice_id = $2 AND line_item_id = $3",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(line_item_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to remove line item: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Line item {} not found",
                line_item_id
            )));
        }

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    /// Record a payment.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        if input.amount <= 0 {
            return Err(AppError::validation("payment amount must be positive"));
        }

        let payment_id = Uuid::new_v4();
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (payment_id, tenant_id, amount, currency, payment_method,
                                  payment_date, payer_name, reference, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(input.tenant_id)
        .bind(input.amount)
        .bind(input.currency.as_str())
        .bind(input.payment_method.as_str())
        .bind(input.payment_date)
        .bind(&input.payer_name)
        .bind(&input.reference)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create payment: {}", e)))?;

        PAYMENT_AMOUNT_TOTAL
            .with_label_values(&[payment.currency.as_str()])
            .inc_by(payment.amount as f64);
        timer.observe_duration();

        info!(payment_id = %payment.payment_id, amount = payment.amount, "Payment recorded");

        Ok(payment)
    }

    /// Get a payment by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE tenant_id = $1 AND payment_id = $2",
        )
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// List payments for a tenant with cursor pagination.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_payments(
        &self,
        tenant_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let method = filter.method.map(|m| m.as_str().to_string());

        let payments = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Payment>(
                r#"
                SELECT * FROM payments
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR payment_method = $2)
                  AND ($3::date IS NULL OR payment_date >= $3)
                  AND ($4::date IS NULL OR payment_date <= $4)
                  AND payment_id > $5
                ORDER BY payment_id
                LIMIT $6
                "#,
            )
            .bind(tenant_id)
            .bind(&method)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Payment>(
                r#"
                SELECT * FROM payments
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR payment_method = $2)
                  AND ($3::date IS NULL OR payment_date >= $3)
                  AND ($4::date IS NULL OR payment_date <= $4)
                ORDER BY payment_id
                LIMIT $5
                "#,
            )
            .bind(tenant_id)
            .bind(&method)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    /// Update a payment's notes. The only mutable payment field.
    #[instrument(skip(self, notes), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn update_payment_notes(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        notes: Option<&str>,
    ) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_payment_notes"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET notes = $3
            WHERE tenant_id = $1 AND payment_id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(payment_id)
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update payment: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id)))?;

        timer.observe_duration();

        Ok(payment)
    }

    // -------------------------------------------------------------------------
    // Allocation Operations
    // -------------------------------------------------------------------------

    /// Allocate (part of) a payment against an invoice.
    ///
    /// One transaction: lock payment then invoice (fixed order), run the
    /// ordered precondition checks, insert the allocation, recompute the
    /// invoice, and write the receipt snapshot. An idempotency-key replay
    /// returns the original allocation without writing anything.
    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, payment_id = %input.payment_id, invoice_id = %input.invoice_id)
    )]
    pub async fn allocate_payment(
        &self,
        input: &AllocatePayment,
    ) -> Result<AllocationOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["allocate_payment"])
            .start_timer();

        let mut tx = self.begin().await?;

        if let Some(key) = &input.idempotency_key {
            if let Some(existing) = Self::find_allocation_by_key(&mut tx, input.tenant_id, key).await? {
                let outcome = self.replay_outcome(existing).await?;
                timer.observe_duration();
                ALLOCATIONS_TOTAL.with_label_values(&["replayed"]).inc();
                return Ok(outcome);
            }
        }

        // Lock order: payment before invoice, always.
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE tenant_id = $1 AND payment_id = $2 FOR UPDATE",
        )
        .bind(input.tenant_id)
        .bind(input.payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock payment: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Payment {} not found", input.payment_id))
        })?;

        let invoice = Self::lock_invoice(&mut tx, input.tenant_id, input.invoice_id).await?;

        if payment.currency != invoice.currency {
            return Err(AppError::validation(format!(
                "payment currency {} does not match invoice currency {}",
                payment.currency, invoice.currency
            )));
        }

        let allocated = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payment_allocations
            WHERE tenant_id = $1 AND payment_id = $2
            "#,
        )
        .bind(input.tenant_id)
        .bind(input.payment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum allocations: {}", e))
        })?;

        let status = InvoiceStatus::from_string(&invoice.status)?;
        domain::check_allocation(
            input.amount,
            payment.amount - allocated,
            invoice.balance_due,
            status,
        )
        .inspect_err(|_| ALLOCATIONS_TOTAL.with_label_values(&["rejected"]).inc())?;

        let allocation_id = Uuid::new_v4();
        let inserted = sqlx::query_as::<_, PaymentAllocation>(
            r#"
            INSERT INTO payment_allocations (allocation_id, tenant_id, payment_id, invoice_id,
                                             amount, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(allocation_id)
        .bind(input.tenant_id)
        .bind(input.payment_id)
        .bind(input.invoice_id)
        .bind(input.amount)
        .bind(&input.idempotency_key)
        .fetch_one(&mut *tx)
        .await;

        let allocation = match inserted {
            Ok(a) => a,
            // Idempotency-key race: another request committed the same key
            // between our check and insert. Roll back and return theirs.
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                drop(tx);
                let key = input.idempotency_key.as_deref().unwrap_or_default();
                let existing = sqlx::query_as::<_, PaymentAllocation>(
                    "SELECT * FROM payment_allocations WHERE tenant_id = $1 AND idempotency_key = $2",
                )
                .bind(input.tenant_id)
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to load allocation: {}", e))
                })?;
                let outcome = self.replay_outcome(existing).await?;
                timer.observe_duration();
                ALLOCATIONS_TOTAL.with_label_values(&["replayed"]).inc();
                return Ok(outcome);
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to insert allocation: {}",
                    e
                )))
            }
        };

        let invoice = Self::recompute_invoice(&mut tx, input.tenant_id, input.invoice_id).await?;

        let receipt =
            Self::write_receipt_snapshot(&mut tx, &invoice, &payment, &allocation).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        ALLOCATIONS_TOTAL.with_label_values(&["created"]).inc();
        RECEIPTS_TOTAL
            .with_label_values(&[payment.payment_method.as_str()])
            .inc();

        info!(
            allocation_id = %allocation.allocation_id,
            amount = allocation.amount,
            invoice_status = %invoice.status,
            balance_due = invoice.balance_due,
            "Payment allocated"
        );

        Ok(AllocationOutcome {
            allocation,
            invoice,
            receipt: Some(receipt),
            replayed: false,
        })
    }

    /// Reverse an allocation and restore the invoice balance. The receipt
    /// snapshot written at allocation time is left untouched.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, allocation_id = %allocation_id))]
    pub async fn deallocate_payment(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["deallocate_payment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let allocation = sqlx::query_as::<_, PaymentAllocation>(
            "SELECT * FROM payment_allocations WHERE tenant_id = $1 AND allocation_id = $2",
        )
        .bind(tenant_id)
        .bind(allocation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load allocation: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Allocation {} not found", allocation_id))
        })?;

        // Same lock order as allocate.
        sqlx::query("SELECT payment_id FROM payments WHERE tenant_id = $1 AND payment_id = $2 FOR UPDATE")
            .bind(tenant_id)
            .bind(allocation.payment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock payment: {}", e)))?;

        Self::lock_invoice(&mut tx, tenant_id, allocation.invoice_id).await?;

        sqlx::query("DELETE FROM payment_allocations WHERE tenant_id = $1 AND allocation_id = $2")
            .bind(tenant_id)
            .bind(allocation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete allocation: {}", e))
            })?;

        let invoice = Self::recompute_invoice(&mut tx, tenant_id, allocation.invoice_id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        ALLOCATIONS_TOTAL.with_label_values(&["reversed"]).inc();

        info!(
            allocation_id = %allocation_id,
            invoice_status = %invoice.status,
            balance_due = invoice.balance_due,
            "Allocation reversed"
        );

        Ok(invoice)
    }

    /// List allocations against an invoice.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn list_invoice_allocations(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoice_allocations"])
            .start_timer();

        let allocations = sqlx::query_as::<_, PaymentAllocation>(
            r#"
            SELECT * FROM payment_allocations
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_utc, allocation_id
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list allocations: {}", e))
        })?;

        timer.observe_duration();

        Ok(allocations)
    }

    /// List allocations made from a payment.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn list_payment_allocations(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentAllocation>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payment_allocations"])
            .start_timer();

        let allocations = sqlx::query_as::<_, PaymentAllocation>(
            r#"
            SELECT * FROM payment_allocations
            WHERE tenant_id = $1 AND payment_id = $2
            ORDER BY created_utc, allocation_id
            "#,
        )
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list allocations: {}", e))
        })?;

        timer.observe_duration();

        Ok(allocations)
    }

    // -------------------------------------------------------------------------
    // Receipt Operations
    // -------------------------------------------------------------------------

    /// Get a receipt snapshot by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, receipt_id = %receipt_id))]
    pub async fn get_receipt(
        &self,
        tenant_id: Uuid,
        receipt_id: Uuid,
    ) -> Result<Option<ReceiptSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_receipt"])
            .start_timer();

        let receipt = sqlx::query_as::<_, ReceiptSnapshot>(
            "SELECT * FROM receipt_snapshots WHERE tenant_id = $1 AND receipt_id = $2",
        )
        .bind(tenant_id)
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get receipt: {}", e)))?;

        timer.observe_duration();

        Ok(receipt)
    }

    /// List receipt snapshots with cursor pagination.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_receipts(
        &self,
        tenant_id: Uuid,
        filter: &ListReceiptsFilter,
    ) -> Result<Vec<ReceiptSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_receipts"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let receipts = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, ReceiptSnapshot>(
                r#"
                SELECT * FROM receipt_snapshots
                WHERE tenant_id = $1
                  AND ($2::uuid IS NULL OR payment_id = $2)
                  AND ($3::uuid IS NULL OR invoice_id = $3)
                  AND receipt_id > $4
                ORDER BY receipt_id
                LIMIT $5
                "#,
            )
            .bind(tenant_id)
            .bind(filter.payment_id)
            .bind(filter.invoice_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, ReceiptSnapshot>(
                r#"
                SELECT * FROM receipt_snapshots
                WHERE tenant_id = $1
                  AND ($2::uuid IS NULL OR payment_id = $2)
                  AND ($3::uuid IS NULL OR invoice_id = $3)
                ORDER BY receipt_id
                LIMIT $4
                "#,
            )
            .bind(tenant_id)
            .bind(filter.payment_id)
            .bind(filter.invoice_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list receipts: {}", e)))?;

        timer.observe_duration();

        Ok(receipts)
    }

    // -------------------------------------------------------------------------
    // Reports
    // -------------------------------------------------------------------------

    /// Invoices with money still owed: sent, viewed, or partially paid,
    /// with a positive balance. Draft and cancelled are excluded.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn outstanding_invoices(&self, tenant_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["outstanding_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT * FROM invoices
            WHERE tenant_id = $1
              AND status IN ('sent', 'viewed', 'partially_paid')
              AND balance_due > 0
            ORDER BY due_date ASC NULLS LAST, invoice_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load outstanding report: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    /// Lock an invoice row for the duration of the transaction.
    async fn lock_invoice(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE tenant_id = $1 AND invoice_id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))
    }

    fn check_version(invoice: &Invoice, expected: Option<i64>) -> Result<(), AppError> {
        if let Some(expected) = expected {
            if invoice.version != expected {
                return Err(AppError::ConcurrencyConflict(anyhow::anyhow!(
                    "invoice version is {}, expected {}",
                    invoice.version,
                    expected
                )));
            }
        }
        Ok(())
    }

    async fn count_allocations(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payment_allocations WHERE tenant_id = $1 AND invoice_id = $2",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count allocations: {}", e))
        })
    }

    /// Line items freeze once the invoice is cancelled, paid, or has any
    /// allocation against it.
    async fn check_lines_mutable(
        tx: &mut Transaction<'static, Postgres>,
        invoice: &Invoice,
    ) -> Result<(), AppError> {
        if invoice.status == InvoiceStatus::Cancelled.as_str()
            || invoice.status == InvoiceStatus::Paid.as_str()
        {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "line items cannot change on a {} invoice",
                invoice.status
            )));
        }
        let allocations = Self::count_allocations(tx, invoice.tenant_id, invoice.invoice_id).await?;
        if allocations > 0 {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "line items are frozen once payments are allocated"
            )));
        }
        Ok(())
    }

    /// Price and insert one line item.
    async fn insert_line_item(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
        input: &CreateLineItem,
        sort_order: i32,
    ) -> Result<(), AppError> {
        let priced = domain::price_line(&input.to_line_input()?)?;

        sqlx::query(
            r#"
            INSERT INTO line_items (line_item_id, invoice_id, tenant_id, description, quantity,
                                    unit_price, discount, discount_type, tax_rate,
                                    amount, discount_amount, tax_amount, total, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(tenant_id)
        .bind(&input.description)
        .bind(input.quantity)
        .bind(input.unit_price)
        .bind(input.discount)
        .bind(input.discount_type.as_str())
        .bind(input.tax_rate)
        .bind(priced.base)
        .bind(priced.discount)
        .bind(priced.tax)
        .bind(priced.total)
        .bind(sort_order)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert line item: {}", e))
        })?;

        Ok(())
    }

    /// Recompute every derived invoice column from base records and bump
    /// the version. Callers must hold the invoice row lock.
    async fn recompute_invoice(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let (subtotal, discount_total, tax_total, total) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                r#"
                SELECT COALESCE(SUM(amount), 0)::BIGINT,
                       COALESCE(SUM(discount_amount), 0)::BIGINT,
                       COALESCE(SUM(tax_amount), 0)::BIGINT,
                       COALESCE(SUM(total), 0)::BIGINT
                FROM line_items
                WHERE tenant_id = $1 AND invoice_id = $2
                "#,
            )
            .bind(tenant_id)
            .bind(invoice_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to sum line items: {}", e))
            })?;

        let amount_paid = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payment_allocations
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum allocations: {}", e))
        })?;

        let current = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE tenant_id = $1 AND invoice_id = $2",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

        if amount_paid > total {
            // Should be impossible under the allocation checks; surfaced
            // rather than silently absorbed.
            warn!(
                invoice_id = %invoice_id,
                amount_paid = amount_paid,
                total = total,
                "Allocations exceed invoice total"
            );
        }

        let flags = StatusFlags {
            sent_at: current.sent_at,
            viewed_at: current.viewed_at,
            cancelled_at: current.cancelled_at,
            due_date: current.due_date,
        };
        let status = domain::derive_status(total, amount_paid, &flags);

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET subtotal = $3, discount_total = $4, tax_total = $5, total = $6,
                amount_paid = $7, balance_due = $8, status = $9,
                version = version + 1, updated_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(subtotal)
        .bind(discount_total)
        .bind(tax_total)
        .bind(total)
        .bind(amount_paid)
        .bind(total - amount_paid)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e))
        })?;

        Ok(invoice)
    }

    async fn find_allocation_by_key(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: Uuid,
        key: &str,
    ) -> Result<Option<PaymentAllocation>, AppError> {
        sqlx::query_as::<_, PaymentAllocation>(
            "SELECT * FROM payment_allocations WHERE tenant_id = $1 AND idempotency_key = $2",
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check idempotency: {}", e)))
    }

    /// Assemble the outcome for an idempotent replay: the original
    /// allocation, its receipt, and the invoice's current state.
    async fn replay_outcome(
        &self,
        allocation: PaymentAllocation,
    ) -> Result<AllocationOutcome, AppError> {
        let invoice = self
            .get_invoice(allocation.tenant_id, allocation.invoice_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Invoice {} not found", allocation.invoice_id))
            })?;

        let receipt = sqlx::query_as::<_, ReceiptSnapshot>(
            "SELECT * FROM receipt_snapshots WHERE tenant_id = $1 AND allocation_id = $2",
        )
        .bind(allocation.tenant_id)
        .bind(allocation.allocation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load receipt: {}", e)))?;

        info!(allocation_id = %allocation.allocation_id, "Allocation replayed via idempotency key");

        Ok(AllocationOutcome {
            allocation,
            invoice,
            receipt,
            replayed: true,
        })
    }

    /// Write the frozen receipt for a new allocation, inside the same
    /// transaction. Exactly one per allocation, enforced by the unique
    /// `allocation_id` constraint.
    async fn write_receipt_snapshot(
        tx: &mut Transaction<'static, Postgres>,
        invoice: &Invoice,
        payment: &Payment,
        allocation: &PaymentAllocation,
    ) -> Result<ReceiptSnapshot, AppError> {
        let receipt_number = sqlx::query_scalar::<_, String>("SELECT next_receipt_number($1)")
            .bind(invoice.tenant_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to assign receipt number: {}", e))
            })?;

        let line_items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT * FROM line_items
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY sort_order, line_item_id
            "#,
        )
        .bind(invoice.tenant_id)
        .bind(invoice.invoice_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load line items: {}", e))
        })?;

        let snapshot = receipts::build_snapshot(invoice, &line_items, payment, allocation);

        let receipt = sqlx::query_as::<_, ReceiptSnapshot>(
            r#"
            INSERT INTO receipt_snapshots (receipt_id, tenant_id, receipt_number, payment_id,
                                           invoice_id, allocation_id, snapshot_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice.tenant_id)
        .bind(&receipt_number)
        .bind(payment.payment_id)
        .bind(invoice.invoice_id)
        .bind(allocation.allocation_id)
        .bind(&snapshot)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to write receipt: {}", e))
        })?;

        info!(receipt_id = %receipt.receipt_id, receipt_number = %receipt_number, "Receipt issued");

        Ok(receipt)
    }
}
