//! Receipt snapshot assembly.
//!
//! A receipt is written once, at allocation time, as a frozen JSON copy of
//! the invoice, payment, and allocation it documents. Later edits to any of
//! those records must not change what the receipt shows, so everything the
//! receipt renders is copied here rather than joined at read time.

use serde_json::json;

use crate::models::{Invoice, LineItem, Payment, PaymentAllocation};

/// Build the frozen payload stored in `receipt_snapshots.snapshot_data`.
pub fn build_snapshot(
    invoice: &Invoice,
    line_items: &[LineItem],
    payment: &Payment,
    allocation: &PaymentAllocation,
) -> serde_json::Value {
    let lines: Vec<_> = line_items
        .iter()
        .map(|item| {
            json!({
                "description": item.description,
                "quantity": item.quantity,
                "unit_price": item.unit_price,
                "discount_amount": item.discount_amount,
                "tax_amount": item.tax_amount,
                "total": item.total,
            })
        })
        .collect();

    json!({
        "allocation": {
            "allocation_id": allocation.allocation_id,
            "amount": allocation.amount,
            "allocated_utc": allocation.created_utc,
        },
        "payment": {
            "payment_id": payment.payment_id,
            "amount": payment.amount,
            "currency": payment.currency,
            "payment_method": payment.payment_method,
            "payment_date": payment.payment_date,
            "payer_name": payment.payer_name,
            "reference": payment.reference,
        },
        "invoice": {
            "invoice_id": invoice.invoice_id,
            "invoice_number": invoice.invoice_number,
            "customer_id": invoice.customer_id,
            "customer_name": invoice.customer_name,
            "currency": invoice.currency,
            "issue_date": invoice.issue_date,
            "due_date": invoice.due_date,
            "subtotal": invoice.subtotal,
            "discount_total": invoice.discount_total,
            "tax_total": invoice.tax_total,
            "total": invoice.total,
            // Balance as of this allocation, not as of read time.
            "amount_paid": invoice.amount_paid,
            "balance_due": invoice.balance_due,
            "line_items": lines,
        },
    })
}
