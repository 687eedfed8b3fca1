//! Invoice balance and lifecycle status derivation.
//!
//! Status is never hand-set: it is a pure function of the current balance
//! and explicit flags, recomputed from scratch on every mutation. That is
//! what lets `paid` move back to `partially_paid` when an allocation is
//! reversed.

use chrono::{DateTime, NaiveDate, Utc};
use receivables_core::error::AppError;
use serde::{Deserialize, Serialize};

/// Invoice lifecycle status.
///
/// `Overdue` is a presentation overlay computed at read time; the stored
/// status never holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Viewed => "viewed",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, AppError> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "viewed" => Ok(InvoiceStatus::Viewed),
            "partially_paid" => Ok(InvoiceStatus::PartiallyPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(AppError::validation(format!(
                "unknown invoice status '{}'",
                other
            ))),
        }
    }
}

/// Explicit lifecycle flags. Timestamps are set once by user/recipient
/// action; everything else about status is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
}

/// Derived paid/due amounts, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub amount_paid: i64,
    pub balance_due: i64,
}

impl Balance {
    /// Combine the invoice grand total with the sum of its allocations.
    pub fn new(grand_total: i64, amount_paid: i64) -> Self {
        Self {
            amount_paid,
            balance_due: grand_total - amount_paid,
        }
    }
}

/// Derive the stored status from a cold snapshot of the invoice.
pub fn derive_status(grand_total: i64, amount_paid: i64, flags: &StatusFlags) -> InvoiceStatus {
    if flags.cancelled_at.is_some() {
        return InvoiceStatus::Cancelled;
    }
    // `>=` guards against over-allocation drift; the surplus is surfaced as
    // an anomaly by the caller, not silently absorbed here.
    if amount_paid > 0 && amount_paid >= grand_total {
        return InvoiceStatus::Paid;
    }
    if amount_paid > 0 {
        return InvoiceStatus::PartiallyPaid;
    }
    if flags.viewed_at.is_some() {
        return InvoiceStatus::Viewed;
    }
    if flags.sent_at.is_some() {
        return InvoiceStatus::Sent;
    }
    InvoiceStatus::Draft
}

/// Apply the overdue overlay for display: a sent, unpaid, uncancelled
/// invoice whose due date has passed reads as `overdue`.
pub fn presentation_status(
    stored: InvoiceStatus,
    balance_due: i64,
    flags: &StatusFlags,
    today: NaiveDate,
) -> InvoiceStatus {
    let past_due = flags.due_date.is_some_and(|due| due < today);
    match stored {
        InvoiceStatus::Sent | InvoiceStatus::Viewed | InvoiceStatus::PartiallyPaid
            if past_due && balance_due > 0 =>
        {
            InvoiceStatus::Overdue
        }
        other => other,
    }
}
