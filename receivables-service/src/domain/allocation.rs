//! Allocation preconditions: the ordered checks behind `allocate`.

use receivables_core::error::AppError;

use super::status::InvoiceStatus;

/// Validate a prospective allocation of `amount` minor units from a payment
/// with `payment_remaining` against an invoice with `invoice_balance_due`.
///
/// Checks run in a fixed order, each with a distinct failure kind, so
/// callers (and their tests) see stable error classes:
/// 1. positive amount (`Validation`)
/// 2. within the payment's unallocated remainder (`OverAllocation`)
/// 3. within the invoice's balance due (`OverAllocation`)
/// 4. invoice not cancelled (`InvalidState`)
pub fn check_allocation(
    amount: i64,
    payment_remaining: i64,
    invoice_balance_due: i64,
    invoice_status: InvoiceStatus,
) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::validation("allocation must be positive"));
    }
    if amount > payment_remaining {
        return Err(AppError::OverAllocation(anyhow::anyhow!(
            "allocation of {} exceeds payment balance of {}",
            amount,
            payment_remaining
        )));
    }
    if amount > invoice_balance_due {
        return Err(AppError::OverAllocation(anyhow::anyhow!(
            "allocation of {} exceeds invoice balance of {}",
            amount,
            invoice_balance_due
        )));
    }
    if invoice_status == InvoiceStatus::Cancelled {
        return Err(AppError::InvalidState(anyhow::anyhow!(
            "cannot allocate to cancelled invoice"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{derive_status, Balance, StatusFlags};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    #[test]
    fn accepts_allocation_within_both_balances() {
        assert!(check_allocation(835, 1000, 835, InvoiceStatus::PartiallyPaid).is_ok());
    }

    #[test]
    fn rejects_non_positive_amount() {
        let err = check_allocation(0, 1000, 1000, InvoiceStatus::Sent).unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = check_allocation(-5, 1000, 1000, InvoiceStatus::Sent).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn rejects_exceeding_payment_remainder() {
        let err = check_allocation(1001, 1000, 5000, InvoiceStatus::Sent).unwrap_err();
        assert_eq!(err.kind(), "over_allocation");
        assert!(err.to_string().contains("payment balance"));
    }

    #[test]
    fn rejects_exceeding_invoice_balance() {
        let err = check_allocation(1, 1000, 0, InvoiceStatus::Paid).unwrap_err();
        assert_eq!(err.kind(), "over_allocation");
        assert!(err.to_string().contains("invoice balance"));
    }

    #[test]
    fn rejects_cancelled_invoice() {
        let err = check_allocation(100, 1000, 500, InvoiceStatus::Cancelled).unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn check_order_is_stable() {
        // A zero amount against a cancelled invoice fails validation first.
        let err = check_allocation(0, 0, 0, InvoiceStatus::Cancelled).unwrap_err();
        assert_eq!(err.kind(), "validation");
        // Payment remainder is checked before invoice balance.
        let err = check_allocation(10, 5, 3, InvoiceStatus::Cancelled).unwrap_err();
        assert!(err.to_string().contains("payment balance"));
    }

    proptest! {
        /// Any sequence of admitted allocations and arbitrary reversals keeps
        /// the running balance exact: paid + due always equals the grand
        /// total, the balance never leaves [0, grand_total], and the payment
        /// is never over-drawn.
        #[test]
        fn random_sequences_keep_balance_consistent(
            grand_total in 1i64..1_000_000,
            payment_amount in 1i64..1_000_000,
            ops in proptest::collection::vec(
                (any::<bool>(), 1i64..1_000_000, any::<prop::sample::Index>()),
                1..64,
            ),
        ) {
            let flags = StatusFlags {
                sent_at: Some(Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()),
                ..StatusFlags::default()
            };
            let mut allocations: Vec<i64> = Vec::new();

            for (is_allocate, amount, which) in ops {
                let allocated: i64 = allocations.iter().sum();
                if is_allocate {
                    let balance = Balance::new(grand_total, allocated);
                    let status = derive_status(grand_total, allocated, &flags);
                    if check_allocation(
                        amount,
                        payment_amount - allocated,
                        balance.balance_due,
                        status,
                    )
                    .is_ok()
                    {
                        allocations.push(amount);
                    }
                } else if !allocations.is_empty() {
                    allocations.remove(which.index(allocations.len()));
                }

                let allocated: i64 = allocations.iter().sum();
                let balance = Balance::new(grand_total, allocated);
                prop_assert_eq!(balance.amount_paid + balance.balance_due, grand_total);
                prop_assert!(balance.balance_due >= 0);
                prop_assert!(balance.balance_due <= grand_total);
                prop_assert!(allocated <= payment_amount);

                let status = derive_status(grand_total, allocated, &flags);
                if balance.balance_due == 0 {
                    prop_assert_eq!(status, InvoiceStatus::Paid);
                } else if allocated > 0 {
                    prop_assert_eq!(status, InvoiceStatus::PartiallyPaid);
                }
            }
        }
    }
}
