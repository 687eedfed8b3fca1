//! HTTP handlers. All operations are scoped to the tenant from the
//! `X-Tenant-ID` header and return `Result<_, AppError>` so the error
//! taxonomy maps to status codes in one place.

pub mod allocations;
pub mod invoices;
pub mod payments;
pub mod receipts;
pub mod reports;
