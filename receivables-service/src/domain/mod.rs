//! Pure financial computation: no I/O, no floats, no ambient state.
//!
//! Everything here can be re-run freely (e.g. for a client-side preview);
//! only the transactional path in `services::database` is authoritative.

pub mod allocation;
pub mod money;
pub mod pricing;
pub mod status;

pub use allocation::check_allocation;
pub use money::{checked_sum, round_minor};
pub use pricing::{aggregate, price_line, DiscountType, InvoiceTotals, LineAmounts, LineInput};
pub use status::{derive_status, presentation_status, Balance, InvoiceStatus, StatusFlags};
