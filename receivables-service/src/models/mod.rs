//! Domain models for the receivables service.

mod allocation;
mod invoice;
mod line_item;
mod payment;
mod receipt;

pub use allocation::{AllocatePayment, PaymentAllocation};
pub use invoice::{CreateInvoice, Currency, Invoice, ListInvoicesFilter, UpdateInvoice};
pub use line_item::{CreateLineItem, LineItem};
pub use payment::{CreatePayment, ListPaymentsFilter, Payment, PaymentMethod};
pub use receipt::{ListReceiptsFilter, ReceiptSnapshot};
