//! Service layer: persistence, metrics, and receipt issuance.

pub mod database;
pub mod metrics;
pub mod receipts;

pub use database::Database;
