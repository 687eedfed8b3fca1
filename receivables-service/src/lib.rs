//! Receivables service: invoices, payments, allocations, and receipts.
//!
//! The domain core (`domain`) is pure computation over integer minor units;
//! `services::database` is the authoritative, transactional path that keeps
//! derived invoice fields consistent with line items and allocations.

pub mod config;
pub mod domain;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};
