//! HTTP middleware: tenant context extraction and request metrics.

pub mod metrics;
pub mod tenant;

pub use metrics::metrics_middleware;
pub use tenant::TenantContext;
