//! Tenant context extraction.
//!
//! Every request carries an `X-Tenant-ID` header set by the gateway after
//! authentication; all queries are scoped to it. A missing or malformed
//! header is a validation failure, not an auth failure, because by the time
//! a request reaches this service the caller is already authenticated.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use receivables_core::error::AppError;
use uuid::Uuid;

/// Tenant scope for a request.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("X-Tenant-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::validation("Missing X-Tenant-ID header"))?;

        let tenant_id = Uuid::parse_str(raw)
            .map_err(|_| AppError::validation("X-Tenant-ID must be a UUID"))?;

        tracing::Span::current().record("tenant_id", tracing::field::display(tenant_id));

        Ok(TenantContext { tenant_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::FromRequestParts;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<TenantContext, AppError> {
        let mut builder = Request::builder().uri("/invoices");
        if let Some(value) = header {
            builder = builder.header("X-Tenant-ID", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        TenantContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_valid_tenant() {
        let id = Uuid::new_v4();
        let ctx = extract(Some(&id.to_string())).await.unwrap();
        assert_eq!(ctx.tenant_id, id);
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let err = extract(None).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn rejects_malformed_uuid() {
        let err = extract(Some("not-a-uuid")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
