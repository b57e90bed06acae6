//! Tenant context middleware for multi-tenancy support.
//!
//! Extracts tenant information (tenant_id, user_id) from request headers.
//! These headers are set by the gateway after authenticating the user and
//! validating their tenant membership.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Tenant context extracted from request headers.
#[derive(Debug, Clone)]
pub struct TenantContext {
    /// Tenant whose data the request operates on.
    pub tenant_id: Uuid,
    /// User making the request; recorded on attestations, approvals and
    /// closes when present.
    pub user_id: Option<Uuid>,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = parts
            .headers
            .get("X-Tenant-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing X-Tenant-ID header (required from gateway)"
                ))
            })?;

        let tenant_id = Uuid::parse_str(tenant_id)
            .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid X-Tenant-ID header")))?;

        // X-User-ID is optional; some operations are system-initiated.
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok());

        // Add to tracing span for observability
        let span = tracing::Span::current();
        span.record("tenant_id", tracing::field::display(tenant_id));
        if let Some(uid) = user_id {
            span.record("user_id", tracing::field::display(uid));
        }

        Ok(TenantContext { tenant_id, user_id })
    }
}
