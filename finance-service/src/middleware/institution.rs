//! Institution context extraction for multi-tenancy.
//!
//! The acting institution is resolved once per request from the
//! `X-Institution-ID` header (set by the authenticating frontend) and
//! passed explicitly into every repository call. Nothing below the
//! handler layer does an ambient tenant lookup.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Tenant context extracted from request headers.
#[derive(Debug, Clone)]
pub struct InstitutionContext {
    /// The institution every query in this request is scoped to.
    pub institution_id: Uuid,
    /// Staff member making the request, when known.
    pub user_id: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for InstitutionContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let institution_id = parts
            .headers
            .get("X-Institution-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-Institution-ID header"))
            })?;

        let institution_id = Uuid::parse_str(institution_id).map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("X-Institution-ID is not a valid UUID"))
        })?;

        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let span = tracing::Span::current();
        span.record("institution_id", institution_id.to_string());
        if let Some(ref uid) = user_id {
            span.record("user_id", uid.as_str());
        }

        Ok(InstitutionContext {
            institution_id,
            user_id,
        })
    }
}
