//! API Middleware
//!
//! Tenant context extraction and request logging.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::domain::TenantContext;
use crate::error::AppError;

pub const TENANT_HEADER: &str = "X-Tenant-Id";
pub const SESSION_HEADER: &str = "X-Session-Id";
pub const ACTING_USER_HEADER: &str = "X-Acting-User-Id";
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

// =========================================================================
// Tenant context
// =========================================================================

/// Build a [`TenantContext`] from request headers.
///
/// `X-Tenant-Id` is required; the session, acting user and correlation
/// headers are optional. A correlation id is generated when absent.
pub fn context_from_headers(headers: &HeaderMap) -> Result<TenantContext, AppError> {
    let tenant_id = uuid_header(headers, TENANT_HEADER)?
        .ok_or_else(|| AppError::MissingHeader(TENANT_HEADER.to_string()))?;

    let mut context = TenantContext::new(tenant_id);
    if let Some(session_id) = uuid_header(headers, SESSION_HEADER)? {
        context = context.with_session(session_id);
    }
    if let Some(user_id) = uuid_header(headers, ACTING_USER_HEADER)? {
        context = context.with_actor(user_id);
    }
    if let Some(correlation_id) = uuid_header(headers, CORRELATION_HEADER)? {
        context = context.with_correlation_id(correlation_id);
    }
    context.ensure_correlation_id();

    Ok(context)
}

fn uuid_header(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, AppError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Some)
            .ok_or_else(|| AppError::InvalidRequest(format!("{name} must be a UUID"))),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// Attach the caller's tenant context to the request
pub async fn tenant_context_middleware(
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let context = context_from_headers(&headers)?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "proxy-authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request logging
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    let tenant_id = header_string(request.headers(), TENANT_HEADER);
    let correlation_id = header_string(request.headers(), CORRELATION_HEADER);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        tenant_id = ?tenant_id,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %start.elapsed().as_millis(),
        tenant_id = ?tenant_id,
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
