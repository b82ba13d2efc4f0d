use std::time::Instant;

use axum::{
    body::Body,
    extract::{FromRequestParts, MatchedPath, State},
    http::{HeaderName, HeaderValue, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use rolodex_core::UserId;
use uuid::Uuid;

use crate::cache::AdminActionKind;
use crate::error::ApiError;
use crate::server::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the caller, inserted into request extensions by the
/// authentication layer in front of this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or(ApiError::Unauthorized)
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Trust the `x-user-id` header set by an upstream gateway.
pub async fn trusted_identity_header(mut req: Request<Body>, next: Next) -> Response {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<UserId>().ok());

    if let Some(user_id) = user_id {
        req.extensions_mut().insert(AuthenticatedUser { user_id });
    }
    next.run(req).await
}

// =============================================================================
// Admin audit
// =============================================================================

/// Record every successful call to an admin endpoint in the audit trail.
pub async fn admin_audit(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let actor = req.extensions().get::<AuthenticatedUser>().copied();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let elapsed = start.elapsed();
    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        actor_id = actor.map(|a| a.user_id),
        elapsed_ms = elapsed.as_millis() as u64,
        "admin endpoint"
    );

    if let Some(actor) = actor
        && status.is_success()
    {
        let action = AdminActionKind::Endpoint {
            method,
            path,
            status: status.as_u16(),
        };
        let detail = format!("HTTP {} in {:.4}s", status.as_u16(), elapsed.as_secs_f64());
        if let Err(e) = state
            .cache
            .cache_admin_action(actor.user_id, action, None, Some(detail))
            .await
        {
            tracing::warn!(error = %e, "admin endpoint call not recorded");
        }
    }
    response
}

// =============================================================================
// Other Middleware
// =============================================================================

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => match HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            Ok(value) => value,
            Err(_) => return next.run(req).await,
        },
    };

    req.extensions_mut().insert(req_id_value.clone());
    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(req).await;

    crate::metrics::record_http_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}
