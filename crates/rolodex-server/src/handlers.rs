use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use rolodex_core::{Contact, Role, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cache::{AdminActionRecord, CacheStatsReport, UserSnapshot};
use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::server::AppState;
use crate::services::ResetRequestOutcome;

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 1000;
const RESET_ACCEPTED_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";

impl AppState {
    /// Resolve the caller's role through the authorization cache and
    /// require at least `required`.
    async fn require_role(&self, user: AuthenticatedUser, required: Role) -> Result<(), ApiError> {
        let decision = self
            .authz
            .authorize(user.user_id, required, self.user_store.as_ref())
            .await?;
        match decision.role {
            None => Err(ApiError::Unauthorized),
            Some(_) if !decision.allowed => Err(ApiError::Forbidden(format!(
                "Requires {required} role"
            ))),
            Some(_) => Ok(()),
        }
    }
}

// =============================================================================
// Health and metrics
// =============================================================================

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.cache.backend();
    let reachable = backend.ping().await;
    Json(json!({
        "status": "ok",
        "cache": {
            "store": backend.store_kind(),
            "state": backend.state(),
            "reachable": reachable,
        }
    }))
}

pub async fn metrics() -> impl IntoResponse {
    match crate::metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
    }
}

// =============================================================================
// Cache management
// =============================================================================

pub async fn cache_stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CacheStatsReport>, ApiError> {
    state.require_role(user, Role::User).await?;
    Ok(Json(state.cache.get_cache_stats().await))
}

pub async fn clear_user_cache(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    state.require_role(user, Role::User).await?;
    let message = if state.users.clear_cached(user.user_id).await? {
        format!("Cache cleared successfully for user {}", user.user_id)
    } else {
        "Cache clearing failed or cache is disabled".to_string()
    };
    Ok(Json(json!({ "message": message })))
}

pub async fn clear_contacts_cache(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    state.require_role(user, Role::User).await?;
    let message = if state.cache.invalidate_contacts(user.user_id).await {
        format!("Contacts cache cleared successfully for user {}", user.user_id)
    } else {
        "Cache clearing failed or cache is disabled".to_string()
    };
    Ok(Json(json!({ "message": message })))
}

// =============================================================================
// Account
// =============================================================================

/// Public view of a user; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub avatar_url: Option<String>,
}

impl From<UserSnapshot> for UserProfile {
    fn from(s: UserSnapshot) -> Self {
        Self {
            id: s.id,
            username: s.username,
            email: s.email,
            full_name: s.full_name,
            is_active: s.is_active,
            is_verified: s.is_verified,
            avatar_url: s.avatar_url,
        }
    }
}

pub async fn current_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserProfile>, ApiError> {
    let snapshot = state
        .users
        .find_by_id(user.user_id)
        .await?
        .filter(|s| s.is_active)
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(snapshot.into()))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

pub async fn list_contacts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    state.require_role(user, Role::User).await?;
    let contacts = match (page.skip, page.limit) {
        (None, None) => state.contacts.list_all(user.user_id).await?,
        (skip, limit) => {
            state
                .contacts
                .list_page(user.user_id, skip.unwrap_or(0), limit.unwrap_or(100))
                .await?
        }
    };
    Ok(Json(contacts))
}

#[derive(Debug, Deserialize)]
pub struct ResetRequestBody {
    pub email: String,
}

/// Always answers the same way so the response reveals nothing about the
/// address.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(body): Json<ResetRequestBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match state.resets.request_reset(&body.email).await? {
        ResetRequestOutcome::Issued(ticket) => {
            tracing::info!(user_id = ticket.user_id, "password reset ready for delivery");
        }
        ResetRequestOutcome::Throttled => {
            tracing::info!("password reset request throttled");
        }
        ResetRequestOutcome::UnknownEmail => {}
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": RESET_ACCEPTED_MESSAGE })),
    ))
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub limit: Option<usize>,
}

pub async fn admin_actions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AdminActionRecord>>, ApiError> {
    state.require_role(user, Role::Admin).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    Ok(Json(state.cache.recent_admin_actions(limit).await))
}

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: Role,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub is_active: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminUserView {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub role: Role,
}

impl From<rolodex_core::User> for AdminUserView {
    fn from(u: rolodex_core::User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            is_active: u.is_active,
            role: u.role,
        }
    }
}

pub async fn update_user_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_id): Path<UserId>,
    Json(change): Json<RoleChange>,
) -> Result<Json<AdminUserView>, ApiError> {
    state.require_role(user, Role::Admin).await?;
    let updated = state
        .admin
        .update_role(user.user_id, target_id, change.role, change.reason)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(updated.into()))
}

pub async fn update_user_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_id): Path<UserId>,
    Json(change): Json<StatusChange>,
) -> Result<Json<AdminUserView>, ApiError> {
    state.require_role(user, Role::Admin).await?;
    let updated = state
        .admin
        .update_status(user.user_id, target_id, change.is_active, change.reason)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(updated.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_id): Path<UserId>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    state.require_role(user, Role::Admin).await?;
    if state
        .admin
        .delete_user(user.user_id, target_id, params.reason)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("User not found".into()))
    }
}
