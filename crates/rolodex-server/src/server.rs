use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};
use rolodex_core::{DynContactStore, DynUserStore};
use tower_http::trace::TraceLayer;

use crate::cache::{AuthorizationCache, CacheService};
use crate::config::{RateLimitConfig, ServerConfig};
use crate::rate_limit::{self, RateLimiter};
use crate::services::{AdminService, ContactService, PasswordResetService, UserService};
use crate::{handlers, middleware as app_middleware};

/// Shared handler state. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub authz: AuthorizationCache,
    pub user_store: DynUserStore,
    pub users: UserService,
    pub contacts: ContactService,
    pub admin: AdminService,
    pub resets: PasswordResetService,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// State with the default rate limits.
    pub fn new(cache: Arc<CacheService>, users: DynUserStore, contacts: DynContactStore) -> Self {
        Self {
            rate_limiter: RateLimiter::new(cache.clone(), RateLimitConfig::default()),
            authz: AuthorizationCache::new(cache.clone()),
            users: UserService::new(users.clone(), cache.clone()),
            contacts: ContactService::new(contacts, cache.clone()),
            admin: AdminService::new(users.clone(), cache.clone()),
            resets: PasswordResetService::new(users.clone(), cache.clone()),
            user_store: users,
            cache,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }
}

pub fn build_app(state: AppState, cfg: &ServerConfig) -> Router {
    let admin = Router::new()
        .route("/admin/actions", get(handlers::admin_actions))
        .route("/admin/users/{id}/role", patch(handlers::update_user_role))
        .route("/admin/users/{id}/status", patch(handlers::update_user_status))
        .route("/admin/users/{id}", delete(handlers::delete_user))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::admin_audit,
        ));

    let mut app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/user", delete(handlers::clear_user_cache))
        .route("/cache/contacts", delete(handlers::clear_contacts_cache))
        .route("/users/me", get(handlers::current_user))
        .route("/contacts", get(handlers::list_contacts))
        .route("/auth/password-reset", post(handlers::request_password_reset))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit,
        ))
        .with_state(state)
        .route_layer(middleware::from_fn(app_middleware::track_metrics));

    if cfg.trust_identity_header {
        app = app.layer(middleware::from_fn(app_middleware::trusted_identity_header));
    }

    // request_id is outermost so the trace span can pick the id up.
    app.layer(
        TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
            let req_id = req
                .extensions()
                .get::<axum::http::HeaderValue>()
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            tracing::info_span!(
                "http.request",
                http.method = %req.method(),
                http.target = %req.uri(),
                request_id = %req_id
            )
        }),
    )
    .layer(middleware::from_fn(app_middleware::request_id))
}

pub struct RolodexServer {
    addr: SocketAddr,
    app: Router,
}

impl RolodexServer {
    pub fn new(addr: SocketAddr, app: Router) -> Self {
        Self { addr, app }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let app = self
            .app
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
