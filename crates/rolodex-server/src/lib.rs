pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod rate_limit;
pub mod server;
pub mod services;

use std::sync::Arc;

pub use cache::{CacheBackend, CacheService};
pub use config::{AppConfig, BootstrapConfig, CacheConfig, RateLimitConfig, ServerConfig};
pub use error::ApiError;
pub use middleware::AuthenticatedUser;
pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level};
pub use rate_limit::{RateLimit, RateLimiter};
pub use server::{AppState, RolodexServer, build_app};

use cache::{LocalStore, RedisStore};
use rolodex_core::{Role, UserLookup, UserStore};
use rolodex_db_memory::{InMemoryStore, NewUser};

/// Create a cache backend based on configuration.
///
/// ## Cache Modes
///
/// - **Disabled**: no store; every cache call is a no-op
/// - **No `backend_url`**: in-process store, single instance only
/// - **`backend_url` set**: Redis
///
/// ## Graceful Degradation
///
/// If Redis cannot be reached at startup the backend starts `Disabled` and
/// the server runs without caching. With `reprobe = "on_ping"` a later
/// successful health check turns caching back on.
pub async fn create_cache_backend(config: &CacheConfig) -> CacheBackend {
    if !config.enabled {
        tracing::info!("Cache disabled by configuration");
        return CacheBackend::off();
    }

    let Some(url) = config.backend_url.as_deref() else {
        tracing::info!("No cache backend URL, using in-process cache");
        return CacheBackend::new(
            Arc::new(LocalStore::new()),
            config.op_timeout(),
            config.reprobe,
        );
    };

    tracing::info!("Connecting to Redis cache backend");
    let store = match RedisStore::connect(url, config.pool_size, config.connect_timeout()) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool. Caching disabled.");
            return CacheBackend::off();
        }
    };

    let backend = CacheBackend::new(Arc::new(store), config.op_timeout(), config.reprobe);
    if backend.initialize().await {
        tracing::info!("Connected to Redis cache backend");
    }
    backend
}

/// Build the full application state over an in-memory store.
pub async fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let backend = create_cache_backend(&cfg.cache).await;
    let cache = Arc::new(CacheService::from_config(backend, &cfg.cache));

    let store = InMemoryStore::shared();
    bootstrap_admin(&store, &cfg.bootstrap).await?;

    let limiter = RateLimiter::new(cache.clone(), cfg.rate_limit.clone());
    Ok(AppState::new(cache, store.clone(), store).with_rate_limiter(limiter))
}

/// Create the configured admin account unless the username already exists.
pub async fn bootstrap_admin(store: &InMemoryStore, cfg: &BootstrapConfig) -> anyhow::Result<()> {
    let (Some(username), Some(email), Some(hash)) = (
        cfg.admin_username.as_deref(),
        cfg.admin_email.as_deref(),
        cfg.admin_password_hash.as_deref(),
    ) else {
        return Ok(());
    };

    if store.find_user(UserLookup::Username(username)).await?.is_some() {
        tracing::debug!(username, "bootstrap admin already exists");
        return Ok(());
    }

    let admin = store.create_user(NewUser::new(username, email, hash).with_role(Role::Admin))?;
    tracing::info!(user_id = admin.id, username, "bootstrap admin created");
    Ok(())
}
