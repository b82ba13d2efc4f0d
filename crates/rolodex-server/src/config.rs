use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::cache::{MAX_TTL, OutagePolicy, ReprobePolicy};
use crate::rate_limit::{Period, RateLimit, RouteLimit};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Cache backend and TTL policy
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per-caller request budgets
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Initial admin account
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.cache.validate()?;
        self.rate_limit.validate()?;
        self.bootstrap.validate()
    }

    pub fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("invalid server address: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Accept the caller identity from the `x-user-id` header set by an
    /// upstream gateway. Only enable behind a proxy that strips it from
    /// client traffic.
    #[serde(default)]
    pub trust_identity_header: bool,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_identity_header: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Request rate limiting.
///
/// Counters live in the cache backend, so limits are shared between
/// instances when Redis is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Budgets for anonymous callers, all enforced together
    pub default_limits: Vec<RateLimit>,

    /// Budget for authenticated callers
    pub user_limit: RateLimit,

    /// Budget for callers whose cached role is admin
    pub admin_limit: RateLimit,

    /// Additional limits for individual routes
    pub routes: Vec<RouteLimit>,

    /// Route templates that are never limited
    pub exempt_paths: Vec<String>,

    /// Take the client address from `x-forwarded-for`. Only enable behind a
    /// proxy that sets it.
    pub trust_forwarded_for: bool,

    /// Decision while the counters cannot be reached
    pub on_outage: OutagePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limits: vec![
                RateLimit::new(200, Period::Day),
                RateLimit::new(50, Period::Hour),
            ],
            user_limit: RateLimit::new(100, Period::Hour),
            admin_limit: RateLimit::new(500, Period::Hour),
            routes: vec![
                RouteLimit::new("GET", "/users/me", RateLimit::new(10, Period::Minute)),
                RouteLimit::new(
                    "POST",
                    "/auth/password-reset",
                    RateLimit::new(10, Period::Minute),
                ),
                RouteLimit::new("GET", "/admin/actions", RateLimit::new(10, Period::Minute)),
                RouteLimit::new(
                    "PATCH",
                    "/admin/users/{id}/role",
                    RateLimit::new(5, Period::Minute),
                ),
                RouteLimit::new(
                    "PATCH",
                    "/admin/users/{id}/status",
                    RateLimit::new(5, Period::Minute),
                ),
                RouteLimit::new(
                    "DELETE",
                    "/admin/users/{id}",
                    RateLimit::new(3, Period::Minute),
                ),
            ],
            exempt_paths: vec!["/healthz".into(), "/metrics".into()],
            trust_forwarded_for: false,
            on_outage: OutagePolicy::Allow,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), String> {
        for route in &self.routes {
            if route.method.trim().is_empty() {
                return Err("rate_limit.routes entries need a method".into());
            }
            if !route.path.starts_with('/') {
                return Err(format!(
                    "rate_limit.routes path '{}' must start with '/'",
                    route.path
                ));
            }
        }
        Ok(())
    }
}

/// Admin account created at startup when the store has none under that
/// username. All three fields must be set together.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub admin_username: Option<String>,
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default)]
    pub admin_password_hash: Option<String>,
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<(), String> {
        let set = [
            self.admin_username.is_some(),
            self.admin_email.is_some(),
            self.admin_password_hash.is_some(),
        ];
        if set.iter().any(|s| *s) && !set.iter().all(|s| *s) {
            return Err(
                "bootstrap.admin_username, admin_email and admin_password_hash must be set together"
                    .into(),
            );
        }
        Ok(())
    }
}

/// Cache configuration.
///
/// With `enabled = false` no store is created and every cache call is a
/// no-op. With no `backend_url` an in-process store is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled", alias = "cache_enabled")]
    pub enabled: bool,

    /// Redis URL, e.g. `redis://localhost:6379/0`
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Leading segment of every key
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for a single cache round trip
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    #[serde(default = "default_user_ttl_secs")]
    pub user_ttl_secs: u64,
    #[serde(default = "default_contacts_ttl_secs")]
    pub contacts_ttl_secs: u64,
    #[serde(default = "default_role_ttl_secs")]
    pub role_ttl_secs: u64,

    /// Password-reset throttle window and budget
    #[serde(default = "default_reset_window_secs")]
    pub reset_window_secs: u64,
    #[serde(default = "default_max_reset_attempts")]
    pub max_reset_attempts: u32,
    #[serde(default = "default_reset_token_ttl_secs")]
    pub reset_token_ttl_secs: u64,

    #[serde(default = "default_audit_retention_secs")]
    pub audit_retention_secs: u64,
    /// Maximum number of audit keys examined per retrieval
    #[serde(default = "default_audit_scan_limit")]
    pub audit_scan_limit: usize,

    #[serde(default)]
    pub reprobe: ReprobePolicy,

    /// Reset throttling result while the backend is unreachable
    #[serde(default)]
    pub reset_throttle_on_outage: OutagePolicy,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_namespace_prefix() -> String {
    crate::cache::keys::DEFAULT_NAMESPACE.to_string()
}
fn default_pool_size() -> usize {
    10
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_op_timeout_ms() -> u64 {
    2000
}
fn default_user_ttl_secs() -> u64 {
    3600
}
fn default_contacts_ttl_secs() -> u64 {
    1800
}
fn default_role_ttl_secs() -> u64 {
    900
}
fn default_reset_window_secs() -> u64 {
    3600
}
fn default_max_reset_attempts() -> u32 {
    3
}
fn default_reset_token_ttl_secs() -> u64 {
    3600
}
fn default_audit_retention_secs() -> u64 {
    30 * 24 * 60 * 60
}
fn default_audit_scan_limit() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            backend_url: None,
            namespace_prefix: default_namespace_prefix(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            user_ttl_secs: default_user_ttl_secs(),
            contacts_ttl_secs: default_contacts_ttl_secs(),
            role_ttl_secs: default_role_ttl_secs(),
            reset_window_secs: default_reset_window_secs(),
            max_reset_attempts: default_max_reset_attempts(),
            reset_token_ttl_secs: default_reset_token_ttl_secs(),
            audit_retention_secs: default_audit_retention_secs(),
            audit_scan_limit: default_audit_scan_limit(),
            reprobe: ReprobePolicy::default(),
            reset_throttle_on_outage: OutagePolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        let ns = self.namespace_prefix.as_str();
        if ns.is_empty() {
            return Err("cache.namespace_prefix must not be empty".into());
        }
        if ns.contains(char::is_whitespace) || ns.contains(':') {
            return Err("cache.namespace_prefix must not contain whitespace or ':'".into());
        }
        if self.pool_size == 0 {
            return Err("cache.pool_size must be > 0".into());
        }
        if self.connect_timeout_ms == 0 || self.op_timeout_ms == 0 {
            return Err("cache timeouts must be > 0".into());
        }
        if self.user_ttl_secs == 0
            || self.contacts_ttl_secs == 0
            || self.role_ttl_secs == 0
            || self.reset_token_ttl_secs == 0
            || self.audit_retention_secs == 0
        {
            return Err("cache TTLs must be > 0".into());
        }
        if self.reset_window_secs == 0 || self.max_reset_attempts == 0 {
            return Err("cache.reset_window_secs and cache.max_reset_attempts must be > 0".into());
        }
        let max_ttl = MAX_TTL.as_secs();
        for (name, secs) in [
            ("user_ttl_secs", self.user_ttl_secs),
            ("contacts_ttl_secs", self.contacts_ttl_secs),
            ("role_ttl_secs", self.role_ttl_secs),
            ("reset_window_secs", self.reset_window_secs),
            ("reset_token_ttl_secs", self.reset_token_ttl_secs),
            ("audit_retention_secs", self.audit_retention_secs),
        ] {
            if secs > max_ttl {
                return Err(format!("cache.{name} must be at most {max_ttl} seconds"));
            }
        }
        if self.audit_scan_limit == 0 {
            return Err("cache.audit_scan_limit must be > 0".into());
        }
        if let Some(url) = self.backend_url.as_deref()
            && !(url.starts_with("redis://") || url.starts_with("rediss://"))
        {
            return Err("cache.backend_url must be a redis:// or rediss:// URL".into());
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "rolodex.toml";

    /// Load configuration from an optional TOML file, then apply
    /// environment overrides such as `ROLODEX__CACHE__BACKEND_URL`.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", file.display()));
        }

        builder = builder.add_source(
            Environment::with_prefix("ROLODEX")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
