//! Per-caller request rate limiting.
//!
//! Budgets are fixed windows counted through [`CacheBackend::incr_window`],
//! so every instance sharing a Redis backend shares the counters. A request
//! is checked against its route limit (if any) and then against the
//! caller's general budget:
//!
//! - anonymous callers, keyed by peer address: `default_limits`
//! - authenticated callers, keyed by user id: `user_limit`, or
//!   `admin_limit` when the role cache says the caller is an admin
//!
//! [`CacheBackend::incr_window`]: crate::cache::CacheBackend::incr_window

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use rolodex_core::{Role, UserId};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheService, OutagePolicy};
use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::server::AppState;

/// Retry hint sent while limits cannot be evaluated.
const OUTAGE_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Second,
    Minute,
    Hour,
    Day,
}

impl Period {
    pub fn duration(self) -> Duration {
        match self {
            Period::Second => Duration::from_secs(1),
            Period::Minute => Duration::from_secs(60),
            Period::Hour => Duration::from_secs(60 * 60),
            Period::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Period::Second => "second",
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
        }
    }
}

/// `max` requests per `period`, written as `"50/hour"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RateLimit {
    pub max: u32,
    pub period: Period,
}

impl RateLimit {
    pub const fn new(max: u32, period: Period) -> Self {
        Self { max, period }
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max, self.period.as_str())
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .split_once('/')
            .ok_or_else(|| format!("rate limit '{s}' must look like '10/minute'"))?;
        let max = count
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|max| *max > 0)
            .ok_or_else(|| format!("rate limit '{s}' needs a positive count"))?;
        let period = match unit.trim().to_ascii_lowercase().trim_end_matches('s') {
            "second" | "sec" => Period::Second,
            "minute" | "min" => Period::Minute,
            "hour" => Period::Hour,
            "day" => Period::Day,
            other => return Err(format!("unknown rate limit period '{other}'")),
        };
        Ok(Self { max, period })
    }
}

impl TryFrom<String> for RateLimit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RateLimit> for String {
    fn from(limit: RateLimit) -> Self {
        limit.to_string()
    }
}

/// Extra limit for one route, matched on method and route template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    pub method: String,
    /// Route template as registered, e.g. `/admin/users/{id}`
    pub path: String,
    pub limit: RateLimit,
}

impl RouteLimit {
    pub fn new(method: &str, path: &str, limit: RateLimit) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            limit,
        }
    }

    fn matches(&self, method: &str, route: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.path == route
    }
}

/// Who a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User(UserId),
    Peer(String),
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::User(id) => write!(f, "user:{id}"),
            Caller::Peer(addr) => write!(f, "ip:{addr}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited {
        limit: RateLimit,
        retry_after: Duration,
    },
    /// Counters could not be reached and the outage policy denies.
    Unavailable,
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<CacheService>,
    config: Arc<RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheService>, config: RateLimitConfig) -> Self {
        Self {
            cache,
            config: Arc::new(config),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_exempt(&self, route: &str) -> bool {
        self.config.exempt_paths.iter().any(|path| path == route)
    }

    /// Identify the caller: the authenticated user if there is one, else the
    /// peer address. `x-forwarded-for` is only consulted when configured.
    pub fn caller_of(&self, req: &Request<Body>) -> Caller {
        if let Some(user) = req.extensions().get::<AuthenticatedUser>() {
            return Caller::User(user.user_id);
        }

        if self.config.trust_forwarded_for
            && let Some(forwarded) = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        {
            return Caller::Peer(forwarded.to_string());
        }

        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Caller::Peer(peer)
    }

    /// Budgets that apply to one request, route limit first.
    async fn budgets(
        &self,
        caller: &Caller,
        method: &str,
        route: &str,
    ) -> Vec<(String, RateLimit)> {
        let mut budgets: Vec<(String, RateLimit)> = self
            .config
            .routes
            .iter()
            .filter(|route_limit| route_limit.matches(method, route))
            .map(|route_limit| {
                let scope = format!("route:{}:{}", route_limit.method.to_ascii_uppercase(), route);
                (scope, route_limit.limit)
            })
            .collect();

        match caller {
            Caller::User(id) => {
                let limit = match self.cache.get_user_role_cache(*id).await {
                    Some(Role::Admin) => self.config.admin_limit,
                    _ => self.config.user_limit,
                };
                budgets.push(("global".to_string(), limit));
            }
            Caller::Peer(_) => {
                budgets.extend(
                    self.config
                        .default_limits
                        .iter()
                        .map(|limit| ("global".to_string(), *limit)),
                );
            }
        }
        budgets
    }

    /// Count one request and decide whether it may proceed.
    pub async fn check(&self, caller: &Caller, method: &str, route: &str) -> RateDecision {
        if !self.is_enabled() {
            return RateDecision::Allowed;
        }

        for (scope, limit) in self.budgets(caller, method, route).await {
            let window = limit.period.duration();
            let key = self.cache.keys().rate_limit(&scope, caller, window);
            match self.cache.backend().incr_window(&key, window).await {
                Some(count) if count.count > i64::from(limit.max) => {
                    tracing::info!(
                        caller = %caller,
                        route,
                        limit = %limit,
                        "rate limit exceeded"
                    );
                    crate::metrics::record_rate_limited(route);
                    return RateDecision::Limited {
                        limit,
                        retry_after: count.resets_in,
                    };
                }
                Some(_) => {}
                None => {
                    if self.config.on_outage == OutagePolicy::Deny {
                        tracing::debug!(caller = %caller, "rate limits unavailable; denying");
                        return RateDecision::Unavailable;
                    }
                    tracing::debug!(caller = %caller, "rate limits unavailable; allowing");
                    return RateDecision::Allowed;
                }
            }
        }
        RateDecision::Allowed
    }
}

/// Whole seconds to wait, never zero.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Reject requests over budget with `429 Too Many Requests`.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() {
        return next.run(req).await;
    }

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    if limiter.is_exempt(&route) {
        return next.run(req).await;
    }

    let caller = limiter.caller_of(&req);
    match limiter.check(&caller, req.method().as_str(), &route).await {
        RateDecision::Allowed => next.run(req).await,
        RateDecision::Limited { limit, retry_after } => ApiError::TooManyRequests {
            limit: limit.to_string(),
            retry_after_secs: retry_after_secs(retry_after),
        }
        .into_response(),
        RateDecision::Unavailable => ApiError::ServiceUnavailable {
            detail: "Rate limiting temporarily unavailable".into(),
            retry_after_secs: OUTAGE_RETRY_AFTER.as_secs(),
        }
        .into_response(),
    }
}
