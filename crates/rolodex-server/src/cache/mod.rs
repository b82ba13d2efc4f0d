//! Read-through / write-invalidate cache in front of the authoritative store.
//!
//! ## Layers
//!
//! ```text
//! CacheService ─┬─ AuthorizationCache
//!               └─ AdminAuditTrail
//!       │
//! CacheBackend   (timeouts, Connected/Disabled state, never errors)
//!       │
//! CacheStore     RedisStore | LocalStore
//! ```
//!
//! ## Key layout
//!
//! `<namespace>:<entity_kind>:<identifier>`, for example `rolodex:user_id:42`
//! or `rolodex:admin_action:<uuid>`. Audit records are additionally listed
//! in the time-ordered index `rolodex:admin_action_index:recent`.
//!
//! ## Graceful Degradation
//!
//! The cache is never a source of truth. When the backend is unreachable
//! every lookup is a miss and every write is dropped, so callers always fall
//! through to the store and still return correct data.

pub mod audit;
pub mod authz;
pub mod backend;
pub mod codec;
pub mod keys;
pub mod redis_store;
pub mod service;
pub mod store;

pub use audit::{AdminActionKind, AdminActionRecord, AdminAuditTrail, AuditError};
pub use authz::{AuthorizationCache, AuthzDecision, DecisionSource};
pub use backend::{BackendHealth, CacheBackend, HealthState, ReprobePolicy};
pub use codec::{CacheError, CachedContact, UserSnapshot};
pub use keys::{EntityKind, KeyBuilder, make_key};
pub use redis_store::RedisStore;
pub use service::{CachePolicy, CacheService, CacheStatsReport, OutagePolicy, UserIdentity};
pub use store::{
    CacheStore, IndexedEntry, LocalStore, MAX_TTL, StoreError, StoreInfo, WindowCount,
};
