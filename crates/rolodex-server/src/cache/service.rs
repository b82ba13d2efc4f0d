//! Cache orchestration for users, contacts, roles, reset throttling and the
//! audit trail.
//!
//! Every operation degrades to a miss or a no-op when the backend is
//! unavailable. Only contract violations (an entity that cannot be cached)
//! surface as errors.

use rolodex_core::{Contact, Role, User, UserId};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::audit::{
    AdminActionKind, AdminActionRecord, AdminAuditTrail, AuditError, DEFAULT_RETENTION,
    DEFAULT_SCAN_LIMIT,
};
use super::backend::CacheBackend;
use super::codec::{self, CacheError, CachedContact, CachedRole, ResetTokenEntry, UserSnapshot};
use super::keys::{EntityKind, KeyBuilder};
use super::store::StoreInfo;
use crate::config::CacheConfig;

const DISABLED_MESSAGE: &str = "Cache disabled or unavailable";

/// Reset throttling result while the backend cannot count attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutagePolicy {
    /// Let the request through unthrottled.
    #[default]
    Allow,
    /// Refuse every reset request until the backend returns.
    Deny,
}

/// TTLs and limits applied by [`CacheService`].
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub user_ttl: Duration,
    pub contacts_ttl: Duration,
    pub role_ttl: Duration,
    pub reset_window: Duration,
    pub max_reset_attempts: u32,
    pub reset_token_ttl: Duration,
    pub audit_retention: Duration,
    pub audit_scan_limit: usize,
    pub reset_outage: OutagePolicy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            user_ttl: Duration::from_secs(3600),
            contacts_ttl: Duration::from_secs(1800),
            role_ttl: Duration::from_secs(900),
            reset_window: Duration::from_secs(3600),
            max_reset_attempts: 3,
            reset_token_ttl: Duration::from_secs(3600),
            audit_retention: DEFAULT_RETENTION,
            audit_scan_limit: DEFAULT_SCAN_LIMIT,
            reset_outage: OutagePolicy::Allow,
        }
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            user_ttl: Duration::from_secs(cfg.user_ttl_secs),
            contacts_ttl: Duration::from_secs(cfg.contacts_ttl_secs),
            role_ttl: Duration::from_secs(cfg.role_ttl_secs),
            reset_window: Duration::from_secs(cfg.reset_window_secs),
            max_reset_attempts: cfg.max_reset_attempts,
            reset_token_ttl: Duration::from_secs(cfg.reset_token_ttl_secs),
            audit_retention: Duration::from_secs(cfg.audit_retention_secs),
            audit_scan_limit: cfg.audit_scan_limit,
            reset_outage: cfg.reset_throttle_on_outage,
        }
    }
}

/// The three values a user is indexed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

impl From<&User> for UserIdentity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

impl From<&UserSnapshot> for UserIdentity {
    fn from(snapshot: &UserSnapshot) -> Self {
        Self {
            id: snapshot.id,
            username: snapshot.username.clone(),
            email: snapshot.email.clone(),
        }
    }
}

impl From<&UserIdentity> for UserIdentity {
    fn from(identity: &UserIdentity) -> Self {
        identity.clone()
    }
}

/// Operational view returned by [`CacheService::get_cache_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsReport {
    pub enabled: bool,
    #[serde(flatten)]
    pub stats: Option<StoreInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheStatsReport {
    fn unavailable(message: &str) -> Self {
        Self {
            enabled: false,
            stats: None,
            error: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheService {
    backend: CacheBackend,
    keys: KeyBuilder,
    policy: CachePolicy,
    audit: AdminAuditTrail,
}

impl CacheService {
    pub fn new(backend: CacheBackend, keys: KeyBuilder, policy: CachePolicy) -> Self {
        let audit = AdminAuditTrail::new(
            backend.clone(),
            keys.clone(),
            policy.audit_retention,
            policy.audit_scan_limit,
        );
        Self {
            backend,
            keys,
            policy,
            audit,
        }
    }

    pub fn from_config(backend: CacheBackend, cfg: &CacheConfig) -> Self {
        Self::new(
            backend,
            KeyBuilder::new(&cfg.namespace_prefix),
            CachePolicy::from(cfg),
        )
    }

    pub fn backend(&self) -> &CacheBackend {
        &self.backend
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn audit(&self) -> &AdminAuditTrail {
        &self.audit
    }

    /// Read and decode one entry. Undecodable payloads count as a miss and
    /// are removed. For identity keys the next read-through rewrites the
    /// whole triple from the store.
    async fn read<T: DeserializeOwned>(&self, key: &str, kind: &'static str) -> Option<T> {
        let Some(bytes) = self.backend.get(key).await else {
            crate::metrics::record_cache_miss(kind);
            tracing::debug!(key = %key, "cache miss");
            return None;
        };

        match codec::decode(&bytes) {
            Ok(value) => {
                crate::metrics::record_cache_hit(kind);
                tracing::debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                crate::metrics::record_cache_miss(kind);
                tracing::warn!(key = %key, error = %e, "Discarding malformed cache entry");
                self.backend.delete(&[key.to_string()]).await;
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    /// Cache `user` under its id, username and email with the default TTL.
    ///
    /// Returns `Ok(false)` when the batch was not written; none of the three
    /// keys should then be assumed present.
    pub async fn set_user(&self, user: &User) -> Result<bool, CacheError> {
        self.set_user_with_ttl(user, self.policy.user_ttl).await
    }

    pub async fn set_user_with_ttl(&self, user: &User, ttl: Duration) -> Result<bool, CacheError> {
        let snapshot = UserSnapshot::try_from(user)?;
        let data = codec::encode(&snapshot)?;
        let keys = self
            .keys
            .user_keys(snapshot.id, &snapshot.username, &snapshot.email);

        let entries = vec![
            (keys.by_id, data.clone()),
            (keys.by_username, data.clone()),
            (keys.by_email, data),
        ];
        let written = self.backend.set_batch(&entries, ttl).await;
        if written {
            tracing::debug!(user_id = snapshot.id, "user cached");
        }
        Ok(written)
    }

    pub async fn get_user_by_id(&self, id: UserId) -> Option<UserSnapshot> {
        let key = self.keys.key(EntityKind::UserById, id);
        self.read(&key, "user").await
    }

    pub async fn get_user_by_username(&self, username: &str) -> Option<UserSnapshot> {
        let key = self.keys.key(EntityKind::UserByUsername, username);
        self.read(&key, "user").await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Option<UserSnapshot> {
        let key = self.keys.key(EntityKind::UserByEmail, email);
        self.read(&key, "user").await
    }

    /// Drop all three identity keys in one batch. Call after every
    /// authoritative change to the user row.
    pub async fn invalidate_user(&self, user: impl Into<UserIdentity>) -> bool {
        let identity = user.into();
        let keys = self
            .keys
            .user_keys(identity.id, &identity.username, &identity.email)
            .to_vec();
        let removed = self.backend.delete(&keys).await;
        tracing::debug!(user_id = identity.id, removed = ?removed, "user cache invalidated");
        removed.is_some()
    }

    // ---------------------------------------------------------------------
    // Contacts
    // ---------------------------------------------------------------------

    /// Cache the complete contact list of `owner`. Every contact must belong
    /// to `owner`.
    pub async fn set_contacts(&self, owner: UserId, contacts: &[Contact]) -> Result<bool, CacheError> {
        if let Some(foreign) = contacts.iter().find(|c| c.user_id != owner) {
            return Err(CacheError::InvalidEntity(format!(
                "contact {} belongs to user {}, not {owner}",
                foreign.id, foreign.user_id
            )));
        }
        let cached: Vec<CachedContact> = contacts.iter().map(CachedContact::from).collect();
        let data = codec::encode(&cached)?;
        Ok(self
            .backend
            .set(&self.keys.contacts(owner), data, self.policy.contacts_ttl)
            .await)
    }

    pub async fn get_contacts(&self, owner: UserId) -> Option<Vec<Contact>> {
        let cached: Vec<CachedContact> = self.read(&self.keys.contacts(owner), "contacts").await?;
        Some(
            cached
                .into_iter()
                .map(|contact| contact.into_contact(owner))
                .collect(),
        )
    }

    pub async fn invalidate_contacts(&self, owner: UserId) -> bool {
        self.backend
            .delete(&[self.keys.contacts(owner)])
            .await
            .is_some()
    }

    // ---------------------------------------------------------------------
    // Whole-account invalidation
    // ---------------------------------------------------------------------

    /// Clear identity keys, contacts and role for a user whose row is known.
    pub async fn clear_all_for(&self, user: impl Into<UserIdentity>) -> bool {
        let identity = user.into();
        let mut keys = self
            .keys
            .user_keys(identity.id, &identity.username, &identity.email)
            .to_vec();
        keys.push(self.keys.contacts(identity.id));
        keys.push(self.keys.role(identity.id));
        self.backend.delete(&keys).await.is_some()
    }

    /// Clear everything cached for `user_id`. Username and email keys are
    /// found through the cached snapshot. Without one only the id-scoped
    /// keys can be derived here; `UserService::clear_cached` falls back to
    /// the store row for the rest.
    pub async fn clear_all_for_user(&self, user_id: UserId) -> bool {
        match self.get_user_by_id(user_id).await {
            Some(snapshot) => self.clear_all_for(&snapshot).await,
            None => {
                let keys = [
                    self.keys.key(EntityKind::UserById, user_id),
                    self.keys.contacts(user_id),
                    self.keys.role(user_id),
                ];
                self.backend.delete(&keys).await.is_some()
            }
        }
    }

    // ---------------------------------------------------------------------
    // Password reset
    // ---------------------------------------------------------------------

    /// Count one reset request for `email` and report whether it is within
    /// `max_attempts` for the current window.
    pub async fn check_reset_attempts(&self, email: &str, max_attempts: u32) -> bool {
        let key = self.keys.reset_attempts(email);
        match self
            .backend
            .incr_window(&key, self.policy.reset_window)
            .await
        {
            Some(window) => {
                let count = window.count;
                let allowed = count <= i64::from(max_attempts);
                if !allowed {
                    tracing::info!(attempts = count, max_attempts, "password reset throttled");
                }
                allowed
            }
            None => {
                let allowed = self.policy.reset_outage == OutagePolicy::Allow;
                tracing::debug!(allowed, "reset throttle unavailable; applying outage policy");
                allowed
            }
        }
    }

    pub async fn set_reset_token_cache(&self, email: &str, token: &str) -> Result<bool, CacheError> {
        let data = codec::encode(&ResetTokenEntry {
            email: email.to_string(),
        })?;
        Ok(self
            .backend
            .set(&self.keys.reset_token(token), data, self.policy.reset_token_ttl)
            .await)
    }

    /// Email the reset token was issued for, if it is still tracked.
    pub async fn reset_token_email(&self, token: &str) -> Option<String> {
        let entry: ResetTokenEntry = self
            .read(&self.keys.reset_token(token), "reset_token")
            .await?;
        Some(entry.email)
    }

    /// Drop the token and the attempt counter together.
    pub async fn invalidate_reset_token(&self, token: &str, email: &str) -> bool {
        let keys = [self.keys.reset_token(token), self.keys.reset_attempts(email)];
        self.backend.delete(&keys).await.is_some()
    }

    // ---------------------------------------------------------------------
    // Roles
    // ---------------------------------------------------------------------

    pub async fn cache_user_role(&self, user_id: UserId, role: Role) -> Result<bool, CacheError> {
        let data = codec::encode(&CachedRole { role })?;
        Ok(self
            .backend
            .set(&self.keys.role(user_id), data, self.policy.role_ttl)
            .await)
    }

    pub async fn get_user_role_cache(&self, user_id: UserId) -> Option<Role> {
        let cached: CachedRole = self.read(&self.keys.role(user_id), "role").await?;
        Some(cached.role)
    }

    pub async fn invalidate_user_role_cache(&self, user_id: UserId) -> bool {
        self.backend
            .delete(&[self.keys.role(user_id)])
            .await
            .is_some()
    }

    // ---------------------------------------------------------------------
    // Audit
    // ---------------------------------------------------------------------

    /// Append an audit record. The result is for monitoring; callers log a
    /// failure and carry on.
    pub async fn cache_admin_action(
        &self,
        actor_id: UserId,
        action: AdminActionKind,
        target_id: Option<UserId>,
        detail: Option<String>,
    ) -> Result<AdminActionRecord, AuditError> {
        let record = AdminActionRecord::new(actor_id, action, target_id, detail);
        let result = self.audit.append(&record).await;
        crate::metrics::record_audit_write(result.is_ok());
        result.map(|()| record)
    }

    pub async fn recent_admin_actions(&self, limit: usize) -> Vec<AdminActionRecord> {
        self.audit.recent(limit).await
    }

    // ---------------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------------

    pub async fn get_cache_stats(&self) -> CacheStatsReport {
        if !self.backend.is_enabled() {
            return CacheStatsReport::unavailable(DISABLED_MESSAGE);
        }
        match self.backend.info().await {
            Some(info) => CacheStatsReport {
                enabled: true,
                stats: Some(info),
                error: None,
            },
            None => CacheStatsReport::unavailable("Failed to read cache statistics"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{DEFAULT_OP_TIMEOUT, ReprobePolicy};
    use crate::cache::store::LocalStore;
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn service() -> (CacheService, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::new());
        let backend = CacheBackend::new(store.clone(), DEFAULT_OP_TIMEOUT, ReprobePolicy::Never);
        (
            CacheService::new(backend, KeyBuilder::new("t"), CachePolicy::default()),
            store,
        )
    }

    fn user(id: UserId, username: &str) -> User {
        User {
            id,
            username: username.into(),
            email: format!("{username}@x.com"),
            hashed_password: "hash".into(),
            full_name: None,
            is_active: true,
            is_verified: false,
            verification_token: None,
            avatar_url: None,
            role: Role::User,
            reset_token: None,
            reset_token_expires: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn set_user_writes_three_keys() {
        let (cache, store) = service();
        assert!(cache.set_user(&user(1, "bob")).await.unwrap());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn clear_all_for_user_uses_cached_identity() {
        let (cache, store) = service();
        let bob = user(1, "bob");
        cache.set_user(&bob).await.unwrap();
        cache.set_contacts(1, &[]).await.unwrap();
        cache.cache_user_role(1, Role::Moderator).await.unwrap();
        assert_eq!(store.len(), 5);

        assert!(cache.clear_all_for_user(1).await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn foreign_contacts_are_rejected() {
        let (cache, _) = service();
        let contact = Contact {
            id: 1,
            first_name: "A".into(),
            last_name: "B".into(),
            email: "a@b.c".into(),
            phone: "1".into(),
            birthday: time::macros::date!(2000 - 01 - 01),
            additional_info: None,
            user_id: 2,
        };
        assert!(matches!(
            cache.set_contacts(1, &[contact]).await,
            Err(CacheError::InvalidEntity(_))
        ));
    }

    #[tokio::test]
    async fn stats_shape() {
        let (cache, _) = service();
        let json = serde_json::to_value(cache.get_cache_stats().await).unwrap();
        assert_eq!(json["enabled"], true);
        assert_eq!(json["backend"], "local");
        assert!(json.get("error").is_none());

        let off = CacheService::new(CacheBackend::off(), KeyBuilder::default(), CachePolicy::default());
        let json = serde_json::to_value(off.get_cache_stats().await).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"enabled": false, "error": "Cache disabled or unavailable"})
        );
    }

    #[tokio::test]
    async fn outage_policy_decides_throttle() {
        let deny = CachePolicy {
            reset_outage: OutagePolicy::Deny,
            ..Default::default()
        };
        let closed = CacheService::new(CacheBackend::off(), KeyBuilder::default(), deny);
        assert!(!closed.check_reset_attempts("a@x.com", 3).await);

        let open = CacheService::new(CacheBackend::off(), KeyBuilder::default(), CachePolicy::default());
        assert!(open.check_reset_attempts("a@x.com", 3).await);
    }
}
