//! Role gate backed by the role cache.
//!
//! A cached role short-circuits the store lookup. On a miss the role is
//! resolved from the authoritative store and cached for `role_ttl`. Users
//! without a resolvable role (missing or inactive) are never cached, so a
//! later activation takes effect immediately.

use rolodex_core::{Role, UserId, UserStore};
use serde::Serialize;
use std::sync::Arc;

use super::service::CacheService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Cache,
    Store,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Cache => "cache",
            DecisionSource::Store => "store",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthzDecision {
    pub allowed: bool,
    /// Resolved role, `None` for unknown or inactive users.
    pub role: Option<Role>,
    pub source: DecisionSource,
}

#[derive(Debug, Clone)]
pub struct AuthorizationCache {
    cache: Arc<CacheService>,
}

impl AuthorizationCache {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Decision from the cached role alone, `None` on a miss.
    pub async fn cached_decision(&self, user_id: UserId, required: Role) -> Option<bool> {
        self.cache
            .get_user_role_cache(user_id)
            .await
            .map(|role| role.satisfies(required))
    }

    pub async fn authorize(
        &self,
        user_id: UserId,
        required: Role,
        store: &dyn UserStore,
    ) -> rolodex_core::Result<AuthzDecision> {
        let decision = match self.cache.get_user_role_cache(user_id).await {
            Some(role) => AuthzDecision {
                allowed: role.satisfies(required),
                role: Some(role),
                source: DecisionSource::Cache,
            },
            None => {
                let role = store.find_role(user_id).await?;
                if let Some(role) = role
                    && let Err(e) = self.cache.cache_user_role(user_id, role).await
                {
                    tracing::error!(user_id, error = %e, "failed to cache resolved role");
                }
                AuthzDecision {
                    allowed: role.is_some_and(|r| r.satisfies(required)),
                    role,
                    source: DecisionSource::Store,
                }
            }
        };

        crate::metrics::record_authz_decision(decision.source.as_str(), decision.allowed);
        tracing::debug!(
            user_id,
            required = %required,
            allowed = decision.allowed,
            source = decision.source.as_str(),
            "authorization decision"
        );
        Ok(decision)
    }

    /// Forget the cached role after a role or status change.
    pub async fn role_changed(&self, user_id: UserId) -> bool {
        self.cache.invalidate_user_role_cache(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::CacheBackend;
    use crate::cache::keys::KeyBuilder;
    use crate::cache::service::CachePolicy;
    use rolodex_core::UserUpdate;
    use rolodex_db_memory::{InMemoryStore, NewUser};

    fn authz() -> AuthorizationCache {
        AuthorizationCache::new(Arc::new(CacheService::new(
            CacheBackend::local(),
            KeyBuilder::new("authz"),
            CachePolicy::default(),
        )))
    }

    #[tokio::test]
    async fn second_check_is_served_from_cache() {
        let store = InMemoryStore::new();
        let admin = store
            .create_user(NewUser::new("root", "root@x.com", "h").with_role(Role::Admin))
            .unwrap();
        let gate = authz();

        let first = gate.authorize(admin.id, Role::Moderator, &store).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.source, DecisionSource::Store);

        let reads = store.user_reads();
        let second = gate.authorize(admin.id, Role::Admin, &store).await.unwrap();
        assert!(second.allowed);
        assert_eq!(second.source, DecisionSource::Cache);
        assert_eq!(store.user_reads(), reads);
    }

    #[tokio::test]
    async fn demotion_takes_effect_after_invalidation() {
        let store = InMemoryStore::new();
        let user = store
            .create_user(NewUser::new("eve", "eve@x.com", "h").with_role(Role::Admin))
            .unwrap();
        let gate = authz();
        assert!(gate.authorize(user.id, Role::Admin, &store).await.unwrap().allowed);

        store
            .update_user(user.id, &UserUpdate::role(Role::User))
            .await
            .unwrap();
        assert_eq!(gate.cached_decision(user.id, Role::Admin).await, Some(true));

        assert!(gate.role_changed(user.id).await);
        assert_eq!(gate.cached_decision(user.id, Role::Admin).await, None);
        assert!(!gate.authorize(user.id, Role::Admin, &store).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn inactive_users_are_denied_and_not_cached() {
        let store = InMemoryStore::new();
        let user = store
            .create_user(NewUser::new("zed", "zed@x.com", "h"))
            .unwrap();
        store
            .update_user(user.id, &UserUpdate::active(false))
            .await
            .unwrap();
        let gate = authz();

        let decision = gate.authorize(user.id, Role::User, &store).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.role, None);
        assert_eq!(gate.cached_decision(user.id, Role::User).await, None);
    }
}
