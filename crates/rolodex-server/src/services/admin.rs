use rolodex_core::{CoreError, DynUserStore, Role, User, UserId, UserLookup, UserUpdate};
use std::sync::Arc;

use super::ServiceResult;
use crate::cache::{AdminActionKind, AuthorizationCache, CacheService};

/// Privileged account management.
///
/// Every mutation follows the same order: authoritative write, cache
/// invalidation, then the audit record. A failed audit write is logged and
/// never fails the action.
#[derive(Clone)]
pub struct AdminService {
    users: DynUserStore,
    cache: Arc<CacheService>,
    authz: AuthorizationCache,
}

impl AdminService {
    pub fn new(users: DynUserStore, cache: Arc<CacheService>) -> Self {
        let authz = AuthorizationCache::new(cache.clone());
        Self {
            users,
            cache,
            authz,
        }
    }

    pub async fn update_role(
        &self,
        actor_id: UserId,
        target_id: UserId,
        role: Role,
        reason: Option<String>,
    ) -> ServiceResult<Option<User>> {
        if actor_id == target_id && role != Role::Admin {
            return Err(CoreError::forbidden("Admins cannot demote themselves").into());
        }

        let Some(updated) = self
            .users
            .update_user(target_id, &UserUpdate::role(role))
            .await?
        else {
            return Ok(None);
        };

        self.cache.invalidate_user(&updated).await;
        self.authz.role_changed(target_id).await;
        tracing::info!(actor_id, target_id, role = %role, "user role changed");

        self.audit(actor_id, AdminActionKind::RoleChanged { role }, target_id, reason)
            .await;
        Ok(Some(updated))
    }

    pub async fn update_status(
        &self,
        actor_id: UserId,
        target_id: UserId,
        active: bool,
        reason: Option<String>,
    ) -> ServiceResult<Option<User>> {
        if actor_id == target_id && !active {
            return Err(CoreError::forbidden("Admins cannot deactivate themselves").into());
        }

        let Some(updated) = self
            .users
            .update_user(target_id, &UserUpdate::active(active))
            .await?
        else {
            return Ok(None);
        };

        self.cache.invalidate_user(&updated).await;
        self.authz.role_changed(target_id).await;
        tracing::info!(actor_id, target_id, active, "user status changed");

        self.audit(
            actor_id,
            AdminActionKind::StatusChanged { active },
            target_id,
            reason,
        )
        .await;
        Ok(Some(updated))
    }

    /// Delete a non-admin account. Returns `false` if it did not exist.
    pub async fn delete_user(
        &self,
        actor_id: UserId,
        target_id: UserId,
        reason: Option<String>,
    ) -> ServiceResult<bool> {
        if actor_id == target_id {
            return Err(CoreError::forbidden("Admins cannot delete themselves").into());
        }

        let Some(target) = self.users.find_user(UserLookup::Id(target_id)).await? else {
            return Ok(false);
        };
        if target.role == Role::Admin {
            return Err(CoreError::forbidden("Cannot delete admin users").into());
        }

        if !self.users.delete_user(target_id).await? {
            return Ok(false);
        }

        self.cache.clear_all_for(&target).await;
        tracing::warn!(actor_id, target_id, username = %target.username, "user deleted");

        self.audit(actor_id, AdminActionKind::UserDeleted, target_id, reason)
            .await;
        Ok(true)
    }

    async fn audit(
        &self,
        actor_id: UserId,
        action: AdminActionKind,
        target_id: UserId,
        detail: Option<String>,
    ) {
        if let Err(e) = self
            .cache
            .cache_admin_action(actor_id, action, Some(target_id), detail)
            .await
        {
            tracing::warn!(actor_id, target_id, error = %e, "admin action not recorded");
        }
    }
}
