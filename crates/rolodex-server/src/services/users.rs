use rolodex_core::{CoreError, DynUserStore, User, UserId, UserLookup, UserUpdate};
use std::sync::Arc;

use super::ServiceResult;
use crate::cache::{CacheService, UserIdentity, UserSnapshot};

/// Read-through access to user accounts.
#[derive(Clone)]
pub struct UserService {
    store: DynUserStore,
    cache: Arc<CacheService>,
}

impl UserService {
    pub fn new(store: DynUserStore, cache: Arc<CacheService>) -> Self {
        Self { store, cache }
    }

    pub async fn find_by_id(&self, id: UserId) -> ServiceResult<Option<UserSnapshot>> {
        if let Some(hit) = self.cache.get_user_by_id(id).await {
            return Ok(Some(hit));
        }
        self.load(UserLookup::Id(id)).await
    }

    pub async fn find_by_username(&self, username: &str) -> ServiceResult<Option<UserSnapshot>> {
        if let Some(hit) = self.cache.get_user_by_username(username).await {
            return Ok(Some(hit));
        }
        self.load(UserLookup::Username(username)).await
    }

    pub async fn find_by_email(&self, email: &str) -> ServiceResult<Option<UserSnapshot>> {
        if let Some(hit) = self.cache.get_user_by_email(email).await {
            return Ok(Some(hit));
        }
        self.load(UserLookup::Email(email)).await
    }

    async fn load(&self, lookup: UserLookup<'_>) -> ServiceResult<Option<UserSnapshot>> {
        let Some(user) = self.store.find_user(lookup).await? else {
            tracing::debug!(%lookup, "user not found in store");
            return Ok(None);
        };
        self.cache.set_user(&user).await?;
        Ok(Some(UserSnapshot::try_from(&user)?))
    }

    /// Clear everything cached for `id`. The username and email keys come
    /// from the cached snapshot or, when that is missing or unreadable, from
    /// the store row.
    pub async fn clear_cached(&self, id: UserId) -> ServiceResult<bool> {
        if let Some(snapshot) = self.cache.get_user_by_id(id).await {
            return Ok(self.cache.clear_all_for(&snapshot).await);
        }
        let cleared = match self.store.find_user(UserLookup::Id(id)).await? {
            Some(user) => self.cache.clear_all_for(&user).await,
            None => self.cache.clear_all_for_user(id).await,
        };
        Ok(cleared)
    }

    /// Apply `update` and invalidate every key the user was or is now
    /// reachable under.
    pub async fn update(&self, id: UserId, update: &UserUpdate) -> ServiceResult<User> {
        let before = self
            .store
            .find_user(UserLookup::Id(id))
            .await?
            .ok_or_else(|| CoreError::not_found("User", id))?;
        let after = self
            .store
            .update_user(id, update)
            .await?
            .ok_or_else(|| CoreError::not_found("User", id))?;

        let old_identity = UserIdentity::from(&before);
        let new_identity = UserIdentity::from(&after);
        self.cache.invalidate_user(&old_identity).await;
        if new_identity != old_identity {
            self.cache.invalidate_user(&new_identity).await;
        }
        if update.affects_authorization() {
            self.cache.invalidate_user_role_cache(id).await;
        }

        tracing::info!(user_id = id, "user updated");
        Ok(after)
    }
}
