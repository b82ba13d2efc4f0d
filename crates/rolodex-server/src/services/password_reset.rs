use rolodex_core::{DynUserStore, UserId, UserLookup};
use std::sync::Arc;
use time::OffsetDateTime;

use super::ServiceResult;
use crate::cache::CacheService;

/// A reset token ready to be delivered to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetTicket {
    pub user_id: UserId,
    pub email: String,
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Internal outcome of a reset request. Clients must receive the same
/// response for every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetRequestOutcome {
    Issued(ResetTicket),
    Throttled,
    UnknownEmail,
}

#[derive(Clone)]
pub struct PasswordResetService {
    users: DynUserStore,
    cache: Arc<CacheService>,
}

impl PasswordResetService {
    pub fn new(users: DynUserStore, cache: Arc<CacheService>) -> Self {
        Self { users, cache }
    }

    pub async fn request_reset(&self, email: &str) -> ServiceResult<ResetRequestOutcome> {
        let max_attempts = self.cache.policy().max_reset_attempts;
        if !self.cache.check_reset_attempts(email, max_attempts).await {
            return Ok(ResetRequestOutcome::Throttled);
        }

        let user = match self.users.find_user(UserLookup::Email(email)).await? {
            Some(user) if user.is_active => user,
            _ => return Ok(ResetRequestOutcome::UnknownEmail),
        };

        let token = generate_token();
        let ttl = self.cache.policy().reset_token_ttl;
        let expires_at = token_expiry(OffsetDateTime::now_utc(), ttl);
        if !self
            .users
            .set_reset_token(user.id, &token, expires_at)
            .await?
        {
            return Ok(ResetRequestOutcome::UnknownEmail);
        }
        self.cache.set_reset_token_cache(&user.email, &token).await?;

        tracing::info!(user_id = user.id, "password reset token issued");
        Ok(ResetRequestOutcome::Issued(ResetTicket {
            user_id: user.id,
            email: user.email,
            token,
            expires_at,
        }))
    }

    /// Replace the password if `token` is the outstanding, unexpired token
    /// for `email`. Returns `false` for any mismatch.
    pub async fn complete_reset(
        &self,
        email: &str,
        token: &str,
        new_password_hash: &str,
    ) -> ServiceResult<bool> {
        if let Some(tracked) = self.cache.reset_token_email(token).await
            && !tracked.eq_ignore_ascii_case(email.trim())
        {
            tracing::debug!("reset token presented for a different address");
            return Ok(false);
        }

        let Some(updated) = self
            .users
            .redeem_reset_token(email, token, new_password_hash)
            .await?
        else {
            return Ok(false);
        };

        self.cache.invalidate_user(&updated).await;
        self.cache.invalidate_reset_token(token, &updated.email).await;

        tracing::info!(user_id = updated.id, "password reset completed");
        Ok(true)
    }
}

/// Saturates instead of overflowing on absurd lifetimes.
fn token_expiry(now: OffsetDateTime, ttl: std::time::Duration) -> OffsetDateTime {
    let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
    now.saturating_add(ttl)
}

/// 256-bit random token, hex encoded.
fn generate_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}
