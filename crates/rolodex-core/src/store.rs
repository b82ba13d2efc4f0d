//! Authoritative store contracts.
//!
//! The relational store is the single source of truth. The cache layer only
//! mirrors what these traits return and reacts to completed writes; it never
//! writes authoritative data itself.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::Result;
use crate::model::{Contact, ContactDraft, ContactId, Role, User, UserId, UserUpdate};

/// How a user is looked up. Each variant corresponds to one of the three
/// identity keys the cache indexes a user under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLookup<'a> {
    Id(UserId),
    Username(&'a str),
    Email(&'a str),
}

impl fmt::Display for UserLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserLookup::Id(id) => write!(f, "id={id}"),
            UserLookup::Username(username) => write!(f, "username={username}"),
            UserLookup::Email(email) => write!(f, "email={email}"),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>>;

    /// Apply a partial update and return the post-mutation row.
    async fn update_user(&self, id: UserId, update: &UserUpdate) -> Result<Option<User>>;

    async fn delete_user(&self, id: UserId) -> Result<bool>;

    /// Record an outstanding password-reset token, replacing any previous one.
    async fn set_reset_token(
        &self,
        id: UserId,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool>;

    /// The user holding `token`, if it has not expired.
    async fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>>;

    /// Redeem `token` for the account registered under `email`.
    ///
    /// Lookup, password replacement and token removal happen as one step:
    /// of several concurrent redemptions of the same token at most one gets
    /// the updated row back, every other caller gets `None`.
    async fn redeem_reset_token(
        &self,
        email: &str,
        token: &str,
        new_password_hash: &str,
    ) -> Result<Option<User>>;

    /// Resolve the current role of an active user.
    ///
    /// Inactive accounts resolve to `None` so they never satisfy a role gate.
    async fn find_role(&self, id: UserId) -> Result<Option<Role>> {
        Ok(self
            .find_user(UserLookup::Id(id))
            .await?
            .filter(|user| user.is_active)
            .map(|user| user.role))
    }
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Every contact owned by `owner`, ordered by id.
    async fn list_contacts(&self, owner: UserId) -> Result<Vec<Contact>>;

    async fn list_contacts_page(
        &self,
        owner: UserId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Contact>>;

    async fn create_contact(&self, owner: UserId, draft: &ContactDraft) -> Result<Contact>;

    async fn update_contact(
        &self,
        owner: UserId,
        id: ContactId,
        draft: &ContactDraft,
    ) -> Result<Option<Contact>>;

    async fn delete_contact(&self, owner: UserId, id: ContactId) -> Result<bool>;
}

pub type DynUserStore = Arc<dyn UserStore>;
pub type DynContactStore = Arc<dyn ContactStore>;
