//! Cache key layout: `<namespace>:<entity_kind>:<identifier>`.

use rolodex_core::UserId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "rolodex";

/// Every kind of entry the cache holds. The kind is always part of the key,
/// so keys of different kinds cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    UserById,
    UserByUsername,
    UserByEmail,
    UserContacts,
    UserRole,
    ResetAttempts,
    ResetToken,
    AdminAction,
    AdminActionIndex,
    RateLimit,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::UserById => "user_id",
            EntityKind::UserByUsername => "user_username",
            EntityKind::UserByEmail => "user_email",
            EntityKind::UserContacts => "user_contacts",
            EntityKind::UserRole => "user_role",
            EntityKind::ResetAttempts => "reset_attempts",
            EntityKind::ResetToken => "reset_token",
            EntityKind::AdminAction => "admin_action",
            EntityKind::AdminActionIndex => "admin_action_index",
            EntityKind::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn make_key(namespace: &str, kind: EntityKind, id: impl fmt::Display) -> String {
    format!("{namespace}:{}:{id}", kind.as_str())
}

/// The three identity keys of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKeys {
    pub by_id: String,
    pub by_username: String,
    pub by_email: String,
}

impl UserKeys {
    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.by_id.clone(),
            self.by_username.clone(),
            self.by_email.clone(),
        ]
    }
}

/// Key factory bound to one namespace.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: Arc<str>,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyBuilder {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: Arc::from(namespace),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, kind: EntityKind, id: impl fmt::Display) -> String {
        make_key(&self.namespace, kind, id)
    }

    pub fn user_keys(&self, id: UserId, username: &str, email: &str) -> UserKeys {
        UserKeys {
            by_id: self.key(EntityKind::UserById, id),
            by_username: self.key(EntityKind::UserByUsername, username),
            by_email: self.key(EntityKind::UserByEmail, email),
        }
    }

    pub fn contacts(&self, owner: UserId) -> String {
        self.key(EntityKind::UserContacts, owner)
    }

    pub fn role(&self, id: UserId) -> String {
        self.key(EntityKind::UserRole, id)
    }

    /// Reset keys are per mailbox, so the address is normalized first.
    pub fn reset_attempts(&self, email: &str) -> String {
        self.key(EntityKind::ResetAttempts, normalize_email(email))
    }

    pub fn reset_token(&self, token: &str) -> String {
        self.key(EntityKind::ResetToken, token)
    }

    pub fn admin_action(&self, event_id: impl fmt::Display) -> String {
        self.key(EntityKind::AdminAction, event_id)
    }

    /// Time-ordered index over every retained admin action.
    pub fn admin_action_index(&self) -> String {
        self.key(EntityKind::AdminActionIndex, "recent")
    }

    /// Request counter for one caller under one limit. The window length is
    /// part of the key so budgets sharing a scope never share a counter.
    pub fn rate_limit(
        &self,
        scope: &str,
        caller: &impl fmt::Display,
        window: Duration,
    ) -> String {
        self.key(
            EntityKind::RateLimit,
            format!("{scope}:{caller}:{}", window.as_secs()),
        )
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
