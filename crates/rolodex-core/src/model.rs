//! Domain entities owned by the authoritative store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{Date, OffsetDateTime};

use crate::error::CoreError;

pub type UserId = i64;
pub type ContactId = i64;

/// User role.
///
/// Variants are declared in rank order, so the derived `Ord` is the role
/// hierarchy: `User < Moderator < Admin`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Numeric rank within the hierarchy.
    pub fn rank(&self) -> u8 {
        match self {
            Role::User => 0,
            Role::Moderator => 1,
            Role::Admin => 2,
        }
    }

    /// Whether this role meets or exceeds `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

/// A user account as stored in the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub verification_token: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    /// Outstanding password-reset token and its expiry.
    pub reset_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reset_token_expires: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    /// Whether `token` is the outstanding reset token and has not expired.
    pub fn reset_token_matches(&self, token: &str, now: OffsetDateTime) -> bool {
        self.reset_token.as_deref() == Some(token)
            && self.reset_token_expires.is_some_and(|expires| expires > now)
    }
}

/// A contact owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub birthday: Date,
    pub additional_info: Option<String>,
    /// Owning user.
    pub user_id: UserId,
}

/// Fields for creating or replacing a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub birthday: Date,
    #[serde(default)]
    pub additional_info: Option<String>,
}

impl ContactDraft {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(CoreError::invalid_entity("contact name must not be empty"));
        }
        if !self.email.contains('@') {
            return Err(CoreError::invalid_entity("contact email is malformed"));
        }
        if self.phone.trim().is_empty() {
            return Err(CoreError::invalid_entity("contact phone must not be empty"));
        }
        Ok(())
    }

    pub fn into_contact(self, id: ContactId, owner: UserId) -> Contact {
        Contact {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            birthday: self.birthday,
            additional_info: self.additional_info,
            user_id: owner,
        }
    }
}

/// Partial update of a user account. `None` leaves a field untouched;
/// for nullable columns, `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub full_name: Option<Option<String>>,
    pub avatar_url: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
    pub role: Option<Role>,
}

impl UserUpdate {
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Default::default()
        }
    }

    pub fn password(hashed_password: impl Into<String>) -> Self {
        Self {
            hashed_password: Some(hashed_password.into()),
            ..Default::default()
        }
    }

    /// True when the update changes the role or activation status, both of
    /// which feed authorization decisions.
    pub fn affects_authorization(&self) -> bool {
        self.role.is_some() || self.is_active.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, user: &mut User) {
        if let Some(ref username) = self.username {
            user.username = username.clone();
        }
        if let Some(ref email) = self.email {
            user.email = email.clone();
        }
        if let Some(ref hashed_password) = self.hashed_password {
            user.hashed_password = hashed_password.clone();
        }
        if let Some(ref full_name) = self.full_name {
            user.full_name = full_name.clone();
        }
        if let Some(ref avatar_url) = self.avatar_url {
            user.avatar_url = avatar_url.clone();
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(is_verified) = self.is_verified {
            user.is_verified = is_verified;
            if is_verified {
                user.verification_token = None;
            }
        }
        if let Some(role) = self.role {
            user.role = role;
        }
    }
}
