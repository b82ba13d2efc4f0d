//! Typed cache payloads.
//!
//! Each cached entity kind has its own flat struct that is stored as JSON.
//! Dates are ISO-8601 strings. Relationship fields (a contact's owner) are
//! never stored; they are restored from the key on decode.

use rolodex_core::{Contact, ContactId, Role, User, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use time::Date;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Contract violations raised while preparing a cache write. These indicate
/// a defect in the caller, not an operational condition.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("entity cannot be cached: {0}")]
    InvalidEntity(String),

    #[error("failed to encode cache payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cached view of a user account.
///
/// Carries the password hash so credential checks can run against a cache
/// hit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub avatar_url: Option<String>,
    pub hashed_password: String,
}

impl fmt::Debug for UserSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSnapshot")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("is_active", &self.is_active)
            .field("is_verified", &self.is_verified)
            .field("avatar_url", &self.avatar_url)
            .field("hashed_password", &"<redacted>")
            .finish()
    }
}

impl TryFrom<&User> for UserSnapshot {
    type Error = CacheError;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        if user.username.is_empty() {
            return Err(CacheError::InvalidEntity(format!(
                "user {} has no username",
                user.id
            )));
        }
        if user.email.is_empty() {
            return Err(CacheError::InvalidEntity(format!(
                "user {} has no email",
                user.id
            )));
        }
        if user.hashed_password.is_empty() {
            return Err(CacheError::InvalidEntity(format!(
                "user {} has no password hash",
                user.id
            )));
        }

        Ok(Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_active: user.is_active,
            is_verified: user.is_verified,
            avatar_url: user.avatar_url.clone(),
            hashed_password: user.hashed_password.clone(),
        })
    }
}

/// One entry of a cached contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedContact {
    pub id: ContactId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    #[serde(with = "iso_date")]
    pub birthday: Date,
    pub additional_info: Option<String>,
}

impl From<&Contact> for CachedContact {
    fn from(contact: &Contact) -> Self {
        Self {
            id: contact.id,
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            birthday: contact.birthday,
            additional_info: contact.additional_info.clone(),
        }
    }
}

impl CachedContact {
    pub fn into_contact(self, owner: UserId) -> Contact {
        Contact {
            id: self.id,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRole {
    pub role: Role,
}

/// In-flight reset token, keyed by the token itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetTokenEntry {
    pub email: String,
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use time::macros::date;

    fn user() -> User {
        User {
            id: 7,
            username: "alice".into(),
            email: "a@x.com".into(),
            hashed_password: "$2b$12$abcdef".into(),
            full_name: None,
            is_active: true,
            is_verified: true,
            verification_token: None,
            avatar_url: Some("https://cdn.example.com/a.png".into()),
            role: Role::Moderator,
            reset_token: None,
            reset_token_expires: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn snapshot_round_trip_keeps_password_hash() {
        let snapshot = UserSnapshot::try_from(&user()).unwrap();
        let bytes = encode(&snapshot).unwrap();
        let back: UserSnapshot = decode(&bytes).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.hashed_password, "$2b$12$abcdef");
        assert_eq!(back.full_name, None);
    }

    #[test]
    fn snapshot_debug_hides_hash() {
        let snapshot = UserSnapshot::try_from(&user()).unwrap();
        let rendered = format!("{snapshot:?}");
        assert!(!rendered.contains("abcdef"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn user_without_hash_is_rejected() {
        let mut incomplete = user();
        incomplete.hashed_password.clear();
        assert!(matches!(
            UserSnapshot::try_from(&incomplete),
            Err(CacheError::InvalidEntity(_))
        ));
    }

    #[test]
    fn contact_birthday_is_iso_string_and_owner_is_not_stored() {
        let contact = Contact {
            id: 3,
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            email: "ann@example.com".into(),
            phone: "+10000000000".into(),
            birthday: date!(1990 - 05 - 17),
            additional_info: Some("met at conf".into()),
            user_id: 7,
        };

        let bytes = encode(&vec![CachedContact::from(&contact)]).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json[0]["birthday"], "1990-05-17");
        assert!(json[0].get("user_id").is_none());

        let back: Vec<CachedContact> = decode(&bytes).unwrap();
        let restored = back.into_iter().next().unwrap().into_contact(7);
        assert_eq!(restored, contact);
    }

    #[test]
    fn role_payload_shape() {
        let bytes = encode(&CachedRole { role: Role::Admin }).unwrap();
        assert_eq!(bytes, br#"{"role":"admin"}"#);
    }

    #[test]
    fn malformed_payload_fails_to_decode() {
        assert!(decode::<UserSnapshot>(b"{not json").is_err());
        assert!(decode::<UserSnapshot>(br#"{"id":1}"#).is_err());
    }
}
