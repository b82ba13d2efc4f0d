//! In-memory authoritative store for Rolodex.
//!
//! Implements the `UserStore` and `ContactStore` traits from `rolodex-core`
//! on top of `DashMap`. Mutations are serialized through a single writer lock
//! so uniqueness checks on username and email are race-free.
//!
//! Every read is counted, which lets tests observe whether a lookup was
//! served by the cache or fell through to the store.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rolodex_core::{
    Contact, ContactDraft, ContactId, ContactStore, CoreError, Result, Role, User, UserId,
    UserLookup, UserStore, UserUpdate,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use time::OffsetDateTime;

/// Fields required to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub role: Role,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        hashed_password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            hashed_password: hashed_password.into(),
            full_name: None,
            role: Role::User,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }
}

#[derive(Debug)]
pub struct InMemoryStore {
    users: DashMap<UserId, User>,
    contacts: DashMap<ContactId, Contact>,
    next_user_id: AtomicI64,
    next_contact_id: AtomicI64,
    writer: Mutex<()>,
    user_reads: AtomicU64,
    contact_reads: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            contacts: DashMap::new(),
            next_user_id: AtomicI64::new(1),
            next_contact_id: AtomicI64::new(1),
            writer: Mutex::new(()),
            user_reads: AtomicU64::new(0),
            contact_reads: AtomicU64::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new active, unverified user.
    pub fn create_user(&self, new_user: NewUser) -> Result<User> {
        let _guard = self.writer.lock();
        self.ensure_unique(None, &new_user.username, &new_user.email)?;

        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
        let user = User {
            id,
            username: new_user.username,
            email: new_user.email,
            hashed_password: new_user.hashed_password,
            full_name: new_user.full_name,
            is_active: true,
            is_verified: false,
            verification_token: None,
            avatar_url: None,
            role: new_user.role,
            reset_token: None,
            reset_token_expires: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.users.insert(id, user.clone());
        tracing::debug!(user_id = id, username = %user.username, "user created");
        Ok(user)
    }

    /// Number of user reads served by this store.
    pub fn user_reads(&self) -> u64 {
        self.user_reads.load(Ordering::Relaxed)
    }

    /// Number of contact list reads served by this store.
    pub fn contact_reads(&self) -> u64 {
        self.contact_reads.load(Ordering::Relaxed)
    }

    fn ensure_unique(&self, except: Option<UserId>, username: &str, email: &str) -> Result<()> {
        for entry in self.users.iter() {
            if Some(entry.id) == except {
                continue;
            }
            if entry.username == username {
                return Err(CoreError::conflict("User", "username already taken"));
            }
            if entry.email == email {
                return Err(CoreError::conflict("User", "email already registered"));
            }
        }
        Ok(())
    }

    fn owned_contacts(&self, owner: UserId) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|entry| entry.user_id == owner)
            .map(|entry| entry.value().clone())
            .collect();
        contacts.sort_by_key(|contact| contact.id);
        contacts
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>> {
        self.user_reads.fetch_add(1, Ordering::Relaxed);
        let found = match lookup {
            UserLookup::Id(id) => self.users.get(&id).map(|u| u.value().clone()),
            UserLookup::Username(username) => self
                .users
                .iter()
                .find(|u| u.username == username)
                .map(|u| u.value().clone()),
            UserLookup::Email(email) => self
                .users
                .iter()
                .find(|u| u.email == email)
                .map(|u| u.value().clone()),
        };
        Ok(found)
    }

    async fn update_user(&self, id: UserId, update: &UserUpdate) -> Result<Option<User>> {
        let _guard = self.writer.lock();
        let Some(mut user) = self.users.get(&id).map(|u| u.value().clone()) else {
            return Ok(None);
        };
        update.apply_to(&mut user);
        self.ensure_unique(Some(id), &user.username, &user.email)?;
        self.users.insert(id, user.clone());
        Ok(Some(user))
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let _guard = self.writer.lock();
        let removed = self.users.remove(&id).is_some();
        if removed {
            self.contacts.retain(|_, contact| contact.user_id != id);
        }
        Ok(removed)
    }

    async fn set_reset_token(
        &self,
        id: UserId,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool> {
        let _guard = self.writer.lock();
        let Some(mut user) = self.users.get_mut(&id) else {
            return Ok(false);
        };
        user.reset_token = Some(token.to_string());
        user.reset_token_expires = Some(expires_at);
        Ok(true)
    }

    async fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        self.user_reads.fetch_add(1, Ordering::Relaxed);
        let now = OffsetDateTime::now_utc();
        Ok(self
            .users
            .iter()
            .find(|u| u.reset_token_matches(token, now))
            .map(|u| u.value().clone()))
    }

    async fn redeem_reset_token(
        &self,
        email: &str,
        token: &str,
        new_password_hash: &str,
    ) -> Result<Option<User>> {
        let _guard = self.writer.lock();
        let now = OffsetDateTime::now_utc();
        let Some(id) = self
            .users
            .iter()
            .find(|u| u.reset_token_matches(token, now))
            .filter(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .map(|u| u.id)
        else {
            return Ok(None);
        };

        let Some(mut user) = self.users.get_mut(&id) else {
            return Ok(None);
        };
        user.hashed_password = new_password_hash.to_string();
        user.reset_token = None;
        user.reset_token_expires = None;
        Ok(Some(user.clone()))
    }
}

#[async_trait]
impl ContactStore for InMemoryStore {
    async fn list_contacts(&self, owner: UserId) -> Result<Vec<Contact>> {
        self.contact_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.owned_contacts(owner))
    }

    async fn list_contacts_page(
        &self,
        owner: UserId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Contact>> {
        self.contact_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .owned_contacts(owner)
            .into_iter()
            .skip(skip)
            .take(limit)
            .collect())
    }

    async fn create_contact(&self, owner: UserId, draft: &ContactDraft) -> Result<Contact> {
        draft.validate()?;
        let _guard = self.writer.lock();
        if !self.users.contains_key(&owner) {
            return Err(CoreError::not_found("User", owner));
        }
        let id = self.next_contact_id.fetch_add(1, Ordering::Relaxed);
        let contact = draft.clone().into_contact(id, owner);
        self.contacts.insert(id, contact.clone());
        Ok(contact)
    }

    async fn update_contact(
        &self,
        owner: UserId,
        id: ContactId,
        draft: &ContactDraft,
    ) -> Result<Option<Contact>> {
        draft.validate()?;
        let _guard = self.writer.lock();
        match self.contacts.get(&id) {
            Some(existing) if existing.user_id == owner => {}
            _ => return Ok(None),
        }
        let contact = draft.clone().into_contact(id, owner);
        self.contacts.insert(id, contact.clone());
        Ok(Some(contact))
    }

    async fn delete_contact(&self, owner: UserId, id: ContactId) -> Result<bool> {
        let _guard = self.writer.lock();
        Ok(self
            .contacts
            .remove_if(&id, |_, contact| contact.user_id == owner)
            .is_some())
    }
}
