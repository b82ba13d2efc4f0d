use rolodex_core::{Contact, ContactDraft, ContactId, DynContactStore, UserId};
use std::sync::Arc;

use super::ServiceResult;
use crate::cache::CacheService;

/// Contact access with whole-list caching.
///
/// Only the complete list of an owner is ever cached. A page is served from
/// it when it is present; otherwise the page is read from the store and the
/// cache is left untouched.
#[derive(Clone)]
pub struct ContactService {
    store: DynContactStore,
    cache: Arc<CacheService>,
}

impl ContactService {
    pub fn new(store: DynContactStore, cache: Arc<CacheService>) -> Self {
        Self { store, cache }
    }

    pub async fn list_all(&self, owner: UserId) -> ServiceResult<Vec<Contact>> {
        if let Some(contacts) = self.cache.get_contacts(owner).await {
            return Ok(contacts);
        }
        let contacts = self.store.list_contacts(owner).await?;
        self.cache.set_contacts(owner, &contacts).await?;
        Ok(contacts)
    }

    pub async fn list_page(
        &self,
        owner: UserId,
        skip: usize,
        limit: usize,
    ) -> ServiceResult<Vec<Contact>> {
        if let Some(contacts) = self.cache.get_contacts(owner).await {
            return Ok(contacts.into_iter().skip(skip).take(limit).collect());
        }
        Ok(self.store.list_contacts_page(owner, skip, limit).await?)
    }

    pub async fn create(&self, owner: UserId, draft: &ContactDraft) -> ServiceResult<Contact> {
        let contact = self.store.create_contact(owner, draft).await?;
        self.cache.invalidate_contacts(owner).await;
        Ok(contact)
    }

    pub async fn update(
        &self,
        owner: UserId,
        id: ContactId,
        draft: &ContactDraft,
    ) -> ServiceResult<Option<Contact>> {
        let updated = self.store.update_contact(owner, id, draft).await?;
        if updated.is_some() {
            self.cache.invalidate_contacts(owner).await;
        }
        Ok(updated)
    }

    pub async fn delete(&self, owner: UserId, id: ContactId) -> ServiceResult<bool> {
        let deleted = self.store.delete_contact(owner, id).await?;
        if deleted {
            self.cache.invalidate_contacts(owner).await;
        }
        Ok(deleted)
    }
}
