//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rolodex_core::ContactDraft;
use rolodex_server::cache::{
    CacheBackend, CachePolicy, CacheService, CacheStore, IndexedEntry, KeyBuilder, LocalStore,
    ReprobePolicy, StoreError, StoreInfo, WindowCount,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const NAMESPACE: &str = "test";
pub const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Cache service over a fresh in-process store.
pub fn local_cache() -> (Arc<CacheService>, Arc<LocalStore>) {
    local_cache_with(CachePolicy::default())
}

pub fn local_cache_with(policy: CachePolicy) -> (Arc<CacheService>, Arc<LocalStore>) {
    let store = Arc::new(LocalStore::new());
    let backend = CacheBackend::new(store.clone(), OP_TIMEOUT, ReprobePolicy::Never);
    let cache = Arc::new(CacheService::new(backend, KeyBuilder::new(NAMESPACE), policy));
    (cache, store)
}

/// Store that refuses every call as if the server were down.
#[derive(Default)]
pub struct DownStore {
    pub calls: AtomicU64,
}

impl DownStore {
    fn refuse<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for DownStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.refuse()
    }
    async fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.refuse()
    }
    async fn set_many(
        &self,
        _entries: &[(String, Vec<u8>)],
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        self.refuse()
    }
    async fn delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
        self.refuse()
    }
    async fn incr_window(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
        self.refuse()
    }
    async fn append_indexed(
        &self,
        _index: &str,
        _entry: IndexedEntry<'_>,
        _retention: Duration,
    ) -> Result<(), StoreError> {
        self.refuse()
    }
    async fn newest_indexed(&self, _index: &str, _limit: usize) -> Result<Vec<String>, StoreError> {
        self.refuse()
    }
    async fn ping(&self) -> Result<(), StoreError> {
        self.refuse()
    }
    async fn info(&self) -> Result<StoreInfo, StoreError> {
        self.refuse()
    }
    fn kind(&self) -> &'static str {
        "down"
    }
}

/// Store that never answers within the adapter timeout.
pub struct StalledStore;

#[async_trait]
impl CacheStore for StalledStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        std::future::pending().await
    }
    async fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        std::future::pending().await
    }
    async fn set_many(
        &self,
        _entries: &[(String, Vec<u8>)],
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        std::future::pending().await
    }
    async fn delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
        std::future::pending().await
    }
    async fn incr_window(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
        std::future::pending().await
    }
    async fn append_indexed(
        &self,
        _index: &str,
        _entry: IndexedEntry<'_>,
        _retention: Duration,
    ) -> Result<(), StoreError> {
        std::future::pending().await
    }
    async fn newest_indexed(&self, _index: &str, _limit: usize) -> Result<Vec<String>, StoreError> {
        std::future::pending().await
    }
    async fn ping(&self) -> Result<(), StoreError> {
        std::future::pending().await
    }
    async fn info(&self) -> Result<StoreInfo, StoreError> {
        std::future::pending().await
    }
    fn kind(&self) -> &'static str {
        "stalled"
    }
}

pub fn cache_over(store: Arc<dyn CacheStore>, timeout: Duration) -> Arc<CacheService> {
    let backend = CacheBackend::new(store, timeout, ReprobePolicy::Never);
    Arc::new(CacheService::new(
        backend,
        KeyBuilder::new(NAMESPACE),
        CachePolicy::default(),
    ))
}

pub fn draft(first_name: &str) -> ContactDraft {
    ContactDraft {
        first_name: first_name.into(),
        last_name: "Tester".into(),
        email: format!("{}@example.com", first_name.to_lowercase()),
        phone: "+15550000000".into(),
        birthday: time::macros::date!(1988 - 11 - 30),
        additional_info: None,
    }
}
