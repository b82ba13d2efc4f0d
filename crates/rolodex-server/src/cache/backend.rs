//! Cache backend adapter.
//!
//! Wraps a [`CacheStore`] with a per-operation timeout and a reachability
//! state machine. The adapter never returns errors: any failure is reported
//! as absent/`false`/`None`, and callers treat it exactly like a cache miss.
//!
//! ## Reachability
//!
//! ```text
//!             connection error / timeout
//! Connected ─────────────────────────────▶ Disabled
//!     ▲                                        │
//!     └──────── successful ping ───────────────┘
//!               (ReprobePolicy::OnPing only)
//! ```
//!
//! While disabled, no operation touches the store. A warning is logged once
//! per transition into `Disabled`.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::store::{CacheStore, IndexedEntry, LocalStore, StoreError, StoreInfo, WindowCount};

/// Default bound for a single store round trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// What the adapter does once it has been disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprobePolicy {
    /// Stay disabled for the life of the process.
    #[default]
    Never,
    /// A successful `ping()` re-enables the backend.
    OnPing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Connected,
    Disabled,
}

/// Reachability flag shared by every clone of a backend.
#[derive(Debug)]
pub struct BackendHealth {
    disabled: AtomicBool,
    transitions: AtomicU64,
}

impl BackendHealth {
    fn new(state: HealthState) -> Self {
        Self {
            disabled: AtomicBool::new(state == HealthState::Disabled),
            transitions: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> HealthState {
        if self.disabled.load(Ordering::Acquire) {
            HealthState::Disabled
        } else {
            HealthState::Connected
        }
    }

    /// Move to `Disabled`. Returns `true` only for the caller that performed
    /// the transition.
    fn disable(&self) -> bool {
        let flipped = self
            .disabled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            self.transitions.fetch_add(1, Ordering::Relaxed);
        }
        flipped
    }

    fn enable(&self) -> bool {
        self.disabled
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// How many times the backend has been disabled.
    pub fn disable_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }
}

struct BackendInner {
    /// `None` when caching is switched off by configuration.
    store: Option<Arc<dyn CacheStore>>,
    health: BackendHealth,
    op_timeout: Duration,
    reprobe: ReprobePolicy,
}

/// Process-wide handle to the cache store. Cheap to clone.
#[derive(Clone)]
pub struct CacheBackend {
    inner: Arc<BackendInner>,
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBackend")
            .field("store", &self.store_kind())
            .field("state", &self.state())
            .field("op_timeout", &self.inner.op_timeout)
            .field("reprobe", &self.inner.reprobe)
            .finish()
    }
}

impl CacheBackend {
    /// Wrap a store. The backend starts `Connected`; call
    /// [`initialize`](Self::initialize) to verify reachability.
    pub fn new(store: Arc<dyn CacheStore>, op_timeout: Duration, reprobe: ReprobePolicy) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                store: Some(store),
                health: BackendHealth::new(HealthState::Connected),
                op_timeout,
                reprobe,
            }),
        }
    }

    /// In-process backend, mainly for tests and single-instance runs.
    pub fn local() -> Self {
        Self::new(
            Arc::new(LocalStore::new()),
            DEFAULT_OP_TIMEOUT,
            ReprobePolicy::Never,
        )
    }

    /// Backend with caching switched off. Every operation is a no-op.
    pub fn off() -> Self {
        Self {
            inner: Arc::new(BackendInner {
                store: None,
                health: BackendHealth::new(HealthState::Disabled),
                op_timeout: DEFAULT_OP_TIMEOUT,
                reprobe: ReprobePolicy::Never,
            }),
        }
    }

    /// Ping the store once at startup. Failure disables the backend
    /// regardless of the reprobe policy.
    pub async fn initialize(&self) -> bool {
        let Some(store) = self.inner.store.clone() else {
            return false;
        };
        match tokio::time::timeout(self.inner.op_timeout, store.ping()).await {
            Ok(Ok(())) => {
                self.inner.health.enable();
                true
            }
            Ok(Err(e)) => {
                self.disable_with(&e.to_string());
                false
            }
            Err(_) => {
                self.disable_with("ping timed out");
                false
            }
        }
    }

    pub fn state(&self) -> HealthState {
        self.inner.health.state()
    }

    pub fn health(&self) -> &BackendHealth {
        &self.inner.health
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.store.is_some() && self.state() == HealthState::Connected
    }

    pub fn is_configured(&self) -> bool {
        self.inner.store.is_some()
    }

    pub fn store_kind(&self) -> &'static str {
        self.inner.store.as_ref().map_or("off", |store| store.kind())
    }

    /// Force the backend into `Disabled`.
    pub fn mark_disabled(&self, reason: &str) {
        self.disable_with(reason);
    }

    fn disable_with(&self, reason: &str) {
        if self.inner.health.disable() {
            crate::metrics::record_backend_disabled();
            tracing::warn!(
                store = self.store_kind(),
                reason = %reason,
                "Cache backend unavailable; caching disabled"
            );
        }
    }

    /// Run one store call under the adapter's policy.
    async fn run<T, F, Fut>(&self, op: &'static str, call: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn CacheStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if !self.is_enabled() {
            return None;
        }
        let store = self.inner.store.clone()?;

        match tokio::time::timeout(self.inner.op_timeout, call(store)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                crate::metrics::record_backend_error(op);
                if e.is_unavailable() {
                    self.disable_with(&e.to_string());
                } else {
                    tracing::warn!(op, error = %e, "Cache store command failed");
                }
                None
            }
            Err(_) => {
                crate::metrics::record_backend_error(op);
                self.disable_with(&format!("{op} timed out after {:?}", self.inner.op_timeout));
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.run("get", |store| async move { store.get(key).await })
            .await
            .flatten()
    }

    /// Values for `keys` in order. Every slot is `None` when the backend
    /// cannot answer.
    pub async fn get_many(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        self.run("get_many", |store| async move { store.get_many(keys).await })
            .await
            .unwrap_or_else(|| vec![None; keys.len()])
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        self.set_batch(&[(key.to_string(), value)], ttl).await
    }

    /// Write all entries as one batch. `false` means none of them should be
    /// assumed written.
    pub async fn set_batch(&self, entries: &[(String, Vec<u8>)], ttl: Duration) -> bool {
        self.run("set", |store| async move { store.set_many(entries, ttl).await })
            .await
            .is_some()
    }

    /// Delete keys in one batch. Returns the number removed, or `None` when
    /// the backend could not be reached.
    pub async fn delete(&self, keys: &[String]) -> Option<u64> {
        self.run("delete", |store| async move { store.delete(keys).await })
            .await
    }

    pub async fn incr_window(&self, key: &str, window: Duration) -> Option<WindowCount> {
        self.run("incr", |store| async move {
            store.incr_window(key, window).await
        })
        .await
    }

    /// Write an entry and register it in a time-ordered index.
    pub async fn append_indexed(
        &self,
        index: &str,
        entry: IndexedEntry<'_>,
        retention: Duration,
    ) -> bool {
        self.run("append_indexed", |store| async move {
            store.append_indexed(index, entry, retention).await
        })
        .await
        .is_some()
    }

    /// Newest keys of `index`; empty when the backend cannot answer.
    pub async fn newest_indexed(&self, index: &str, limit: usize) -> Vec<String> {
        self.run("newest_indexed", |store| async move {
            store.newest_indexed(index, limit).await
        })
        .await
        .unwrap_or_default()
    }

    pub async fn info(&self) -> Option<StoreInfo> {
        self.run("info", |store| async move { store.info().await })
            .await
    }

    /// Health check. When disabled and the policy is
    /// [`ReprobePolicy::OnPing`], a successful ping re-enables the backend.
    pub async fn ping(&self) -> bool {
        let Some(store) = self.inner.store.clone() else {
            return false;
        };

        if self.is_enabled() {
            return self
                .run("ping", |store| async move { store.ping().await })
                .await
                .is_some();
        }

        if self.inner.reprobe != ReprobePolicy::OnPing {
            return false;
        }

        match tokio::time::timeout(self.inner.op_timeout, store.ping()).await {
            Ok(Ok(())) => {
                if self.inner.health.enable() {
                    tracing::info!(store = store.kind(), "Cache backend reachable again; caching re-enabled");
                }
                true
            }
            _ => false,
        }
    }
}
