//! Key-value store abstraction behind the cache backend.
//!
//! A `CacheStore` is the raw transport: it reports every failure as a
//! `StoreError` and knows nothing about reachability state. The
//! [`CacheBackend`](super::backend::CacheBackend) adapter sits on top and
//! turns those errors into miss/failure sentinels.

use async_trait::async_trait;
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection refused, dropped, pool exhausted or timed out.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but rejected the command.
    #[error("cache store command failed: {0}")]
    Command(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Server-side statistics reported by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub backend: &'static str,
    pub connected_clients: u64,
    pub used_memory: String,
    pub hit_count: u64,
    pub miss_count: u64,
    pub version: String,
}

/// Longest lifetime any entry is stored with. Longer TTLs are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// State of a fixed-window counter right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: i64,
    /// Time until the window closes and the counter starts over.
    pub resets_in: Duration,
}

/// One entry of a time-ordered index. `score` is milliseconds since the
/// Unix epoch.
#[derive(Debug, Clone, Copy)]
pub struct IndexedEntry<'a> {
    pub key: &'a str,
    pub data: &'a [u8],
    pub score: i64,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Fetch several keys in one round trip, preserving order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    /// Write every entry with the same TTL as one all-or-nothing batch.
    async fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Duration)
    -> Result<(), StoreError>;

    /// Delete keys in one batch, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Increment a counter that expires `window` after its first increment.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Write `entry` and register its key in the time-ordered `index`, as
    /// one batch. The entry expires after `retention`; index members scored
    /// more than `retention` before the new entry are dropped.
    async fn append_indexed(
        &self,
        index: &str,
        entry: IndexedEntry<'_>,
        retention: Duration,
    ) -> Result<(), StoreError>;

    /// Up to `limit` keys from `index`, highest score first.
    async fn newest_indexed(&self, index: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn info(&self) -> Result<StoreInfo, StoreError>;

    fn kind(&self) -> &'static str;
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_TTL)
}

/// Write lock acquisitions between two full sweeps of expired entries.
const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct LocalEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl LocalEntry {
    fn new(data: Vec<u8>, ttl: Duration, now: Instant) -> Self {
        Self {
            data,
            expires_at: expiry(now, ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
struct LocalIndex {
    members: BTreeSet<(i64, String)>,
    expires_at: Option<Instant>,
}

impl LocalIndex {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct LocalState {
    entries: HashMap<String, LocalEntry>,
    indexes: HashMap<String, LocalIndex>,
}

impl LocalState {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len() + self.indexes.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.indexes.retain(|_, index| !index.is_expired(now));
        before - (self.entries.len() + self.indexes.len())
    }
}

/// Single-instance store kept in process memory.
///
/// All entries live behind one `RwLock`, so a batch write or delete is
/// observed either entirely or not at all. An expired entry is removed when
/// a read finds it, and every `SWEEP_EVERY` writes the whole map is swept,
/// so keys that are never read again do not accumulate.
#[derive(Debug, Default)]
pub struct LocalStore {
    state: RwLock<LocalState>,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a raw value, bypassing any encoding. Used to simulate
    /// corrupted payloads.
    pub fn insert_raw(&self, key: impl Into<String>, data: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        self.write_state(now)
            .entries
            .insert(key.into(), LocalEntry::new(data, ttl, now));
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.state.write().purge_expired(Instant::now())
    }

    /// Write access that also drives the periodic sweep.
    fn write_state(&self, now: Instant) -> RwLockWriteGuard<'_, LocalState> {
        let mut state = self.state.write();
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            let purged = state.purge_expired(now);
            if purged > 0 {
                tracing::trace!(purged, "swept expired local cache entries");
            }
        }
        state
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<Vec<u8>> {
        let (found, expired) = match self.state.read().entries.get(key) {
            Some(entry) if entry.is_expired(now) => (None, true),
            Some(entry) => (Some(entry.data.clone()), false),
            None => (None, false),
        };

        if expired {
            let mut state = self.state.write();
            if state.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
                state.entries.remove(key);
            }
        }

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        let state = self.state.read();
        state.entries.len() + state.indexes.len()
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lookup(key, Instant::now()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let now = Instant::now();
        Ok(keys.iter().map(|key| self.lookup(key, now)).collect())
    }

    async fn set_many(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut state = self.write_state(now);
        for (key, data) in entries {
            state
                .entries
                .insert(key.clone(), LocalEntry::new(data.clone(), ttl, now));
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut state = self.write_state(now);
        let removed = keys
            .iter()
            .filter_map(|key| state.entries.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut state = self.write_state(now);

        let current = match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = std::str::from_utf8(&entry.data)
                    .ok()
                    .and_then(|text| text.parse::<i64>().ok())
                    .ok_or_else(|| StoreError::Command("value is not an integer".into()))?;
                Some((value, entry.expires_at))
            }
            _ => None,
        };

        let (next, expires_at) = match current {
            Some((value, expires_at)) => (value.saturating_add(1), expires_at),
            None => (1, expiry(now, window)),
        };
        state.entries.insert(
            key.to_string(),
            LocalEntry {
                data: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(WindowCount {
            count: next,
            resets_in: expires_at.saturating_duration_since(now),
        })
    }

    async fn append_indexed(
        &self,
        index: &str,
        entry: IndexedEntry<'_>,
        retention: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let cutoff = entry.score.saturating_sub(retention_millis(retention));
        let mut state = self.write_state(now);

        state.entries.insert(
            entry.key.to_string(),
            LocalEntry::new(entry.data.to_vec(), retention, now),
        );

        let slot = state.indexes.entry(index.to_string()).or_default();
        if slot.is_expired(now) {
            slot.members.clear();
        }
        slot.members.retain(|(score, _)| *score >= cutoff);
        slot.members.insert((entry.score, entry.key.to_string()));
        slot.expires_at = Some(expiry(now, retention));
        Ok(())
    }

    async fn newest_indexed(&self, index: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let state = self.state.read();
        let Some(slot) = state.indexes.get(index).filter(|slot| !slot.is_expired(now)) else {
            return Ok(Vec::new());
        };
        Ok(slot
            .members
            .iter()
            .rev()
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let now = Instant::now();
        let used_bytes: usize = self
            .state
            .read()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| key.len() + entry.data.len())
            .sum();

        Ok(StoreInfo {
            backend: self.kind(),
            connected_clients: 1,
            used_memory: format!("{used_bytes}B"),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

/// Retention expressed in index score units.
pub(crate) fn retention_millis(retention: Duration) -> i64 {
    i64::try_from(retention.min(MAX_TTL).as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_write_then_read() {
        let store = LocalStore::new();
        store
            .set_many(
                &[("a".into(), b"1".to_vec()), ("b".into(), b"2".to_vec())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let values = store
            .get_many(&["a".into(), "missing".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"2".to_vec())]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = LocalStore::new();
        store
            .set_many(&[("k".into(), b"v".to_vec())], Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_counts_only_live_keys() {
        let store = LocalStore::new();
        store
            .set_many(&[("x".into(), b"1".to_vec())], Duration::from_secs(60))
            .await
            .unwrap();
        let removed = store
            .delete(&["x".into(), "y".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn counter_window_restarts_after_expiry() {
        let store = LocalStore::new();
        let window = Duration::from_millis(30);
        let first = store.incr_window("c", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert!(first.resets_in <= window);
        let second = store.incr_window("c", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert!(second.resets_in <= first.resets_in);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.incr_window("c", window).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn counter_over_non_integer_is_a_command_error() {
        let store = LocalStore::new();
        store.insert_raw("c", b"abc".to_vec(), Duration::from_secs(60));
        let err = store
            .incr_window("c", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_unavailable());
    }

    fn indexed<'a>(key: &'a str, score: i64) -> IndexedEntry<'a> {
        IndexedEntry {
            key,
            data: b"{}",
            score,
        }
    }

    #[tokio::test]
    async fn index_returns_highest_scores_first() {
        let store = LocalStore::new();
        let retention = Duration::from_secs(60);
        let keys: Vec<String> = (0..20).map(|i| format!("ns:audit:{i}")).collect();
        // Insert out of order; the index orders by score, not arrival.
        for i in [7, 3, 19, 0, 12, 5, 18, 1, 9, 14, 2, 16, 4, 11, 6, 17, 8, 13, 10, 15] {
            store
                .append_indexed("ns:audit_index", indexed(&keys[i], 1_000 + i as i64), retention)
                .await
                .unwrap();
        }

        let newest = store.newest_indexed("ns:audit_index", 3).await.unwrap();
        assert_eq!(newest, vec!["ns:audit:19", "ns:audit:18", "ns:audit:17"]);
        assert_eq!(store.get("ns:audit:19").await.unwrap(), Some(b"{}".to_vec()));
        assert!(store.newest_indexed("ns:missing", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_drops_members_older_than_retention() {
        let store = LocalStore::new();
        let retention = Duration::from_secs(10);
        store
            .append_indexed("idx", indexed("old", 0), retention)
            .await
            .unwrap();
        store
            .append_indexed("idx", indexed("new", 20_000), retention)
            .await
            .unwrap();

        assert_eq!(store.newest_indexed("idx", 10).await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn expired_entry_is_removed_when_read() {
        let store = LocalStore::new();
        store.insert_raw("k", b"v".to_vec(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.held(), 0);
    }

    #[tokio::test]
    async fn unread_expired_counters_are_swept_by_later_writes() {
        let store = LocalStore::new();
        for i in 0..10_000 {
            store
                .incr_window(&format!("reset:{i}"), Duration::from_millis(5))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        for _ in 0..SWEEP_EVERY {
            store
                .set_many(&[("other".into(), b"1".to_vec())], Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(store.held(), 1);
    }

    #[tokio::test]
    async fn oversized_ttls_are_clamped() {
        let store = LocalStore::new();
        store
            .set_many(&[("k".into(), b"v".to_vec())], Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(
            store
                .incr_window("c", Duration::from_secs(u64::MAX))
                .await
                .unwrap()
                .count,
            1
        );
        assert!(store.get("k").await.unwrap().is_some());
        assert_eq!(retention_millis(Duration::from_secs(u64::MAX)), MAX_TTL.as_millis() as i64);
    }

    #[tokio::test]
    async fn purge_reports_removed_entries() {
        let store = LocalStore::new();
        store.insert_raw("a", b"1".to_vec(), Duration::from_millis(5));
        store.insert_raw("b", b"2".to_vec(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn info_reports_hits_and_misses() {
        let store = LocalStore::new();
        store
            .set_many(&[("k".into(), b"v".to_vec())], Duration::from_secs(60))
            .await
            .unwrap();
        store.get("k").await.unwrap();
        store.get("nope").await.unwrap();

        let info = store.info().await.unwrap();
        assert_eq!(info.backend, "local");
        assert_eq!(info.hit_count, 1);
        assert_eq!(info.miss_count, 1);
        assert_eq!(info.used_memory, "2B");
    }
}
