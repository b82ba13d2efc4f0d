//! Append-only trail of privileged actions.
//!
//! Each record lives under its own `admin_action:<uuid>` key and ages out
//! with the retention TTL. There is no update path. Every key is also
//! registered in a time-ordered index scored by the record timestamp, so
//! reading the newest `n` records touches `n` keys no matter how many are
//! retained.

use rolodex_core::{Role, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::backend::CacheBackend;
use super::codec::{self, CacheError};
use super::keys::KeyBuilder;
use super::store::IndexedEntry;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Most records a single read returns.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdminActionKind {
    RoleChanged { role: Role },
    StatusChanged { active: bool },
    UserDeleted,
    /// A privileged HTTP endpoint was invoked.
    Endpoint {
        method: String,
        path: String,
        status: u16,
    },
}

impl AdminActionKind {
    /// Short human-readable label, e.g. `role_change_to_admin`.
    pub fn label(&self) -> String {
        match self {
            AdminActionKind::RoleChanged { role } => format!("role_change_to_{role}"),
            AdminActionKind::StatusChanged { active: true } => "status_change_to_active".into(),
            AdminActionKind::StatusChanged { active: false } => {
                "status_change_to_inactive".into()
            }
            AdminActionKind::UserDeleted => "delete_user".into(),
            AdminActionKind::Endpoint {
                method,
                path,
                status,
            } => format!("{method} {path} -> {status}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminActionRecord {
    pub id: Uuid,
    pub actor_id: UserId,
    pub action: AdminActionKind,
    pub target_id: Option<UserId>,
    pub detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl AdminActionRecord {
    pub fn new(
        actor_id: UserId,
        action: AdminActionKind,
        target_id: Option<UserId>,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action,
            target_id,
            detail,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Position in the time-ordered index: milliseconds since the epoch.
    pub fn index_score(&self) -> i64 {
        i64::try_from(self.timestamp.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit record could not be written: cache backend unavailable")]
    Unavailable,

    #[error(transparent)]
    Encode(#[from] CacheError),
}

#[derive(Debug, Clone)]
pub struct AdminAuditTrail {
    backend: CacheBackend,
    keys: KeyBuilder,
    retention: Duration,
    scan_limit: usize,
}

impl AdminAuditTrail {
    pub fn new(
        backend: CacheBackend,
        keys: KeyBuilder,
        retention: Duration,
        scan_limit: usize,
    ) -> Self {
        Self {
            backend,
            keys,
            retention,
            scan_limit,
        }
    }

    pub async fn append(&self, record: &AdminActionRecord) -> Result<(), AuditError> {
        let data = codec::encode(record)?;
        let key = self.keys.admin_action(record.id);
        let entry = IndexedEntry {
            key: &key,
            data: &data,
            score: record.index_score(),
        };
        if self
            .backend
            .append_indexed(&self.keys.admin_action_index(), entry, self.retention)
            .await
        {
            tracing::debug!(
                actor_id = record.actor_id,
                action = %record.action.label(),
                "admin action recorded"
            );
            Ok(())
        } else {
            Err(AuditError::Unavailable)
        }
    }

    /// Up to `limit` records (capped at the scan limit), newest first.
    /// Undecodable or already expired records are skipped.
    pub async fn recent(&self, limit: usize) -> Vec<AdminActionRecord> {
        let limit = limit.min(self.scan_limit);
        if limit == 0 {
            return Vec::new();
        }
        let keys = self
            .backend
            .newest_indexed(&self.keys.admin_action_index(), limit)
            .await;
        if keys.is_empty() {
            return Vec::new();
        }

        let values = self.backend.get_many(&keys).await;
        let mut records: Vec<AdminActionRecord> = keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| {
                let bytes = value?;
                match codec::decode(&bytes) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "skipping unreadable audit record");
                        None
                    }
                }
            })
            .collect();

        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        records.truncate(limit);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::LocalStore;
    use crate::cache::backend::{DEFAULT_OP_TIMEOUT, ReprobePolicy};
    use std::sync::Arc;

    fn trail_with_store() -> (AdminAuditTrail, Arc<LocalStore>) {
        trail_with_scan_limit(DEFAULT_SCAN_LIMIT)
    }

    fn trail_with_scan_limit(scan_limit: usize) -> (AdminAuditTrail, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::new());
        let backend = CacheBackend::new(store.clone(), DEFAULT_OP_TIMEOUT, ReprobePolicy::Never);
        let trail = AdminAuditTrail::new(
            backend,
            KeyBuilder::new("test"),
            DEFAULT_RETENTION,
            scan_limit,
        );
        (trail, store)
    }

    #[test]
    fn action_kind_is_tagged() {
        let json = serde_json::to_value(AdminActionKind::RoleChanged { role: Role::Admin }).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "role_changed", "role": "admin"}));
        assert_eq!(
            AdminActionKind::RoleChanged { role: Role::Admin }.label(),
            "role_change_to_admin"
        );
        assert_eq!(
            AdminActionKind::StatusChanged { active: false }.label(),
            "status_change_to_inactive"
        );
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_bounded() {
        let (trail, _store) = trail_with_store();
        let base = OffsetDateTime::now_utc();
        for i in 0..5i64 {
            let mut record = AdminActionRecord::new(1, AdminActionKind::UserDeleted, Some(i), None);
            record.timestamp = base + time::Duration::seconds(i);
            trail.append(&record).await.unwrap();
        }

        let recent = trail.recent(3).await;
        let targets: Vec<Option<UserId>> = recent.iter().map(|r| r.target_id).collect();
        assert_eq!(targets, vec![Some(4), Some(3), Some(2)]);
    }

    #[tokio::test]
    async fn newest_records_win_once_retained_records_exceed_the_scan_limit() {
        let (trail, _store) = trail_with_scan_limit(10);
        let base = OffsetDateTime::now_utc();
        // Append in shuffled order so arrival order says nothing about age.
        let mut order: Vec<i64> = (0..50).collect();
        order.reverse();
        order.rotate_left(17);
        for i in order {
            let mut record = AdminActionRecord::new(1, AdminActionKind::UserDeleted, Some(i), None);
            record.timestamp = base + time::Duration::seconds(i);
            trail.append(&record).await.unwrap();
        }

        let targets: Vec<Option<UserId>> =
            trail.recent(3).await.iter().map(|r| r.target_id).collect();
        assert_eq!(targets, vec![Some(49), Some(48), Some(47)]);

        // Requests beyond the scan limit are capped, still newest first.
        let capped = trail.recent(500).await;
        assert_eq!(capped.len(), 10);
        assert_eq!(capped[0].target_id, Some(49));
        assert_eq!(capped[9].target_id, Some(40));
    }

    #[tokio::test]
    async fn corrupt_records_are_skipped() {
        let (trail, store) = trail_with_store();
        let kept = AdminActionRecord::new(1, AdminActionKind::UserDeleted, Some(2), None);
        let mut broken = AdminActionRecord::new(1, AdminActionKind::UserDeleted, Some(3), None);
        broken.timestamp = kept.timestamp + time::Duration::seconds(1);
        trail.append(&kept).await.unwrap();
        trail.append(&broken).await.unwrap();
        store.insert_raw(
            KeyBuilder::new("test").admin_action(broken.id),
            b"not json".to_vec(),
            DEFAULT_RETENTION,
        );

        let recent = trail.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].target_id, Some(2));
    }

    #[tokio::test]
    async fn append_reports_unavailable_backend() {
        let trail = AdminAuditTrail::new(
            CacheBackend::off(),
            KeyBuilder::default(),
            DEFAULT_RETENTION,
            DEFAULT_SCAN_LIMIT,
        );
        let err = trail
            .append(&AdminActionRecord::new(1, AdminActionKind::UserDeleted, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Unavailable));
        assert!(trail.recent(10).await.is_empty());
    }
}
