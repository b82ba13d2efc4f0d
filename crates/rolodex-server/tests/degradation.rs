//! Behaviour while the cache backend is unreachable.

mod common;

use common::{DownStore, NAMESPACE, OP_TIMEOUT, StalledStore, cache_over, draft};
use rolodex_core::{ContactStore, Role};
use rolodex_db_memory::{InMemoryStore, NewUser};
use rolodex_server::cache::{
    AdminActionKind, AuditError, AuthorizationCache, CacheBackend, CachePolicy, CacheService,
    DecisionSource, HealthState, KeyBuilder, OutagePolicy, ReprobePolicy,
};
use rolodex_server::services::{
    ContactService, PasswordResetService, ResetRequestOutcome, UserService,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn down() -> (Arc<CacheService>, Arc<DownStore>) {
    let store = Arc::new(DownStore::default());
    (cache_over(store.clone(), OP_TIMEOUT), store)
}

#[tokio::test]
async fn first_failure_disables_and_later_calls_skip_the_store() {
    let (cache, store) = down();
    let user = InMemoryStore::new()
        .create_user(NewUser::new("alice", "a@x.com", "hash"))
        .unwrap();

    assert!(!cache.set_user(&user).await.unwrap());
    assert_eq!(cache.backend().state(), HealthState::Disabled);
    assert_eq!(store.calls(), 1);

    assert!(cache.get_user_by_id(user.id).await.is_none());
    assert!(!cache.invalidate_user(&user).await);
    assert!(cache.get_contacts(user.id).await.is_none());
    assert_eq!(store.calls(), 1);
    assert_eq!(cache.backend().health().disable_count(), 1);
}

#[tokio::test]
async fn reads_fall_through_to_the_store() {
    let (cache, _) = down();
    let store = InMemoryStore::shared();
    let alice = store
        .create_user(NewUser::new("alice", "a@x.com", "hash"))
        .unwrap();
    store.create_contact(alice.id, &draft("Bob")).await.unwrap();

    let users = UserService::new(store.clone(), cache.clone());
    let contacts = ContactService::new(store.clone(), cache.clone());

    for _ in 0..2 {
        let found = users.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert_eq!(contacts.list_all(alice.id).await.unwrap().len(), 1);
    }
    assert_eq!(store.contact_reads(), 2);
}

#[tokio::test]
async fn authorization_still_resolves_from_the_store() {
    let (cache, _) = down();
    let store = InMemoryStore::shared();
    let admin = store
        .create_user(NewUser::new("root", "root@x.com", "hash").with_role(Role::Admin))
        .unwrap();
    let authz = AuthorizationCache::new(cache);

    for _ in 0..2 {
        let decision = authz
            .authorize(admin.id, Role::Admin, store.as_ref())
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::Store);
    }
}

#[tokio::test]
async fn reset_throttle_follows_the_outage_policy() {
    let store = InMemoryStore::shared();
    store
        .create_user(NewUser::new("alice", "a@x.com", "hash"))
        .unwrap();

    let allow = cache_over(Arc::new(DownStore::default()), OP_TIMEOUT);
    let resets = PasswordResetService::new(store.clone(), allow);
    for _ in 0..5 {
        let outcome = resets.request_reset("a@x.com").await.unwrap();
        assert!(matches!(outcome, ResetRequestOutcome::Issued(_)));
    }

    let backend = CacheBackend::new(
        Arc::new(DownStore::default()),
        OP_TIMEOUT,
        ReprobePolicy::Never,
    );
    let deny = Arc::new(CacheService::new(
        backend,
        KeyBuilder::new(NAMESPACE),
        CachePolicy {
            reset_outage: OutagePolicy::Deny,
            ..CachePolicy::default()
        },
    ));
    let resets = PasswordResetService::new(store, deny);
    assert_eq!(
        resets.request_reset("a@x.com").await.unwrap(),
        ResetRequestOutcome::Throttled
    );
}

#[tokio::test]
async fn reset_completes_without_the_cache() {
    let (cache, _) = down();
    let store = InMemoryStore::shared();
    store
        .create_user(NewUser::new("alice", "a@x.com", "old-hash"))
        .unwrap();
    let resets = PasswordResetService::new(store.clone(), cache);

    let ResetRequestOutcome::Issued(ticket) = resets.request_reset("a@x.com").await.unwrap()
    else {
        panic!("expected a token to be issued");
    };
    assert!(
        resets
            .complete_reset("a@x.com", &ticket.token, "new-hash")
            .await
            .unwrap()
    );
    // Tokens are single use.
    assert!(
        !resets
            .complete_reset("a@x.com", &ticket.token, "other-hash")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn audit_reports_unavailable_and_listing_is_empty() {
    let (cache, _) = down();
    cache.backend().mark_disabled("test");

    let result = cache
        .cache_admin_action(1, AdminActionKind::UserDeleted, Some(2), None)
        .await;
    assert!(matches!(result, Err(AuditError::Unavailable)));
    assert!(cache.recent_admin_actions(10).await.is_empty());
}

#[tokio::test]
async fn stats_describe_a_disabled_cache() {
    let (cache, _) = down();
    cache.backend().ping().await;

    let report = serde_json::to_value(cache.get_cache_stats().await).unwrap();
    assert_eq!(
        report,
        serde_json::json!({
            "enabled": false,
            "error": "Cache disabled or unavailable",
        })
    );
}

#[tokio::test]
async fn switched_off_cache_is_inert() {
    let cache = CacheService::new(
        CacheBackend::off(),
        KeyBuilder::new(NAMESPACE),
        CachePolicy::default(),
    );
    assert_eq!(cache.backend().store_kind(), "off");
    assert!(!cache.backend().ping().await);
    assert!(!cache.cache_user_role(1, Role::User).await.unwrap());
    assert!(cache.get_user_role_cache(1).await.is_none());
    assert!(cache.check_reset_attempts("a@x.com", 3).await);
}

#[tokio::test]
async fn stalled_store_is_bounded_by_the_operation_timeout() {
    let cache = cache_over(Arc::new(StalledStore), Duration::from_millis(50));

    let started = Instant::now();
    assert!(cache.get_user_by_id(1).await.is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(cache.backend().state(), HealthState::Disabled);

    // Disabled now, so this returns without waiting at all.
    let started = Instant::now();
    assert!(cache.get_contacts(1).await.is_none());
    assert!(started.elapsed() < Duration::from_millis(50));
}
