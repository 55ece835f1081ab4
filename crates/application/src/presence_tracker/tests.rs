use std::sync::Arc;

use keystone_core::{AppError, IdentityKey};
use keystone_domain::{ConnectionState, PresenceScope};

use crate::PresenceOp;
use crate::test_support::FakePresenceStore;

use super::{PresenceConfig, PresenceTracker, SessionStart};

fn tracker(store: Arc<FakePresenceStore>) -> PresenceTracker {
    PresenceTracker::new(store, PresenceConfig::default()).unwrap_or_else(|_| unreachable!())
}

fn start(identity: IdentityKey, display_name: &str) -> SessionStart {
    SessionStart {
        identity,
        display_name: display_name.to_owned(),
        edge_id: "edge-1".to_owned(),
        backend: Some("lobby-1".to_owned()),
        protocol_version: Some(767),
    }
}

#[test]
fn set_ttl_may_not_exceed_session_ttl() {
    let config = PresenceConfig {
        session_ttl_seconds: 30,
        set_ttl_seconds: 90,
    };

    assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    assert!(PresenceConfig::default().validate().is_ok());
}

#[tokio::test]
async fn start_session_writes_record_and_memberships_in_one_batch() {
    let store = Arc::new(FakePresenceStore::default());
    let tracker = tracker(store.clone());
    let identity = IdentityKey::new();

    assert!(tracker.start_session(start(identity, "Steve")).await.is_ok());

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert!(matches!(batches[0][0], PresenceOp::DeleteRecord { .. }));

    let record = tracker
        .record(identity)
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert_eq!(record.state, ConnectionState::Connecting);
    assert_eq!(record.backend.as_deref(), Some("lobby-1"));
    assert_eq!(record.protocol_version, Some(767));

    assert_eq!(tracker.count(&PresenceScope::Network).await, Ok(1));
    assert_eq!(
        tracker.count(&PresenceScope::Edge("edge-1".to_owned())).await,
        Ok(1)
    );
    assert_eq!(
        tracker
            .members(&PresenceScope::Backend("lobby-1".to_owned()))
            .await,
        Ok(vec!["Steve".to_owned()])
    );
}

#[tokio::test]
async fn start_session_rejects_blank_display_name() {
    let tracker = tracker(Arc::new(FakePresenceStore::default()));

    let result = tracker.start_session(start(IdentityKey::new(), "  ")).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn update_backend_moves_backend_membership() {
    let store = Arc::new(FakePresenceStore::default());
    let tracker = tracker(store);
    let identity = IdentityKey::new();
    assert!(tracker.start_session(start(identity, "Alex")).await.is_ok());

    let moved = tracker
        .update_backend(identity, "Alex", Some("lobby-1"), "survival-2")
        .await;

    assert_eq!(moved, Ok(true));
    assert_eq!(
        tracker.count(&PresenceScope::Edge("edge-1".to_owned())).await,
        Ok(1)
    );
    assert_eq!(
        tracker
            .count(&PresenceScope::Backend("lobby-1".to_owned()))
            .await,
        Ok(0)
    );
    assert_eq!(
        tracker
            .count(&PresenceScope::Backend("survival-2".to_owned()))
            .await,
        Ok(1)
    );
    let record = tracker.record(identity).await.unwrap_or_else(|_| unreachable!());
    assert_eq!(
        record.and_then(|record| record.backend),
        Some("survival-2".to_owned())
    );
}

#[tokio::test]
async fn heartbeat_reports_expired_record() {
    let store = Arc::new(FakePresenceStore::default());
    let tracker = tracker(store.clone());
    let identity = IdentityKey::new();
    assert!(tracker.start_session(start(identity, "Alex")).await.is_ok());

    assert_eq!(
        tracker.heartbeat(identity, None, Some(42), None).await,
        Ok(true)
    );
    let record = tracker.record(identity).await.unwrap_or_else(|_| unreachable!());
    assert_eq!(record.and_then(|record| record.ping_ms), Some(42));

    store.expire_record(identity);
    assert_eq!(tracker.heartbeat(identity, None, None, None).await, Ok(false));
}

#[tokio::test]
async fn set_state_marks_record_online() {
    let tracker = tracker(Arc::new(FakePresenceStore::default()));
    let identity = IdentityKey::new();
    assert!(tracker.start_session(start(identity, "Alex")).await.is_ok());

    assert_eq!(
        tracker.set_state(identity, ConnectionState::Online).await,
        Ok(true)
    );

    let record = tracker.record(identity).await.unwrap_or_else(|_| unreachable!());
    assert_eq!(
        record.map(|record| record.state),
        Some(ConnectionState::Online)
    );
    assert_eq!(
        tracker
            .set_state(IdentityKey::new(), ConnectionState::Online)
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn end_session_is_idempotent_and_uses_stored_name() {
    let tracker = tracker(Arc::new(FakePresenceStore::default()));
    let identity = IdentityKey::new();
    assert!(tracker.start_session(start(identity, "Alex")).await.is_ok());

    assert!(tracker.end_session(identity, None).await.is_ok());
    assert!(tracker.end_session(identity, None).await.is_ok());

    assert_eq!(tracker.is_online(identity).await, Ok(false));
    assert_eq!(tracker.count(&PresenceScope::Network).await, Ok(0));
    assert_eq!(
        tracker.count(&PresenceScope::Edge("edge-1".to_owned())).await,
        Ok(0)
    );
}

#[tokio::test]
async fn members_are_sorted_case_insensitively() {
    let tracker = tracker(Arc::new(FakePresenceStore::default()));
    for display_name in ["zed", "Alex", "bob"] {
        assert!(
            tracker
                .start_session(start(IdentityKey::new(), display_name))
                .await
                .is_ok()
        );
    }

    assert_eq!(
        tracker.members(&PresenceScope::Network).await,
        Ok(vec!["Alex".to_owned(), "bob".to_owned(), "zed".to_owned()])
    );
}

#[tokio::test]
async fn store_outage_surfaces_as_unavailable() {
    let store = Arc::new(FakePresenceStore::default());
    let tracker = tracker(store.clone());
    store.set_offline(true);

    let result = tracker.start_session(start(IdentityKey::new(), "Alex")).await;

    assert!(matches!(result, Err(AppError::Unavailable(_))));
}

#[tokio::test]
async fn update_backend_after_expiry_writes_nothing() {
    let store = Arc::new(FakePresenceStore::default());
    let tracker = tracker(store.clone());
    let identity = IdentityKey::new();
    assert!(tracker.start_session(start(identity, "Alex")).await.is_ok());
    store.expire_record(identity);
    let applied = store.batches().len();

    let moved = tracker
        .update_backend(identity, "Alex", Some("lobby-1"), "survival-2")
        .await;

    assert_eq!(moved, Ok(false));
    assert_eq!(store.batches().len(), applied);
    assert_eq!(tracker.is_online(identity).await, Ok(false));
    assert_eq!(tracker.record(identity).await, Ok(None));
}

#[tokio::test]
async fn refreshes_rewrite_the_complete_record() {
    let store = Arc::new(FakePresenceStore::default());
    let tracker = tracker(store.clone());
    let identity = IdentityKey::new();
    assert!(tracker.start_session(start(identity, "Alex")).await.is_ok());

    assert_eq!(tracker.heartbeat(identity, None, Some(12), None).await, Ok(true));
    assert_eq!(
        tracker.set_state(identity, ConnectionState::Online).await,
        Ok(true)
    );

    for batch in store.batches().iter().skip(1) {
        let Some(PresenceOp::WriteRecord { fields, .. }) = batch.first() else {
            unreachable!();
        };
        for field in ["name", "state", "edge", "heartbeat"] {
            assert!(fields.iter().any(|(name, _)| name == field));
        }
    }
}

#[tokio::test]
async fn end_session_deletes_undecodable_record() {
    let store = Arc::new(FakePresenceStore::default());
    let tracker = tracker(store.clone());
    let identity = IdentityKey::new();
    store.write_raw(identity, &[("backend", "survival-2"), ("heartbeat", "1")]);
    store.insert_member(PresenceScope::Network, "Alex");
    store.insert_member(PresenceScope::Backend("survival-2".to_owned()), "Alex");
    assert!(tracker.record(identity).await.is_err());

    assert!(tracker.end_session(identity, Some("Alex")).await.is_ok());

    assert_eq!(tracker.is_online(identity).await, Ok(false));
    assert_eq!(tracker.count(&PresenceScope::Network).await, Ok(0));
    assert_eq!(
        tracker
            .count(&PresenceScope::Backend("survival-2".to_owned()))
            .await,
        Ok(0)
    );
    assert!(tracker.end_session(identity, Some("Alex")).await.is_ok());
}
