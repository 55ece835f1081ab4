use std::sync::Arc;

use chrono::{Duration, Utc};
use keystone_core::{AppError, IdentityKey};
use keystone_domain::{
    AssignmentStatus, BroadcastMessage, RoleAssignment, RoleInput, StoredAssignment, SyncChannel,
};

use crate::test_support::{
    FakePresenceStore, FakeProfileRepository, FakeRoleRepository, RecordingPublisher, name, role,
};
use crate::{PresenceConfig, PresenceTracker, RoleGraph, SessionStart};

use super::{AssignRoleInput, RoleService};

struct Harness {
    service: RoleService,
    roles: Arc<FakeRoleRepository>,
    profiles: Arc<FakeProfileRepository>,
    publisher: Arc<RecordingPublisher>,
    presence: PresenceTracker,
    graph: Arc<RoleGraph>,
}

fn harness(roles: FakeRoleRepository) -> Harness {
    let roles = Arc::new(roles);
    let profiles = Arc::new(FakeProfileRepository::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let graph = Arc::new(RoleGraph::new(roles.clone(), name("default")));
    let presence = PresenceTracker::new(
        Arc::new(FakePresenceStore::default()),
        PresenceConfig::default(),
    )
    .unwrap_or_else(|_| unreachable!());

    Harness {
        service: RoleService::new(
            roles.clone(),
            profiles.clone(),
            graph.clone(),
            publisher.clone(),
            presence.clone(),
        ),
        roles,
        profiles,
        publisher,
        presence,
        graph,
    }
}

fn grant(role_name: &str, notify: bool, identity: IdentityKey) -> AssignRoleInput {
    AssignRoleInput {
        identity,
        role_name: role_name.to_owned(),
        granted_by: "console".to_owned(),
        duration: None,
        notify,
    }
}

#[tokio::test]
async fn bootstrap_creates_missing_fallback_role() {
    let harness = harness(FakeRoleRepository::default());

    let created = harness.service.bootstrap_defaults().await;

    assert!(created.is_ok());
    assert!(harness.roles.stored(&name("default")).is_some());
    assert!(harness.graph.catalog().await.contains(&name("default")));
}

#[tokio::test]
async fn bootstrap_rejects_inheriting_fallback_role() {
    let harness = harness(FakeRoleRepository::with_roles([
        role("member", 1, &[], &[]),
        role("default", 0, &["member"], &[]),
    ]));

    let result = harness.service.bootstrap_defaults().await;

    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn upsert_role_writes_through_and_publishes() {
    let harness = harness(FakeRoleRepository::default());
    let mut input = RoleInput::named("vip", 20);
    input.permissions = vec!["Chat.Color".to_owned()];

    let saved = harness.service.upsert_role(input).await;

    assert!(saved.is_ok());
    assert!(harness.roles.stored(&name("vip")).is_some());
    assert!(harness.graph.catalog().await.contains(&name("vip")));
    assert_eq!(
        harness.publisher.published(),
        vec![(
            SyncChannel::RoleDefinitions.as_str().to_owned(),
            "vip".to_owned()
        )]
    );
}

#[tokio::test]
async fn upsert_role_keeps_creation_timestamp() {
    let original = role("vip", 20, &[], &[]);
    let created_at = original.created_at();
    let harness = harness(FakeRoleRepository::with_roles([original]));

    let updated = harness
        .service
        .upsert_role(RoleInput::named("vip", 30))
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(updated.created_at(), created_at);
    assert_eq!(updated.weight(), 30);
}

#[tokio::test]
async fn upsert_role_rejects_inheritance_cycle() {
    let harness = harness(FakeRoleRepository::with_roles([
        role("a", 1, &["b"], &[]),
        role("b", 1, &["c"], &[]),
        role("c", 1, &[], &[]),
    ]));
    let mut input = RoleInput::named("c", 1);
    input.inherits = vec!["a".to_owned()];

    let result = harness.service.upsert_role(input).await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert!(harness.publisher.published().is_empty());
}

#[tokio::test]
async fn delete_role_refuses_fallback_and_held_roles() {
    let harness = harness(FakeRoleRepository::with_roles([
        role("default", 0, &[], &[]),
        role("vip", 20, &[], &[]),
    ]));
    let identity = IdentityKey::new();
    assert!(
        harness
            .service
            .assign_role(grant("vip", false, identity))
            .await
            .is_ok()
    );

    assert!(matches!(
        harness.service.delete_role("default").await,
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(
        harness.service.delete_role("vip").await,
        Err(AppError::Conflict(_))
    ));

    assert!(harness.service.remove_role(identity, "vip").await.is_ok());
    assert!(harness.service.delete_role("vip").await.is_ok());
    assert!(harness.roles.stored(&name("vip")).is_none());
    assert!(matches!(
        harness.service.delete_role("vip").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn assign_role_requires_existing_role() {
    let harness = harness(FakeRoleRepository::default());

    let result = harness
        .service
        .assign_role(grant("ghost", false, IdentityKey::new()))
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(harness.publisher.published().is_empty());
}

#[tokio::test]
async fn assign_role_rejects_out_of_range_duration() {
    let harness = harness(FakeRoleRepository::with_roles([role("vip", 20, &[], &[])]));
    let identity = IdentityKey::new();
    let mut input = grant("vip", false, identity);
    input.duration = Some(Duration::days(100_000_000));

    let result = harness.service.assign_role(input).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(harness.profiles.stored(identity).is_empty());
    assert!(harness.publisher.published().is_empty());
}

#[tokio::test]
async fn assign_role_to_offline_identity_keeps_notification_pending() {
    let harness = harness(FakeRoleRepository::with_roles([role("vip", 20, &[], &[])]));
    let identity = IdentityKey::new();

    let assignment = harness
        .service
        .assign_role(grant("vip", true, identity))
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(assignment.pending_notification());
    assert_eq!(
        harness.publisher.published(),
        vec![(
            SyncChannel::IdentityRoles.as_str().to_owned(),
            identity.to_string()
        )]
    );
}

#[tokio::test]
async fn assign_role_to_online_identity_broadcasts_activation() {
    let harness = harness(FakeRoleRepository::with_roles([role("vip", 20, &[], &[])]));
    let identity = IdentityKey::new();
    assert!(
        harness
            .presence
            .start_session(SessionStart {
                identity,
                display_name: "Alex".to_owned(),
                edge_id: "edge-1".to_owned(),
                backend: None,
                protocol_version: None,
            })
            .await
            .is_ok()
    );

    let assignment = harness
        .service
        .assign_role(grant("vip", true, identity))
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(!assignment.pending_notification());
    let published = harness.publisher.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].0, SyncChannel::NetworkBroadcast.as_str());
    assert_eq!(
        BroadcastMessage::decode(published[1].1.as_str()),
        Ok(BroadcastMessage::RoleActivated {
            identity,
            display_name: "Alex".to_owned(),
            role_name: "vip".to_owned(),
            role_display_name: "vip".to_owned(),
        })
    );
}

#[tokio::test]
async fn publish_failure_after_write_through_reports_unavailable() {
    let harness = harness(FakeRoleRepository::with_roles([role("vip", 20, &[], &[])]));
    let identity = IdentityKey::new();
    harness.publisher.set_offline(true);

    let result = harness
        .service
        .assign_role(grant("vip", false, identity))
        .await;

    assert!(matches!(result, Err(AppError::Unavailable(_))));
    assert_eq!(harness.profiles.stored(identity).len(), 1);
}

#[tokio::test]
async fn pause_and_resume_preserve_remaining_duration() {
    let harness = harness(FakeRoleRepository::with_roles([role("vip", 20, &[], &[])]));
    let identity = IdentityKey::new();
    let mut input = grant("vip", false, identity);
    input.duration = Some(Duration::hours(2));
    assert!(harness.service.assign_role(input).await.is_ok());

    let paused = harness
        .service
        .pause_assignment(identity, "vip")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(paused.is_paused());
    assert!(paused.expires_at().is_none());

    let resumed = harness
        .service
        .resume_assignment(identity, "vip")
        .await
        .unwrap_or_else(|_| unreachable!());
    let remaining = resumed
        .expires_at()
        .map(|expires_at| expires_at - Utc::now())
        .unwrap_or_else(Duration::zero);
    assert!(remaining > Duration::minutes(119));
    assert!(remaining <= Duration::hours(2));
}

#[tokio::test]
async fn remove_role_requires_held_assignment() {
    let harness = harness(FakeRoleRepository::with_roles([role("vip", 20, &[], &[])]));

    let result = harness.service.remove_role(IdentityKey::new(), "vip").await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn pending_notifications_are_delivered_once() {
    let harness = harness(FakeRoleRepository::with_roles([role("vip", 20, &[], &[])]));
    assert!(harness.graph.reload_all().await.is_ok());
    let identity = IdentityKey::new();
    harness.profiles.seed(
        identity,
        RoleAssignment::restore(StoredAssignment {
            role_name: name("vip"),
            granted_by: "console".to_owned(),
            granted_at: Utc::now(),
            expires_at: None,
            paused: false,
            paused_remaining_seconds: None,
            status: AssignmentStatus::Active,
            pending_notification: true,
        }),
    );

    assert_eq!(
        harness
            .service
            .deliver_pending_notifications(identity, "Alex")
            .await,
        Ok(1)
    );
    assert_eq!(
        harness
            .service
            .deliver_pending_notifications(identity, "Alex")
            .await,
        Ok(0)
    );
    assert!(
        harness
            .profiles
            .stored(identity)
            .iter()
            .all(|assignment| !assignment.pending_notification())
    );
}
