mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_quiet, next, process, recorder};
use huddle_core::bus::{EventBus, InProcHub, ScopeFilter};
use huddle_core::presence::{
    InMemoryActorDirectory, InMemoryPresenceRepository, PresenceConfig, PresenceOutcome,
    PresenceTracker, PresenceUpdate,
};
use huddle_model::{
    Actor, ContextPresencePayload, Location, OrgId, PresenceChange, PubSubEvent, ScopeKeys, Topic,
    UserId,
};

fn doc(id: &str) -> Location {
    Location::new().with("page", "docs").with("doc", id)
}

fn docs_region() -> Location {
    Location::new().with("page", "docs")
}

struct Fixture {
    bus: EventBus,
    repository: Arc<InMemoryPresenceRepository>,
    directory: Arc<InMemoryActorDirectory>,
    tracker: PresenceTracker,
}

async fn fixture(hub: &InProcHub, config: PresenceConfig) -> Fixture {
    let bus = process(hub).await;
    let repository = Arc::new(InMemoryPresenceRepository::new());
    let directory = Arc::new(InMemoryActorDirectory::new());
    let tracker = PresenceTracker::new(
        bus.clone(),
        repository.clone(),
        directory.clone(),
        config,
    );
    Fixture {
        bus,
        repository,
        directory,
        tracker,
    }
}

fn payload(event: PubSubEvent) -> ContextPresencePayload {
    match event {
        PubSubEvent::ContextPresence { payload, .. } => payload,
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn durable_visit_is_stored_and_announced() {
    let hub = InProcHub::default();
    let fx = fixture(&hub, PresenceConfig::default()).await;
    let observer = process(&hub).await;
    let org = OrgId::new();
    let (handler, mut rx) = recorder();
    observer
        .subscribe_arc(Topic::ContextPresence, ScopeFilter::Exact(ScopeKeys::org(org)), handler)
        .await
        .unwrap();

    let alice = Actor::new(UserId::new(), "alice", org);
    let outcome = fx
        .tracker
        .set_user_present_context(&alice, PresenceUpdate::visit(doc("1"), docs_region()))
        .await
        .unwrap();
    let PresenceOutcome::Recorded { last_present_at } = outcome else {
        panic!("expected a recorded visit, got {outcome:?}");
    };

    let announced = payload(next(&mut rx).await);
    assert_eq!(announced.external_user_id, "alice");
    match announced.change {
        PresenceChange::Durable(visit) => {
            assert_eq!(visit.context, doc("1"));
            assert_eq!(visit.timestamp, last_present_at.timestamp_millis());
        }
        other => panic!("expected durable change, got {other:?}"),
    }

    let latest = fx.tracker.latest_for_context(org, &doc("1"), true).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest["alice"].context, doc("1"));

    let partial = fx
        .tracker
        .latest_for_context(org, &docs_region(), false)
        .await
        .unwrap();
    assert!(partial.contains_key("alice"));
}

#[tokio::test]
async fn repeated_durable_visits_share_one_row() {
    let hub = InProcHub::default();
    let fx = fixture(&hub, PresenceConfig::default()).await;
    let org = OrgId::new();
    let alice = Actor::new(UserId::new(), "alice", org);

    let mut stored = Vec::new();
    for _ in 0..2 {
        let outcome = fx
            .tracker
            .set_user_present_context(&alice, PresenceUpdate::visit(doc("1"), docs_region()))
            .await
            .unwrap();
        let PresenceOutcome::Recorded { last_present_at } = outcome else {
            panic!("expected a recorded visit, got {outcome:?}");
        };
        stored.push(last_present_at);
    }

    assert!(stored[1] >= stored[0]);
    assert_eq!(fx.repository.visit_count().await, 1);
    assert_eq!(fx.repository.location_count().await, 1);

    let latest = fx.tracker.latest_for_context(org, &doc("1"), true).await.unwrap();
    assert_eq!(latest["alice"].last_present_at, stored[1]);
}

#[tokio::test]
async fn deactivated_users_are_hidden_from_latest() {
    let hub = InProcHub::default();
    let fx = fixture(&hub, PresenceConfig::default()).await;
    let org = OrgId::new();
    let alice = Actor::new(UserId::new(), "alice", org);
    let bob = Actor::new(UserId::new(), "bob", org);

    for actor in [&alice, &bob] {
        fx.tracker
            .set_user_present_context(actor, PresenceUpdate::visit(doc("1"), docs_region()))
            .await
            .unwrap();
    }
    fx.directory.deactivate(org, bob.user_id).await;

    let latest = fx.tracker.latest_for_context(org, &doc("1"), true).await.unwrap();
    assert_eq!(latest.keys().collect::<Vec<_>>(), ["alice"]);
}

#[tokio::test]
async fn ephemeral_presence_supersedes_within_region() {
    let hub = InProcHub::default();
    let fx = fixture(&hub, PresenceConfig::default()).await;
    let org = OrgId::new();
    let (handler, mut rx) = recorder();
    fx.bus
        .subscribe_arc(Topic::ContextPresence, ScopeFilter::Exact(ScopeKeys::org(org)), handler)
        .await
        .unwrap();
    let alice = Actor::new(UserId::new(), "alice", org);

    fx.tracker
        .set_user_present_context(&alice, PresenceUpdate::arrive(doc("1"), docs_region()))
        .await
        .unwrap();
    fx.tracker
        .set_user_present_context(&alice, PresenceUpdate::arrive(doc("2"), docs_region()))
        .await
        .unwrap();

    let first = payload(next(&mut rx).await);
    let second = payload(next(&mut rx).await);
    let (PresenceChange::Ephemeral(first), PresenceChange::Ephemeral(second)) =
        (first.change, second.change)
    else {
        panic!("expected ephemeral changes");
    };
    assert_eq!(first.arrived, Some(doc("1")));
    assert_eq!(second.arrived, Some(doc("2")));
    assert_eq!(second.departed, Some(doc("1")));
    assert!(second.sequence_num > first.sequence_num);

    // Same context again renews the TTL and advances the sequence without announcing.
    let refresh = fx
        .tracker
        .set_user_present_context(&alice, PresenceUpdate::arrive(doc("2"), docs_region()))
        .await
        .unwrap();
    assert_eq!(refresh, PresenceOutcome::Unchanged);
    assert_quiet(&mut rx).await;

    let snapshot = fx.tracker.user_presence(org, "alice").await;
    assert_eq!(snapshot.contexts, vec![doc("2")]);
    assert!(snapshot.sequence_num > second.sequence_num);
}

#[tokio::test]
async fn stale_leave_changes_nothing() {
    let hub = InProcHub::default();
    let fx = fixture(&hub, PresenceConfig::default()).await;
    let org = OrgId::new();
    let alice = Actor::new(UserId::new(), "alice", org);

    fx.tracker
        .set_user_present_context(&alice, PresenceUpdate::arrive(doc("2"), docs_region()))
        .await
        .unwrap();
    let outcome = fx
        .tracker
        .set_user_present_context(&alice, PresenceUpdate::leave(doc("1"), docs_region()))
        .await
        .unwrap();
    assert_eq!(outcome, PresenceOutcome::Unchanged);
    assert_eq!(fx.tracker.all_user_presence(org).await["alice"], vec![doc("2")]);

    let outcome = fx
        .tracker
        .set_user_present_context(&alice, PresenceUpdate::leave(doc("2"), docs_region()))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        PresenceOutcome::Changed(change) if change.departed == Some(doc("2"))
    ));
    assert!(fx.tracker.all_user_presence(org).await.is_empty());
}

#[tokio::test]
async fn invalid_updates_leave_no_trace() {
    let hub = InProcHub::default();
    let fx = fixture(&hub, PresenceConfig::default()).await;
    let org = OrgId::new();
    let (handler, mut rx) = recorder();
    fx.bus
        .subscribe_arc(Topic::ContextPresence, ScopeFilter::Any, handler)
        .await
        .unwrap();
    let alice = Actor::new(UserId::new(), "alice", org);

    let mut retraction = PresenceUpdate::visit(doc("1"), docs_region());
    retraction.present = false;
    let err = fx
        .tracker
        .set_user_present_context(&alice, retraction)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let outside = PresenceUpdate::arrive(doc("1"), Location::new().with("page", "inbox"));
    assert!(fx.tracker.set_user_present_context(&alice, outside).await.is_err());

    assert_quiet(&mut rx).await;
    assert!(fx.tracker.latest_for_context(org, &doc("1"), true).await.unwrap().is_empty());
    assert!(fx.tracker.all_user_presence(org).await.is_empty());
}

#[tokio::test]
async fn expired_presence_departs() {
    let hub = InProcHub::default();
    let fx = fixture(
        &hub,
        PresenceConfig {
            ttl: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(25),
        },
    )
    .await;
    fx.tracker.start().await.unwrap();
    let org = OrgId::new();
    let (handler, mut rx) = recorder();
    fx.bus
        .subscribe_arc(Topic::ContextPresence, ScopeFilter::Exact(ScopeKeys::org(org)), handler)
        .await
        .unwrap();
    let alice = Actor::new(UserId::new(), "alice", org);

    fx.tracker
        .set_user_present_context(&alice, PresenceUpdate::arrive(doc("1"), docs_region()))
        .await
        .unwrap();
    next(&mut rx).await;

    let departure = payload(next(&mut rx).await);
    match departure.change {
        PresenceChange::Ephemeral(change) => {
            assert_eq!(change.arrived, None);
            assert_eq!(change.departed, Some(doc("1")));
        }
        other => panic!("expected ephemeral departure, got {other:?}"),
    }
    assert!(fx.tracker.user_presence(org, "alice").await.contexts.is_empty());

    fx.tracker.shutdown().await.unwrap();
}
