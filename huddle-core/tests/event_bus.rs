mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_quiet, next, process, recorder};
use huddle_core::bus::{BusConfig, EventBus, InProcHub, ScopeFilter, handler_fn};
use huddle_model::events::{MessageRef, UserRef};
use huddle_model::{
    MessageId, OrgId, OrgScope, PubSubEvent, ScopeKeys, ThreadId, ThreadScope, Topic, UserId,
};
use tokio::sync::mpsc;

fn message_updated(thread_id: ThreadId) -> PubSubEvent {
    PubSubEvent::ThreadMessageUpdated {
        args: ThreadScope { thread_id },
        payload: MessageRef {
            message_id: MessageId::new(),
        },
    }
}

#[tokio::test]
async fn publish_reaches_every_subscribed_process_including_publisher() {
    let hub = InProcHub::default();
    let publisher = process(&hub).await;
    let listener = process(&hub).await;
    let thread = ThreadId::new();

    let (own, mut own_rx) = recorder();
    let (remote, mut remote_rx) = recorder();
    let filter = ScopeFilter::Exact(ScopeKeys::thread(thread));
    publisher
        .subscribe_arc(Topic::ThreadMessageUpdated, filter.clone(), own)
        .await
        .unwrap();
    listener
        .subscribe_arc(Topic::ThreadMessageUpdated, filter, remote)
        .await
        .unwrap();

    let event = message_updated(thread);
    publisher.publish(event.clone()).await.unwrap();

    assert_eq!(next(&mut own_rx).await, event);
    assert_eq!(next(&mut remote_rx).await, event);
}

#[tokio::test]
async fn exact_scope_does_not_see_other_scopes() {
    let hub = InProcHub::default();
    let bus = process(&hub).await;
    let (handler, mut rx) = recorder();
    bus.subscribe_arc(
        Topic::ThreadMessageUpdated,
        ScopeFilter::Exact(ScopeKeys::thread(ThreadId::new())),
        handler,
    )
    .await
    .unwrap();

    bus.publish(message_updated(ThreadId::new())).await.unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn wildcard_receives_every_scope_of_its_topic() {
    let hub = InProcHub::default();
    let publisher = process(&hub).await;
    let listener = process(&hub).await;
    let (handler, mut rx) = recorder();
    listener
        .subscribe_arc(Topic::OrgMemberAdded, ScopeFilter::Any, handler)
        .await
        .unwrap();

    for _ in 0..3 {
        publisher
            .publish(PubSubEvent::OrgMemberAdded {
                args: OrgScope { org_id: OrgId::new() },
                payload: UserRef { user_id: UserId::new() },
            })
            .await
            .unwrap();
    }
    for _ in 0..3 {
        assert_eq!(next(&mut rx).await.topic(), Topic::OrgMemberAdded);
    }

    // A different topic never matches the wildcard.
    publisher.publish(message_updated(ThreadId::new())).await.unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery_and_releases_channel() {
    let hub = InProcHub::default();
    let bus = process(&hub).await;
    let thread = ThreadId::new();
    let filter = ScopeFilter::Exact(ScopeKeys::thread(thread));

    let (first, mut first_rx) = recorder();
    let (second, mut second_rx) = recorder();
    let a = bus
        .subscribe_arc(Topic::ThreadMessageUpdated, filter.clone(), first)
        .await
        .unwrap();
    let b = bus
        .subscribe_arc(Topic::ThreadMessageUpdated, filter, second)
        .await
        .unwrap();
    assert_eq!(bus.subscription_count().await, 2);

    bus.unsubscribe(&a).await.unwrap();
    bus.publish(message_updated(thread)).await.unwrap();
    next(&mut second_rx).await;
    assert_quiet(&mut first_rx).await;

    bus.unsubscribe(&b).await.unwrap();
    assert_eq!(bus.subscription_count().await, 0);
    bus.publish(message_updated(thread)).await.unwrap();
    assert_quiet(&mut second_rx).await;
}

#[tokio::test]
async fn failing_and_panicking_handlers_do_not_affect_others() {
    let hub = InProcHub::default();
    let bus = process(&hub).await;
    let thread = ThreadId::new();
    let filter = ScopeFilter::Exact(ScopeKeys::thread(thread));

    bus.subscribe(
        Topic::ThreadMessageUpdated,
        filter.clone(),
        handler_fn(|_event| async { anyhow::bail!("handler failed") }),
    )
    .await
    .unwrap();
    bus.subscribe(
        Topic::ThreadMessageUpdated,
        filter.clone(),
        handler_fn(|_event| async {
            if true {
                panic!("handler bug");
            }
            Ok(())
        }),
    )
    .await
    .unwrap();
    let (healthy, mut rx) = recorder();
    bus.subscribe_arc(Topic::ThreadMessageUpdated, filter, healthy)
        .await
        .unwrap();

    bus.publish(message_updated(thread)).await.unwrap();
    bus.publish(message_updated(thread)).await.unwrap();
    next(&mut rx).await;
    next(&mut rx).await;
}

#[tokio::test]
async fn invalid_scope_is_rejected_before_publish() {
    let hub = InProcHub::default();
    let bus = process(&hub).await;
    let err = bus
        .subscribe(
            Topic::ThreadMessageUpdated,
            ScopeFilter::Exact(ScopeKeys::org(OrgId::new())),
            handler_fn(|_event| async { Ok(()) }),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn detached_publishes_keep_their_order() {
    let hub = InProcHub::default();
    let publisher = process(&hub).await;
    let listener = process(&hub).await;
    let thread = ThreadId::new();
    let (handler, mut rx) = recorder();
    listener
        .subscribe_arc(
            Topic::ThreadMessageUpdated,
            ScopeFilter::Exact(ScopeKeys::thread(thread)),
            handler,
        )
        .await
        .unwrap();

    let events: Vec<_> = (0..20).map(|_| message_updated(thread)).collect();
    for event in &events {
        publisher.publish_detached(event.clone()).unwrap();
    }
    for expected in &events {
        assert_eq!(&next(&mut rx).await, expected);
    }

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn slow_subscriber_still_receives_every_publish() {
    let hub = InProcHub::default();
    let bus = EventBus::new(
        Arc::new(hub.connect()),
        BusConfig {
            subscriber_buffer: 4,
            ..BusConfig::default()
        },
    );
    bus.start().await.unwrap();
    let thread = ThreadId::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(
        Topic::ThreadMessageUpdated,
        ScopeFilter::Exact(ScopeKeys::thread(thread)),
        handler_fn(move |event| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = tx.send(event);
                Ok(())
            }
        }),
    )
    .await
    .unwrap();

    let events: Vec<_> = (0..50).map(|_| message_updated(thread)).collect();
    for event in &events {
        bus.publish(event.clone()).await.unwrap();
    }
    for expected in &events {
        assert_eq!(&next(&mut rx).await, expected);
    }

    bus.shutdown().await.unwrap();
}
