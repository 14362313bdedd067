#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use huddle_core::bus::{BusConfig, EventBus, EventHandler, InProcHub, handler_fn};
use huddle_model::PubSubEvent;
use tokio::sync::mpsc;

/// Starts a bus on its own transport attached to `hub`, standing in for one
/// backend process.
pub async fn process(hub: &InProcHub) -> EventBus {
    let bus = EventBus::new(Arc::new(hub.connect()), BusConfig::default());
    bus.start().await.expect("bus starts");
    bus
}

pub type Recorded = mpsc::UnboundedReceiver<PubSubEvent>;

/// Handler that forwards every event it sees.
pub fn recorder() -> (Arc<dyn EventHandler>, Recorded) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |event| {
        let _ = tx.send(event);
        futures::future::ready(Ok(()))
    });
    (Arc::new(handler), rx)
}

pub async fn next(rx: &mut Recorded) -> PubSubEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within timeout")
        .expect("recorder open")
}

/// Waits briefly and asserts nothing more arrived. A recorder whose
/// subscription is gone counts as quiet.
pub async fn assert_quiet(rx: &mut Recorded) {
    let got = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    if let Ok(Some(event)) = got {
        panic!("unexpected event: {event:?}");
    }
}
