use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use huddle_model::{PubSubEvent, ScopeKeys, Topic};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::channel::{ChannelPattern, channel_name};
use crate::bus::handler::EventHandler;
use crate::bus::transport::{Transport, TransportMessage};
use crate::error::{HuddleError, Result};

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Backlog per subscription at which a slow handler is reported.
    /// Queues are unbounded; nothing is dropped.
    pub subscriber_buffer: usize,
    pub shutdown_grace: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Which scopes of a topic a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    Exact(ScopeKeys),
    Any,
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    topic: Topic,
    pattern: ChannelPattern,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn pattern(&self) -> &ChannelPattern {
        &self.pattern
    }
}

struct Slot {
    id: u64,
    topic: Topic,
    queue: mpsc::UnboundedSender<PubSubEvent>,
    backlog: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

struct BusInner {
    transport: Arc<dyn Transport>,
    config: BusConfig,
    registry: Mutex<HashMap<ChannelPattern, Vec<Slot>>>,
    next_id: AtomicU64,
    inbound: Mutex<Option<broadcast::Receiver<TransportMessage>>>,
    outbox_tx: mpsc::UnboundedSender<PubSubEvent>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<PubSubEvent>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Typed publish/subscribe over a [`Transport`].
///
/// One instance is built at process start and shared by handle (`clone` is
/// cheap). Every subscription drains its own queue on its own task, so a
/// slow handler only delays itself and never loses events.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channel_count = self
            .inner
            .registry
            .try_lock()
            .map(|guard| guard.len())
            .unwrap_or_default();

        f.debug_struct("EventBus")
            .field("transport", &self.inner.transport.kind())
            .field("config", &self.inner.config)
            .field("channel_count", &channel_count)
            .field("started", &self.inner.started.load(Ordering::Acquire))
            .field("shutdown_cancelled", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl EventBus {
    pub fn new(transport: Arc<dyn Transport>, config: BusConfig) -> Self {
        // Listen before `start` so nothing published after a subscribe is
        // missed while the dispatcher spins up.
        let inbound = transport.messages();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(BusInner {
                transport,
                config,
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                inbound: Mutex::new(Some(inbound)),
                outbox_tx,
                outbox_rx: Mutex::new(Some(outbox_rx)),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport)
    }

    /// Spawns the inbound dispatcher and the outbox drain.
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(HuddleError::Internal("event bus already started".into()));
        }

        let inbound = self
            .inner
            .inbound
            .lock()
            .await
            .take()
            .ok_or_else(|| HuddleError::Internal("event bus inbound stream missing".into()))?;
        let outbox = self
            .inner
            .outbox_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| HuddleError::Internal("event bus outbox missing".into()))?;

        let dispatcher = self.spawn_dispatcher(inbound);
        let outbox = self.spawn_outbox(outbox);

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(dispatcher);
        tasks.push(outbox);

        info!(target: "huddle::bus", transport = self.inner.transport.kind(), "event bus started");
        Ok(())
    }

    /// Validates `event` and hands it to the transport. Returns once handed
    /// off; failures are logged and returned without retrying.
    pub async fn publish(&self, event: PubSubEvent) -> Result<()> {
        event.validate()?;
        self.inner.send(&event).await
    }

    /// Validates `event` and queues it for publishing without waiting.
    ///
    /// Queued events go out in the order they were queued. Transport
    /// failures are only logged.
    pub fn publish_detached(&self, event: PubSubEvent) -> Result<()> {
        event.validate()?;
        self.inner
            .outbox_tx
            .send(event)
            .map_err(|_| HuddleError::Internal("event bus outbox is closed".into()))
    }

    pub async fn subscribe(
        &self,
        topic: Topic,
        filter: ScopeFilter,
        handler: impl EventHandler,
    ) -> Result<Subscription> {
        self.subscribe_arc(topic, filter, Arc::new(handler)).await
    }

    pub async fn subscribe_arc(
        &self,
        topic: Topic,
        filter: ScopeFilter,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription> {
        let pattern = match &filter {
            ScopeFilter::Exact(scope) => {
                topic.validate_scope(scope)?;
                ChannelPattern::Exact(channel_name(topic, scope))
            }
            ScopeFilter::Any => ChannelPattern::topic_wildcard(topic),
        };

        let mut registry = self.inner.registry.lock().await;
        if !registry.contains_key(&pattern) {
            self.inner
                .transport
                .subscribe(&pattern)
                .await
                .inspect_err(|err| {
                    warn!(
                        target: "huddle::bus",
                        %topic,
                        %pattern,
                        error = %err,
                        "subscribe failed"
                    );
                })?;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let task = spawn_drain(
            id,
            topic,
            rx,
            Arc::clone(&backlog),
            handler,
            self.inner.shutdown.clone(),
        );
        registry.entry(pattern.clone()).or_default().push(Slot {
            id,
            topic,
            queue,
            backlog,
            task,
        });

        debug!(target: "huddle::bus", subscription = id, %topic, %pattern, "subscribed");
        Ok(Subscription { id, topic, pattern })
    }

    /// Stops delivery to `subscription`. The transport channel is released
    /// once no subscription on it remains.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut registry = self.inner.registry.lock().await;
        let Some(slots) = registry.get_mut(&subscription.pattern) else {
            return Ok(());
        };
        if let Some(index) = slots.iter().position(|slot| slot.id == subscription.id) {
            // Dropping the sender ends the drain task once queued events
            // are handled.
            slots.swap_remove(index);
        }
        if slots.is_empty() {
            registry.remove(&subscription.pattern);
            self.inner
                .transport
                .unsubscribe(&subscription.pattern)
                .await?;
        }
        debug!(target: "huddle::bus", subscription = subscription.id, "unsubscribed");
        Ok(())
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner
            .registry
            .lock()
            .await
            .values()
            .map(Vec::len)
            .sum()
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!(target: "huddle::bus", "Initiating event bus shutdown");
        self.inner.shutdown.cancel();

        let tasks = {
            let mut guard = self.inner.tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in tasks {
            match tokio::time::timeout(self.inner.config.shutdown_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(target: "huddle::bus", "bus task failed: {:?}", e),
                Err(_) => warn!(target: "huddle::bus", "bus task timed out during shutdown"),
            }
        }

        let drained: Vec<(ChannelPattern, Vec<Slot>)> =
            self.inner.registry.lock().await.drain().collect();
        for (pattern, slots) in drained {
            for slot in slots {
                slot.task.abort();
            }
            if let Err(err) = self.inner.transport.unsubscribe(&pattern).await {
                debug!(
                    target: "huddle::bus",
                    %pattern,
                    error = %err,
                    "unsubscribe during shutdown failed"
                );
            }
        }

        info!(target: "huddle::bus", "Event bus shutdown complete");
        Ok(())
    }

    fn spawn_dispatcher(
        &self,
        mut inbound: broadcast::Receiver<TransportMessage>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(target: "huddle::bus", "Event dispatcher shutting down");
                        break;
                    }
                    received = inbound.recv() => match received {
                        Ok(message) => inner.dispatch(message).await,
                        // Dispatch never waits on handlers, so this only
                        // happens when the process is starved of CPU.
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            error!(
                                target: "huddle::bus",
                                skipped,
                                "event dispatcher lagged behind the transport"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    fn spawn_outbox(&self, mut outbox: mpsc::UnboundedReceiver<PubSubEvent>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    next = outbox.recv() => match next {
                        Some(event) => {
                            let _ = inner.send(&event).await;
                        }
                        None => break,
                    },
                    _ = shutdown.cancelled() => {
                        // Flush what was queued before shutdown.
                        while let Ok(event) = outbox.try_recv() {
                            let _ = inner.send(&event).await;
                        }
                        break;
                    }
                }
            }
        })
    }
}

impl BusInner {
    async fn send(&self, event: &PubSubEvent) -> Result<()> {
        let topic = event.topic();
        let channel = channel_name(topic, &event.scope());
        let payload = event.to_json()?;
        self.transport
            .publish(&channel, payload)
            .await
            .inspect_err(|err| {
                warn!(target: "huddle::bus", %topic, %channel, error = %err, "publish failed");
            })
    }

    async fn dispatch(&self, message: TransportMessage) {
        let event = match PubSubEvent::from_json(&message.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    target: "huddle::bus",
                    channel = %message.channel,
                    error = %err,
                    "dropping undecodable event"
                );
                return;
            }
        };
        if channel_name(event.topic(), &event.scope()) != message.channel {
            warn!(
                target: "huddle::bus",
                channel = %message.channel,
                topic = %event.topic(),
                "dropping event that does not belong to its channel"
            );
            return;
        }

        let registry = self.registry.lock().await;
        let Some(slots) = registry.get(&message.via) else {
            return;
        };
        let threshold = self.config.subscriber_buffer.max(1);
        for slot in slots {
            let queued = slot.backlog.fetch_add(1, Ordering::AcqRel) + 1;
            if slot.queue.send(event.clone()).is_err() {
                // Drain task is gone; the slot is being removed.
                slot.backlog.fetch_sub(1, Ordering::AcqRel);
                continue;
            }
            if queued == threshold {
                warn!(
                    target: "huddle::bus",
                    subscription = slot.id,
                    topic = %slot.topic,
                    queued,
                    "subscriber is falling behind"
                );
            }
        }
    }
}

fn spawn_drain(
    id: u64,
    topic: Topic,
    mut rx: mpsc::UnboundedReceiver<PubSubEvent>,
    backlog: Arc<AtomicUsize>,
    handler: Arc<dyn EventHandler>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            backlog.fetch_sub(1, Ordering::AcqRel);
            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        target: "huddle::bus",
                        subscription = id,
                        %topic,
                        error = %err,
                        "event handler failed"
                    );
                }
                Err(_) => {
                    error!(
                        target: "huddle::bus",
                        subscription = id,
                        %topic,
                        "event handler panicked"
                    );
                }
            }
        }
    })
}
