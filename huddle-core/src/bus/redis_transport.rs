use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink, PubSubStream};
use redis::{AsyncCommands, Msg};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::channel::ChannelPattern;
use crate::bus::transport::{Transport, TransportMessage};
use crate::error::{HuddleError, Result};

#[derive(Debug, Clone)]
pub struct RedisTransportConfig {
    pub inbound_capacity: usize,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for RedisTransportConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
            reconnect_base: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

enum Command {
    Subscribe(ChannelPattern, oneshot::Sender<Result<()>>),
    Unsubscribe(ChannelPattern, oneshot::Sender<Result<()>>),
}

impl Command {
    fn reject(self, reason: &str) {
        let (Command::Subscribe(_, ack) | Command::Unsubscribe(_, ack)) = self;
        let _ = ack.send(Err(HuddleError::Transport(reason.to_string())));
    }
}

enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

/// Redis PUBLISH / SUBSCRIBE / PSUBSCRIBE transport.
///
/// Publishing goes through a [`ConnectionManager`], which reconnects on its
/// own. Subscriptions live on a dedicated pub/sub connection owned by a
/// supervisor task; when that connection drops the task reconnects with
/// backoff and replays every active subscription.
pub struct RedisTransport {
    publisher: ConnectionManager,
    desired: Arc<Mutex<HashSet<ChannelPattern>>>,
    commands: mpsc::UnboundedSender<Command>,
    inbound: broadcast::Sender<TransportMessage>,
    shutdown: CancellationToken,
}

impl fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscription_count = self
            .desired
            .try_lock()
            .map(|guard| guard.len())
            .unwrap_or_default();

        f.debug_struct("RedisTransport")
            .field("publisher", &"ConnectionManager")
            .field("subscription_count", &subscription_count)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl RedisTransport {
    pub async fn connect(redis_url: &str, config: RedisTransportConfig) -> Result<Self> {
        info!(target: "huddle::bus", "Connecting to Redis pub/sub at {}", redis_url);

        let client = redis::Client::open(redis_url).map_err(|e| {
            HuddleError::Transport(format!("Failed to create Redis client: {e}"))
        })?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| HuddleError::Transport(format!("Failed to connect to Redis: {e}")))?;

        let (inbound, _) = broadcast::channel(config.inbound_capacity);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let transport = Self {
            publisher,
            desired: Arc::new(Mutex::new(HashSet::new())),
            commands,
            inbound,
            shutdown: CancellationToken::new(),
        };

        tokio::spawn(supervise(
            client,
            Arc::clone(&transport.desired),
            commands_rx,
            transport.inbound.clone(),
            transport.shutdown.clone(),
            config,
        ));

        Ok(transport)
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(make(ack))
            .map_err(|_| HuddleError::Transport("Redis subscriber task has stopped".into()))?;
        done.await
            .map_err(|_| HuddleError::Transport("Redis subscriber task dropped request".into()))?
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| HuddleError::Transport(format!("Redis PUBLISH failed: {e}")))?;
        debug!(target: "huddle::bus", channel, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, pattern: &ChannelPattern) -> Result<()> {
        self.desired.lock().await.insert(pattern.clone());
        let result = self
            .request(|ack| Command::Subscribe(pattern.clone(), ack))
            .await;
        if result.is_err() {
            self.desired.lock().await.remove(pattern);
        }
        result
    }

    async fn unsubscribe(&self, pattern: &ChannelPattern) -> Result<()> {
        self.desired.lock().await.remove(pattern);
        self.request(|ack| Command::Unsubscribe(pattern.clone(), ack))
            .await
    }

    fn messages(&self) -> broadcast::Receiver<TransportMessage> {
        self.inbound.subscribe()
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

async fn apply(sink: &mut PubSubSink, pattern: &ChannelPattern, subscribe: bool) -> Result<()> {
    let outcome = match (pattern, subscribe) {
        (ChannelPattern::Exact(name), true) => sink.subscribe(name).await,
        (ChannelPattern::Exact(name), false) => sink.unsubscribe(name).await,
        (ChannelPattern::Prefix(_), true) => sink.psubscribe(pattern.glob()).await,
        (ChannelPattern::Prefix(_), false) => sink.punsubscribe(pattern.glob()).await,
    };
    outcome.map_err(|e| {
        HuddleError::Transport(format!("Redis subscription change for {pattern} failed: {e}"))
    })
}

async fn open_session(
    client: &redis::Client,
    desired: &Mutex<HashSet<ChannelPattern>>,
) -> Result<(PubSubSink, PubSubStream)> {
    let pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| {
            HuddleError::Transport(format!("Failed to open Redis pub/sub connection: {e}"))
        })?;
    let (mut sink, stream) = pubsub.split();

    let patterns: Vec<ChannelPattern> = desired.lock().await.iter().cloned().collect();
    for pattern in &patterns {
        apply(&mut sink, pattern, true).await?;
    }
    if !patterns.is_empty() {
        info!(target: "huddle::bus", count = patterns.len(), "re-established Redis subscriptions");
    }
    Ok((sink, stream))
}

fn decode(message: &Msg) -> Option<TransportMessage> {
    let channel = message.get_channel_name().to_string();
    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(target: "huddle::bus", %channel, error = %err, "dropping non-text Redis payload");
            return None;
        }
    };
    let via = if message.from_pattern() {
        let glob: String = match message.get_pattern() {
            Ok(glob) => glob,
            Err(err) => {
                warn!(
                    target: "huddle::bus",
                    %channel,
                    error = %err,
                    "dropping pmessage without pattern"
                );
                return None;
            }
        };
        ChannelPattern::Prefix(glob.trim_end_matches('*').to_string())
    } else {
        ChannelPattern::Exact(channel.clone())
    };
    Some(TransportMessage { channel, via, payload })
}

async fn run_session(
    mut sink: PubSubSink,
    mut stream: PubSubStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    inbound: &broadcast::Sender<TransportMessage>,
    shutdown: &CancellationToken,
) -> SessionEnd {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
            command = commands.recv() => match command {
                Some(Command::Subscribe(pattern, ack)) => {
                    let _ = ack.send(apply(&mut sink, &pattern, true).await);
                }
                Some(Command::Unsubscribe(pattern, ack)) => {
                    let _ = ack.send(apply(&mut sink, &pattern, false).await);
                }
                None => return SessionEnd::Shutdown,
            },
            message = stream.next() => match message {
                Some(message) => {
                    if let Some(decoded) = decode(&message) {
                        let _ = inbound.send(decoded);
                    }
                }
                None => return SessionEnd::ConnectionLost,
            },
        }
    }
}

async fn supervise(
    client: redis::Client,
    desired: Arc<Mutex<HashSet<ChannelPattern>>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound: broadcast::Sender<TransportMessage>,
    shutdown: CancellationToken,
    config: RedisTransportConfig,
) {
    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match open_session(&client, &desired).await {
            Ok((sink, stream)) => {
                attempt = 0;
                debug!(target: "huddle::bus", "Redis subscriber connected");
                match run_session(sink, stream, &mut commands, &inbound, &shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::ConnectionLost => {
                        warn!(
                            target: "huddle::bus",
                            "Redis subscriber connection lost; reconnecting"
                        );
                    }
                }
            }
            Err(err) => {
                warn!(
                    target: "huddle::bus",
                    error = %err,
                    attempt,
                    "Redis subscriber connect failed"
                );
            }
        }

        let delay = config
            .reconnect_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(config.reconnect_max);
        attempt = attempt.saturating_add(1);

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    Some(command) => command.reject("Redis subscriber is reconnecting"),
                    None => return,
                },
            }
        }
    }
    info!(target: "huddle::bus", "Redis subscriber shutting down");
}
