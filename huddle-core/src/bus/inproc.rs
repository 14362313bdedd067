use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::channel::ChannelPattern;
use crate::bus::transport::{Transport, TransportMessage};
use crate::error::{HuddleError, Result};

#[derive(Debug, Clone)]
struct HubMessage {
    channel: String,
    payload: String,
}

/// Process-local stand-in for a pub/sub broker. Every transport connected
/// to the same hub behaves like a separate process attached to one Redis
/// instance, which is how multi-process behaviour is tested.
#[derive(Debug, Clone)]
pub struct InProcHub {
    sender: broadcast::Sender<HubMessage>,
    capacity: usize,
}

impl InProcHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Attaches a new transport. Must be called inside a tokio runtime.
    pub fn connect(&self) -> InProcTransport {
        InProcTransport::attach(self.sender.clone(), self.capacity)
    }
}

impl Default for InProcHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub struct InProcTransport {
    hub: broadcast::Sender<HubMessage>,
    subscriptions: Arc<RwLock<HashSet<ChannelPattern>>>,
    inbound: broadcast::Sender<TransportMessage>,
    online: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl fmt::Debug for InProcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscription_count = self
            .subscriptions
            .try_read()
            .map(|guard| guard.len())
            .unwrap_or_default();

        f.debug_struct("InProcTransport")
            .field("subscription_count", &subscription_count)
            .field("online", &self.online.load(Ordering::Acquire))
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl InProcTransport {
    fn attach(hub: broadcast::Sender<HubMessage>, capacity: usize) -> Self {
        let (inbound, _) = broadcast::channel(capacity);
        let transport = Self {
            hub,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            inbound,
            online: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        };
        transport.spawn_relay();
        transport
    }

    /// Simulates losing (`false`) and regaining (`true`) the broker
    /// connection. While offline, publishes and subscribes fail and inbound
    /// traffic is lost; subscriptions survive and resume on reconnect.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(HuddleError::Transport(
                "in-process transport is offline".into(),
            ))
        }
    }

    fn spawn_relay(&self) {
        let mut rx = self.hub.subscribe();
        let subscriptions = Arc::clone(&self.subscriptions);
        let inbound = self.inbound.clone();
        let online = Arc::clone(&self.online);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(message) => {
                            if !online.load(Ordering::Acquire) {
                                continue;
                            }
                            let guard = subscriptions.read().await;
                            for pattern in guard.iter().filter(|p| p.matches(&message.channel)) {
                                let _ = inbound.send(TransportMessage {
                                    channel: message.channel.clone(),
                                    via: pattern.clone(),
                                    payload: message.payload.clone(),
                                });
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(target: "huddle::bus", skipped, "in-process relay lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }
}

impl Drop for InProcTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for InProcTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        self.ensure_online()?;
        // No receivers only means nobody is attached to the hub.
        let _ = self.hub.send(HubMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &ChannelPattern) -> Result<()> {
        self.ensure_online()?;
        self.subscriptions.write().await.insert(pattern.clone());
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &ChannelPattern) -> Result<()> {
        self.subscriptions.write().await.remove(pattern);
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<TransportMessage> {
        self.inbound.subscribe()
    }

    fn kind(&self) -> &'static str {
        "inproc"
    }
}
