use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::bus::channel::ChannelPattern;
use crate::error::Result;

/// A message received from the transport.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub channel: String,
    /// The subscription that matched. A channel covered by both an exact
    /// and a prefix subscription is delivered once per subscription.
    pub via: ChannelPattern,
    pub payload: String,
}

/// At-least-once publish/subscribe medium shared by every process.
///
/// Implementations keep the set of active subscriptions and re-establish it
/// after a reconnect without involving the caller.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Hands `payload` to the medium. Returns once handed off, not once
    /// delivered.
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Resolves once the medium confirms the subscription, so a publish
    /// issued afterwards is observed.
    async fn subscribe(&self, pattern: &ChannelPattern) -> Result<()>;

    async fn unsubscribe(&self, pattern: &ChannelPattern) -> Result<()>;

    /// Inbound stream for every active subscription.
    fn messages(&self) -> broadcast::Receiver<TransportMessage>;

    fn kind(&self) -> &'static str;
}
