use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use huddle_model::PubSubEvent;

/// Callback invoked for every event delivered to a subscription.
///
/// Errors are logged by the bus and never reach other handlers.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: PubSubEvent) -> anyhow::Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("fn", &std::any::type_name::<F>())
            .finish()
    }
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(PubSubEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(PubSubEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: PubSubEvent) -> anyhow::Result<()> {
        (self.f)(event).await
    }
}
