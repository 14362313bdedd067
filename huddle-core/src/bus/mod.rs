//! Publish/subscribe event bus and its transports.

pub mod channel;
pub mod event_bus;
pub mod handler;
pub mod inproc;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod redis_transport;
pub mod transport;

pub use channel::{ChannelPattern, channel_name};
pub use event_bus::{BusConfig, EventBus, ScopeFilter, Subscription};
pub use handler::{EventHandler, FnHandler, handler_fn};
pub use inproc::{InProcHub, InProcTransport};
#[cfg(feature = "database")]
pub use redis_transport::{RedisTransport, RedisTransportConfig};
pub use transport::{Transport, TransportMessage};
