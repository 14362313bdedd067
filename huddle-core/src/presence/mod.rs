//! Presence tracking.
//!
//! Durable presence is a monotonic visit log in the store ("last seen on this
//! page"). Ephemeral presence lives in process memory with a TTL ("on this
//! page right now"); each actor holds at most one ephemeral context per
//! exclusivity region. Both kinds announce changes on `context-presence`.

pub mod ephemeral;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod postgres;
pub mod repository;
pub mod tracker;
pub mod validation;

pub use ephemeral::{EphemeralEntry, EphemeralPresence, Expired, UserPresence};
#[cfg(feature = "database")]
pub use postgres::{PostgresActorDirectory, PostgresPresenceRepository};
pub use repository::{
    ActorDirectory, InMemoryActorDirectory, InMemoryPresenceRepository, LatestVisit,
    PresenceRepository,
};
pub use tracker::{
    DEFAULT_PRESENCE_TTL, DEFAULT_SWEEP_INTERVAL, PresenceConfig, PresenceOutcome, PresenceTracker,
};
pub use validation::PresenceUpdate;
