//! Core data model definitions shared across Huddle crates.
#![allow(missing_docs)]

pub mod error;
pub mod events;
pub mod ids;
pub mod location;
pub mod tier;
pub mod topic;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use events::{
    ContextPresencePayload, DurableVisit, EphemeralChange, OrgScope, PageScope,
    PresenceChange, PubSubEvent, ThreadScope, UserScope,
};
pub use ids::{Actor, MessageId, NotificationId, OrgId, ThreadId, UserId};
pub use location::{EntityMetadata, Location, LocationValue, location_compare};
pub use tier::Tier;
pub use topic::{ScopeKeys, Topic};
