//! # Huddle Core
//!
//! Real-time coordination for a fleet of backend processes:
//!
//! - **Event bus**: typed publish/subscribe over a pluggable transport
//!   (Redis, or an in-process hub for tests and single-node development)
//! - **Watchdog**: alerts when the bus stops carrying heartbeats
//! - **Presence**: durable visit history and TTL-bound live presence
//! - **Jobs**: cron schedules per deployment tier, reconciled at boot and
//!   fired once per instant across the fleet
//!
//! ## Feature Flags
//!
//! - `database`: Postgres stores, Redis transport and embedded migrations
//! - `postgres-tests`: runs the `#[sqlx::test]` suites
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Event bus, channel naming and transports
pub mod bus;

/// Connection pool and Postgres-backed stores
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod database;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Error types and error handling utilities
pub mod error;

/// Scheduled jobs and boot reconciliation
pub mod jobs;

/// Durable and ephemeral presence
pub mod presence;

/// Heartbeat watchdog and alert sinks
pub mod watchdog;

pub use error::{HuddleError, Result};
