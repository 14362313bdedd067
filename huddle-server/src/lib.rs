//! # Huddle Server
//!
//! One coordination process: event bus, heartbeat watchdog, presence
//! tracker and the job runner, wired from [`huddle_config::Config`].
//!
//! Redis and Postgres are optional. Without them the process runs on the
//! in-process bus and in-memory stores, which suits single-node development.

pub mod infra;
