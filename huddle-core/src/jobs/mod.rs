//! Scheduled background jobs.
//!
//! Jobs declare cron schedules per deployment tier. At boot the declared set
//! for the active tier is reconciled against the durable schedule table,
//! then [`JobRunner`] fires installed schedules. Each fire instant is claimed
//! in the store, so one process runs it.

pub mod cron_expr;
pub mod definition;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod postgres;
pub mod reconcile;
pub mod runner;
pub mod store;

pub use cron_expr::CronExpr;
pub use definition::{
    DeclaredSchedule, FnJob, JobContext, JobDefinition, JobHandler, ScheduleSpec, job_fn,
};
#[cfg(feature = "database")]
pub use postgres::PostgresScheduleStore;
pub use reconcile::{
    ReconciliationPlan, apply_plan, declared_schedules, delete_stale, plan_reconciliation,
    reconcile, register,
};
pub use runner::{JobOutcome, JobRunner};
pub use store::{InMemoryScheduleStore, InstalledSchedule, InstalledSchedules, ScheduleStore};
