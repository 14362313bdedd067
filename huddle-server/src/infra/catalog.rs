//! Jobs this process declares. Reconciliation installs exactly this set for
//! the active tier.

use huddle_config::Config;
use huddle_core::{Result, bus::EventBus, jobs::JobDefinition, watchdog::heartbeat_job};

pub fn declared_jobs(bus: &EventBus, config: &Config) -> Result<Vec<JobDefinition>> {
    Ok(vec![heartbeat_job(
        bus.clone(),
        config.tier.clone(),
        &config.watchdog.heartbeat_cron,
    )?])
}
