use huddle_model::{PubSubEvent, Tier};

use crate::bus::EventBus;
use crate::error::Result;
use crate::jobs::{JobContext, JobDefinition, ScheduleSpec, job_fn};

/// Job name of the heartbeat publisher.
pub const HEARTBEAT_JOB: &str = "pubSubHealthCheck";

/// Declares the heartbeat as a cron job on `tier`. The store claim at each
/// fire instant keeps the heartbeat to one publisher cluster-wide.
pub fn heartbeat_job(bus: EventBus, tier: Tier, cron: &str) -> Result<JobDefinition> {
    let handler = job_fn(move |ctx: JobContext| {
        let bus = bus.clone();
        async move {
            bus.publish(PubSubEvent::heartbeat()).await?;
            ctx.span
                .in_scope(|| tracing::debug!(target: "huddle::watchdog", "heartbeat published"));
            Ok(())
        }
    });

    Ok(JobDefinition::new(HEARTBEAT_JOB, handler)?.schedule(ScheduleSpec::new(tier).cron(cron)?))
}
