use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use huddle_model::Tier;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{HuddleError, Result};
use crate::jobs::cron_expr::CronExpr;
use crate::jobs::definition::{DeclaredSchedule, JobContext, JobDefinition, JobHandler};
use crate::jobs::store::ScheduleStore;

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    Panicked,
    Cancelled,
}

#[derive(Clone)]
struct Entry {
    schedule: DeclaredSchedule,
    handler: Arc<dyn JobHandler>,
}

/// Fires installed cron schedules and runs on-demand triggers.
///
/// Each cron schedule gets one timer task. At a fire instant the runner
/// claims the instant in the store, so across all processes only one runs
/// it, then executes the handler on its own task. Errors and panics end that
/// run only.
pub struct JobRunner {
    store: Arc<dyn ScheduleStore>,
    tier: Tier,
    entries: HashMap<String, Entry>,
    shutdown: CancellationToken,
    timers: Mutex<Vec<JoinHandle<()>>>,
    runs: TaskTracker,
    shutdown_grace: Duration,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schedules: Vec<_> = self.entries.keys().collect();
        schedules.sort();
        f.debug_struct("JobRunner")
            .field("store", &self.store)
            .field("tier", &self.tier)
            .field("schedules", &schedules)
            .field("in_flight", &self.runs.len())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl JobRunner {
    pub fn new(store: Arc<dyn ScheduleStore>, tier: Tier, jobs: &[JobDefinition]) -> Self {
        let entries = jobs
            .iter()
            .flat_map(|job| {
                let handler = job.handler();
                job.declared_for(&tier).into_iter().map(move |schedule| {
                    (
                        schedule.name.clone(),
                        Entry {
                            schedule,
                            handler: Arc::clone(&handler),
                        },
                    )
                })
            })
            .collect();

        Self {
            store,
            tier,
            entries,
            shutdown: CancellationToken::new(),
            timers: Mutex::new(Vec::new()),
            runs: TaskTracker::new(),
            shutdown_grace: Duration::from_secs(30),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Spawns one timer per cron schedule. Call after reconciliation.
    pub async fn start(&self) -> Result<()> {
        let mut timers = self.timers.lock().await;
        if !timers.is_empty() {
            return Err(HuddleError::Internal("job runner already started".into()));
        }

        for entry in self.entries.values() {
            let Some(cron) = entry.schedule.cron.clone() else {
                continue;
            };
            timers.push(tokio::spawn(run_timer(
                entry.clone(),
                cron,
                Arc::clone(&self.store),
                self.runs.clone(),
                self.shutdown.clone(),
            )));
        }

        info!(
            target: "huddle::jobs",
            tier = %self.tier,
            timers = timers.len(),
            "job runner started"
        );
        Ok(())
    }

    /// Runs the schedule `name` once, now, and waits for it to finish.
    pub async fn trigger(&self, name: &str) -> Result<JobOutcome> {
        let entry = self.entries.get(name).cloned().ok_or_else(|| {
            HuddleError::Validation(format!("no schedule named `{name}` on tier {}", self.tier))
        })?;
        Ok(execute(entry, Utc::now(), &self.runs).await)
    }

    pub fn schedule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!(target: "huddle::jobs", "Initiating job runner shutdown");
        self.shutdown.cancel();

        let timers = {
            let mut guard = self.timers.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in timers {
            if let Err(err) = handle.await {
                warn!(target: "huddle::jobs", "schedule timer failed: {:?}", err);
            }
        }

        self.runs.close();
        if tokio::time::timeout(self.shutdown_grace, self.runs.wait()).await.is_err() {
            warn!(
                target: "huddle::jobs",
                in_flight = self.runs.len(),
                "jobs still running after shutdown grace"
            );
        }
        info!(target: "huddle::jobs", "Job runner shutdown complete");
        Ok(())
    }
}

async fn run_timer(
    entry: Entry,
    cron: CronExpr,
    store: Arc<dyn ScheduleStore>,
    runs: TaskTracker,
    shutdown: CancellationToken,
) {
    let name = entry.schedule.name.clone();
    loop {
        let now = Utc::now();
        let Some(fire_at) = cron.next_after(now) else {
            info!(target: "huddle::jobs", schedule = %name, "schedule has no further fire times");
            break;
        };
        let wait = (fire_at - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match store.claim_run(&name, fire_at).await {
            Ok(true) => {
                let entry = entry.clone();
                let tracker = runs.clone();
                runs.spawn(async move {
                    execute(entry, fire_at, &tracker).await;
                });
            }
            Ok(false) => {
                debug!(
                    target: "huddle::jobs",
                    schedule = %name,
                    %fire_at,
                    "fire instant claimed elsewhere"
                );
            }
            Err(err) => {
                warn!(
                    target: "huddle::jobs",
                    schedule = %name,
                    error = %err,
                    "failed to claim fire instant"
                );
            }
        }
    }
}

async fn execute(entry: Entry, fired_at: DateTime<Utc>, runs: &TaskTracker) -> JobOutcome {
    let Entry { schedule, handler } = entry;
    let span = info_span!(
        target: "huddle::jobs",
        "job",
        job = %schedule.job,
        schedule = %schedule.name,
        %fired_at
    );
    let ctx = JobContext {
        job: schedule.job.clone(),
        schedule: schedule.name.clone(),
        data: schedule.data.clone(),
        fired_at,
        span: span.clone(),
    };

    // Own task so a panic surfaces as a JoinError instead of unwinding here.
    let handle = runs.spawn(async move { handler.run(ctx).await }.instrument(span.clone()));
    let outcome = match handle.await {
        Ok(Ok(())) => JobOutcome::Succeeded,
        Ok(Err(err)) => JobOutcome::Failed(format!("{err:#}")),
        Err(join) if join.is_panic() => JobOutcome::Panicked,
        Err(_) => JobOutcome::Cancelled,
    };

    let _entered = span.enter();
    match &outcome {
        JobOutcome::Succeeded => info!(target: "huddle::jobs", "job finished"),
        JobOutcome::Failed(err) => error!(target: "huddle::jobs", error = %err, "job failed"),
        JobOutcome::Panicked => error!(target: "huddle::jobs", "job panicked"),
        JobOutcome::Cancelled => warn!(target: "huddle::jobs", "job cancelled"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::definition::{ScheduleSpec, job_fn};
    use crate::jobs::reconcile::reconcile;
    use crate::jobs::store::InMemoryScheduleStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tier() -> Tier {
        "staging".parse().unwrap()
    }

    #[tokio::test]
    async fn trigger_passes_declared_data() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let job = JobDefinition::new(
            "reindex",
            job_fn(move |ctx: JobContext| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().await = Some((ctx.schedule, ctx.data));
                    Ok(())
                }
            }),
        )
        .unwrap()
        .schedule(ScheduleSpec::new(tier()).with_data(json!({"batch": 50})));

        let store = Arc::new(InMemoryScheduleStore::new());
        let runner = JobRunner::new(store, tier(), &[job]);
        assert_eq!(runner.trigger("reindex").await.unwrap(), JobOutcome::Succeeded);
        assert_eq!(
            *seen.lock().await,
            Some(("reindex".to_string(), json!({"batch": 50})))
        );
        assert!(runner.trigger("missing").await.is_err());
    }

    #[tokio::test]
    async fn failures_and_panics_are_contained() {
        let failing = JobDefinition::new(
            "failing",
            job_fn(|_ctx: JobContext| async { anyhow::bail!("boom") }),
        )
        .unwrap()
        .schedule(ScheduleSpec::new(tier()));
        let panicking = JobDefinition::new(
            "panicking",
            job_fn(|_ctx: JobContext| async {
                if true {
                    panic!("handler bug");
                }
                Ok(())
            }),
        )
        .unwrap()
        .schedule(ScheduleSpec::new(tier()));

        let store = Arc::new(InMemoryScheduleStore::new());
        let runner = JobRunner::new(store, tier(), &[failing, panicking]);
        assert!(matches!(
            runner.trigger("failing").await.unwrap(),
            JobOutcome::Failed(msg) if msg.contains("boom")
        ));
        assert_eq!(runner.trigger("panicking").await.unwrap(), JobOutcome::Panicked);
    }

    #[tokio::test]
    async fn cron_schedules_fire_once_per_instant_across_runners() {
        let runs = Arc::new(AtomicUsize::new(0));
        let make_job = |runs: Arc<AtomicUsize>| {
            JobDefinition::new(
                "everySecond",
                job_fn(move |_ctx: JobContext| {
                    let runs = Arc::clone(&runs);
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap()
            .schedule(ScheduleSpec::new(tier()).cron("* * * * * *").unwrap())
        };

        let store: Arc<InMemoryScheduleStore> = Arc::new(InMemoryScheduleStore::new());
        let jobs = [make_job(Arc::clone(&runs))];
        reconcile(store.as_ref(), &jobs, &tier()).await.unwrap();

        // Two processes sharing one schedule table.
        let a = JobRunner::new(store.clone(), tier(), &jobs);
        let b = JobRunner::new(store.clone(), tier(), &[make_job(Arc::clone(&runs))]);
        a.start().await.unwrap();
        b.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();

        let fired = runs.load(Ordering::SeqCst);
        let last = store.installed().await.unwrap()["everySecond"].last_fired_at;
        assert!(last.is_some());
        assert!((2..=3).contains(&fired), "fired {fired} times");
    }
}
