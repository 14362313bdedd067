use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_model::Tier;
use serde_json::Value;

use crate::error::{HuddleError, Result};
use crate::jobs::cron_expr::CronExpr;

/// Everything a handler gets for one run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: String,
    pub schedule: String,
    pub data: Value,
    pub fired_at: DateTime<Utc>,
    /// Span the run executes in; log through it to tag output with the job.
    pub span: tracing::Span,
}

/// Runs may be duplicated (a manual trigger racing a cron fire, a retry
/// after a crash), so handlers must be idempotent.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
}

pub struct FnJob<F> {
    f: F,
}

impl<F> fmt::Debug for FnJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob")
            .field("fn", &std::any::type_name::<F>())
            .finish()
    }
}

pub fn job_fn<F, Fut>(f: F) -> FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnJob { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        (self.f)(ctx).await
    }
}

/// One schedule a job asks for on a tier. Without a cron expression the
/// schedule is installed but only runs when triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSpec {
    pub tier: Tier,
    pub name: Option<String>,
    pub cron: Option<CronExpr>,
    pub data: Value,
}

impl ScheduleSpec {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            name: None,
            cron: None,
            data: Value::Object(Default::default()),
        }
    }

    /// Distinguishes several schedules of the same job.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cron(mut self, expression: &str) -> Result<Self> {
        self.cron = Some(CronExpr::parse(expression)?);
        Ok(self)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A schedule as it should exist in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredSchedule {
    pub name: String,
    pub job: String,
    pub tier: Tier,
    pub cron: Option<CronExpr>,
    pub data: Value,
}

/// A named job, its handler, and the schedules it declares per tier.
#[derive(Clone)]
pub struct JobDefinition {
    name: String,
    handler: Arc<dyn JobHandler>,
    schedules: Vec<ScheduleSpec>,
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("schedules", &self.schedules)
            .finish_non_exhaustive()
    }
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, handler: impl JobHandler) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() || name.contains(':') {
            return Err(HuddleError::Validation(format!(
                "job name `{name}` must be non-empty and must not contain `:`"
            )));
        }
        Ok(Self {
            name,
            handler: Arc::new(handler),
            schedules: Vec::new(),
        })
    }

    pub fn schedule(mut self, spec: ScheduleSpec) -> Self {
        self.schedules.push(spec);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> Arc<dyn JobHandler> {
        Arc::clone(&self.handler)
    }

    pub fn schedules(&self) -> &[ScheduleSpec] {
        &self.schedules
    }

    /// Store row name: the job name, or `job:schedule` for named schedules.
    pub fn schedule_name(&self, spec: &ScheduleSpec) -> String {
        match &spec.name {
            Some(name) => format!("{}:{name}", self.name),
            None => self.name.clone(),
        }
    }

    /// Schedules this job declares for `tier`.
    pub fn declared_for(&self, tier: &Tier) -> Vec<DeclaredSchedule> {
        self.schedules
            .iter()
            .filter(|spec| &spec.tier == tier)
            .map(|spec| DeclaredSchedule {
                name: self.schedule_name(spec),
                job: self.name.clone(),
                tier: spec.tier.clone(),
                cron: spec.cron.clone(),
                data: spec.data.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> FnJob<impl Fn(JobContext) -> futures::future::Ready<anyhow::Result<()>>> {
        job_fn(|_ctx| futures::future::ready(Ok(())))
    }

    #[test]
    fn declared_for_filters_by_tier_and_names_rows() {
        let staging: Tier = "staging".parse().unwrap();
        let prod: Tier = "prod".parse().unwrap();
        let job = JobDefinition::new("dailyCleanup", noop())
            .unwrap()
            .schedule(ScheduleSpec::new(staging.clone()).cron("30 6 * * *").unwrap())
            .schedule(
                ScheduleSpec::new(staging.clone())
                    .named("weekly")
                    .cron("0 7 * * 1")
                    .unwrap()
                    .with_data(json!({"deep": true})),
            )
            .schedule(ScheduleSpec::new(prod).cron("0 5 * * *").unwrap());

        let declared = job.declared_for(&staging);
        let names: Vec<_> = declared.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["dailyCleanup", "dailyCleanup:weekly"]);
        assert_eq!(declared[1].data, json!({"deep": true}));
    }

    #[test]
    fn job_names_cannot_contain_separator() {
        assert!(JobDefinition::new("a:b", noop()).is_err());
        assert!(JobDefinition::new(" ", noop()).is_err());
    }
}
