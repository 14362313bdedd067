use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_model::Tier;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{HuddleError, Result};
use crate::jobs::definition::DeclaredSchedule;

/// A schedule row as currently stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledSchedule {
    pub name: String,
    pub job: String,
    pub tier: Tier,
    pub cron: Option<String>,
    pub data: Value,
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl InstalledSchedule {
    /// True when the row already matches the declaration.
    pub fn matches(&self, declared: &DeclaredSchedule) -> bool {
        self.job == declared.job
            && self.tier == declared.tier
            && self.cron.as_deref() == declared.cron.as_ref().map(|c| c.as_str())
            && self.data == declared.data
    }
}

pub type InstalledSchedules = BTreeMap<String, InstalledSchedule>;

/// Durable table of installed schedules shared by every process.
#[async_trait]
pub trait ScheduleStore: Send + Sync + fmt::Debug {
    async fn installed(&self) -> Result<InstalledSchedules>;

    /// Creates or updates the row named `schedule.name`. The last fire time
    /// of an existing row is kept.
    async fn upsert(&self, schedule: &DeclaredSchedule) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Records `fire_at` as the latest run of `name` unless it (or a later
    /// instant) is already recorded. Exactly one caller wins each instant.
    async fn claim_run(&self, name: &str, fire_at: DateTime<Utc>) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    rows: Mutex<InstalledSchedules>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn names(&self) -> Vec<String> {
        self.rows.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn installed(&self) -> Result<InstalledSchedules> {
        Ok(self.rows.lock().await.clone())
    }

    async fn upsert(&self, schedule: &DeclaredSchedule) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let last_fired_at = rows.get(&schedule.name).and_then(|row| row.last_fired_at);
        rows.insert(
            schedule.name.clone(),
            InstalledSchedule {
                name: schedule.name.clone(),
                job: schedule.job.clone(),
                tier: schedule.tier.clone(),
                cron: schedule.cron.as_ref().map(|c| c.as_str().to_string()),
                data: schedule.data.clone(),
                last_fired_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.rows.lock().await.remove(name);
        Ok(())
    }

    async fn claim_run(&self, name: &str, fire_at: DateTime<Utc>) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(name)
            .ok_or_else(|| HuddleError::Store(format!("schedule `{name}` is not installed")))?;
        if row.last_fired_at.is_some_and(|last| last >= fire_at) {
            return Ok(false);
        }
        row.last_fired_at = Some(fire_at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declared(name: &str) -> DeclaredSchedule {
        DeclaredSchedule {
            name: name.into(),
            job: name.into(),
            tier: "staging".parse().unwrap(),
            cron: Some("30 6 * * *".parse().unwrap()),
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn claim_run_admits_one_caller_per_instant() {
        let store = InMemoryScheduleStore::new();
        store.upsert(&declared("a")).await.unwrap();
        let at = Utc::now();

        assert!(store.claim_run("a", at).await.unwrap());
        assert!(!store.claim_run("a", at).await.unwrap());
        assert!(
            store
                .claim_run("a", at + chrono::Duration::seconds(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn upsert_keeps_last_fire_time() {
        let store = InMemoryScheduleStore::new();
        store.upsert(&declared("a")).await.unwrap();
        let at = Utc::now();
        store.claim_run("a", at).await.unwrap();

        let mut changed = declared("a");
        changed.data = json!({"v": 2});
        store.upsert(&changed).await.unwrap();

        let installed = store.installed().await.unwrap();
        assert_eq!(installed["a"].last_fired_at, Some(at));
        assert!(installed["a"].matches(&changed));
    }
}
