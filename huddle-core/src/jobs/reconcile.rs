//! Boot-time reconciliation of declared schedules against the store.
//!
//! The plan is computed up front from two snapshots and only then applied,
//! so the outcome does not depend on the order jobs are declared in.

use std::collections::BTreeSet;

use huddle_model::Tier;
use tracing::info;

use crate::error::{HuddleError, Result};
use crate::jobs::definition::{DeclaredSchedule, JobDefinition};
use crate::jobs::store::{InstalledSchedules, ScheduleStore};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub to_create: Vec<DeclaredSchedule>,
    pub to_update: Vec<DeclaredSchedule>,
    pub to_delete: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Everything `jobs` declare for `tier`.
pub fn declared_schedules(jobs: &[JobDefinition], tier: &Tier) -> Vec<DeclaredSchedule> {
    jobs.iter().flat_map(|job| job.declared_for(tier)).collect()
}

pub fn plan_reconciliation(
    declared: &[DeclaredSchedule],
    installed: &InstalledSchedules,
) -> Result<ReconciliationPlan> {
    let mut plan = ReconciliationPlan::default();
    let mut declared_names = BTreeSet::new();

    for schedule in declared {
        if !declared_names.insert(schedule.name.as_str()) {
            return Err(HuddleError::Reconciliation(format!(
                "schedule `{}` is declared more than once",
                schedule.name
            )));
        }
        match installed.get(&schedule.name) {
            None => plan.to_create.push(schedule.clone()),
            Some(row) if row.matches(schedule) => plan.unchanged.push(schedule.name.clone()),
            Some(_) => plan.to_update.push(schedule.clone()),
        }
    }

    plan.to_delete = installed
        .keys()
        .filter(|name| !declared_names.contains(name.as_str()))
        .cloned()
        .collect();

    Ok(plan)
}

/// Applies `plan`. Any store failure is fatal to boot.
pub async fn apply_plan(store: &dyn ScheduleStore, plan: &ReconciliationPlan) -> Result<()> {
    for schedule in plan.to_create.iter().chain(&plan.to_update) {
        store.upsert(schedule).await.map_err(|e| {
            HuddleError::Reconciliation(format!(
                "failed to install schedule `{}`: {e}",
                schedule.name
            ))
        })?;
    }
    for name in &plan.to_delete {
        store.delete(name).await.map_err(|e| {
            HuddleError::Reconciliation(format!("failed to delete stale schedule `{name}`: {e}"))
        })?;
    }
    Ok(())
}

/// Loads the installed set, plans against everything `jobs` declare for
/// `tier`, and applies the plan. After this returns the store holds exactly
/// the declared set.
pub async fn reconcile(
    store: &dyn ScheduleStore,
    jobs: &[JobDefinition],
    tier: &Tier,
) -> Result<ReconciliationPlan> {
    let installed = store
        .installed()
        .await
        .map_err(|e| {
            HuddleError::Reconciliation(format!("failed to load installed schedules: {e}"))
        })?;
    let declared = declared_schedules(jobs, tier);
    let plan = plan_reconciliation(&declared, &installed)?;
    apply_plan(store, &plan).await?;

    info!(
        target: "huddle::jobs",
        %tier,
        created = plan.to_create.len(),
        updated = plan.to_update.len(),
        deleted = plan.to_delete.len(),
        unchanged = plan.unchanged.len(),
        "schedules reconciled"
    );
    Ok(plan)
}

/// Per-job boot step: installs `job`'s schedules for `tier` and removes
/// their names from `installed`. Whatever remains in `installed` after every
/// declared job has registered is stale; see [`delete_stale`].
pub async fn register(
    store: &dyn ScheduleStore,
    job: &JobDefinition,
    tier: &Tier,
    installed: &mut InstalledSchedules,
) -> Result<()> {
    let declared = job.declared_for(tier);
    let own: InstalledSchedules = declared
        .iter()
        .filter_map(|schedule| installed.remove_entry(&schedule.name))
        .collect();

    let plan = plan_reconciliation(&declared, &own)?;
    apply_plan(store, &plan).await
}

/// Deletes every schedule left in `installed`.
pub async fn delete_stale(
    store: &dyn ScheduleStore,
    installed: InstalledSchedules,
) -> Result<Vec<String>> {
    let plan = ReconciliationPlan {
        to_delete: installed.into_keys().collect(),
        ..ReconciliationPlan::default()
    };
    apply_plan(store, &plan).await?;
    Ok(plan.to_delete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::definition::{JobContext, ScheduleSpec, job_fn};
    use crate::jobs::store::{InMemoryScheduleStore, InstalledSchedule};
    use serde_json::json;

    fn tier() -> Tier {
        "staging".parse().unwrap()
    }

    fn job(name: &str, cron: &str) -> JobDefinition {
        JobDefinition::new(name, job_fn(|_ctx: JobContext| async { Ok(()) }))
            .unwrap()
            .schedule(ScheduleSpec::new(tier()).cron(cron).unwrap())
    }

    fn installed_row(name: &str, cron: &str) -> InstalledSchedule {
        InstalledSchedule {
            name: name.into(),
            job: name.into(),
            tier: tier(),
            cron: Some(cron.into()),
            data: json!({}),
            last_fired_at: None,
        }
    }

    #[test]
    fn plan_partitions_declared_and_installed() {
        let declared: Vec<_> = [job("B", "0 * * * *"), job("C", "5 * * * *"), job("D", "0 1 * * *")]
            .iter()
            .flat_map(|j| j.declared_for(&tier()))
            .collect();
        let installed: InstalledSchedules = [
            installed_row("A", "0 * * * *"),
            installed_row("B", "0 * * * *"),
            installed_row("C", "0 2 * * *"),
        ]
        .into_iter()
        .map(|row| (row.name.clone(), row))
        .collect();

        let plan = plan_reconciliation(&declared, &installed).unwrap();
        assert_eq!(plan.to_create.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), ["D"]);
        assert_eq!(plan.to_update.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), ["C"]);
        assert_eq!(plan.to_delete, ["A"]);
        assert_eq!(plan.unchanged, ["B"]);
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let declared: Vec<_> = [job("A", "0 * * * *"), job("A", "5 * * * *")]
            .iter()
            .flat_map(|j| j.declared_for(&tier()))
            .collect();
        assert!(matches!(
            plan_reconciliation(&declared, &InstalledSchedules::new()),
            Err(HuddleError::Reconciliation(_))
        ));
    }

    #[tokio::test]
    async fn reconcile_converges_to_declared_set() {
        let store = InMemoryScheduleStore::new();
        for row in ["A", "B", "C"] {
            store
                .upsert(&job(row, "0 * * * *").declared_for(&tier())[0])
                .await
                .unwrap();
        }

        let jobs = [job("B", "0 * * * *"), job("C", "0 * * * *"), job("D", "0 * * * *")];
        let plan = reconcile(&store, &jobs, &tier()).await.unwrap();
        assert_eq!(plan.to_delete, ["A"]);
        assert_eq!(store.names().await, ["B", "C", "D"]);

        let again = reconcile(&store, &jobs, &tier()).await.unwrap();
        assert!(again.is_noop());
        assert_eq!(store.names().await, ["B", "C", "D"]);
    }

    #[tokio::test]
    async fn register_then_delete_stale_matches_reconcile() {
        let store = InMemoryScheduleStore::new();
        for row in ["A", "B"] {
            store
                .upsert(&job(row, "0 * * * *").declared_for(&tier())[0])
                .await
                .unwrap();
        }

        let mut installed = store.installed().await.unwrap();
        for declared in [job("B", "0 * * * *"), job("D", "0 * * * *")] {
            register(&store, &declared, &tier(), &mut installed).await.unwrap();
        }
        assert_eq!(installed.keys().collect::<Vec<_>>(), ["A"]);

        let deleted = delete_stale(&store, installed).await.unwrap();
        assert_eq!(deleted, ["A"]);
        assert_eq!(store.names().await, ["B", "D"]);
    }

    #[tokio::test]
    async fn schedules_for_other_tiers_are_not_installed() {
        let store = InMemoryScheduleStore::new();
        let prod: Tier = "prod".parse().unwrap();
        let jobs = [JobDefinition::new("nightly", job_fn(|_ctx: JobContext| async { Ok(()) }))
            .unwrap()
            .schedule(ScheduleSpec::new(prod).cron("0 3 * * *").unwrap())];

        reconcile(&store, &jobs, &tier()).await.unwrap();
        assert!(store.names().await.is_empty());
    }
}
