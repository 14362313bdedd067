use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_model::Tier;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{HuddleError, Result};
use crate::jobs::definition::DeclaredSchedule;
use crate::jobs::store::{InstalledSchedule, InstalledSchedules, ScheduleStore};

#[derive(Clone, Debug)]
pub struct PostgresScheduleStore {
    pool: PgPool,
}

impl PostgresScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_row(row: &PgRow) -> Result<InstalledSchedule> {
        let tier: String = row.try_get("tier")?;
        Ok(InstalledSchedule {
            name: row.try_get("name")?,
            job: row.try_get("job")?,
            tier: tier.parse::<Tier>()?,
            cron: row.try_get("cron")?,
            data: row.try_get::<Value, _>("data")?,
            last_fired_at: row.try_get("last_fired_at")?,
        })
    }
}

#[async_trait]
impl ScheduleStore for PostgresScheduleStore {
    async fn installed(&self) -> Result<InstalledSchedules> {
        let rows = sqlx::query(
            r#"
            SELECT name, job, tier, cron, data, last_fired_at
            FROM job_schedules
            ORDER BY name
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| HuddleError::Store(format!("Failed to load schedules: {e}")))?;

        rows.iter()
            .map(|row| Self::map_row(row).map(|schedule| (schedule.name.clone(), schedule)))
            .collect()
    }

    async fn upsert(&self, schedule: &DeclaredSchedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_schedules (name, job, tier, cron, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE SET
                job = EXCLUDED.job,
                tier = EXCLUDED.tier,
                cron = EXCLUDED.cron,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(&schedule.name)
        .bind(&schedule.job)
        .bind(schedule.tier.as_str())
        .bind(schedule.cron.as_ref().map(|c| c.as_str()))
        .bind(&schedule.data)
        .execute(self.pool())
        .await
        .map_err(|e| {
            HuddleError::Store(format!("Failed to upsert schedule {}: {e}", schedule.name))
        })?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM job_schedules WHERE name = $1")
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(|e| HuddleError::Store(format!("Failed to delete schedule {name}: {e}")))?;
        Ok(())
    }

    async fn claim_run(&self, name: &str, fire_at: DateTime<Utc>) -> Result<bool> {
        // Row lock serialises competing processes; the loser sees the new
        // timestamp and updates nothing.
        let result = sqlx::query(
            r#"
            UPDATE job_schedules
            SET last_fired_at = $2
            WHERE name = $1
              AND (last_fired_at IS NULL OR last_fired_at < $2)
            "#,
        )
        .bind(name)
        .bind(fire_at)
        .execute(self.pool())
        .await
        .map_err(|e| HuddleError::Store(format!("Failed to claim run of {name}: {e}")))?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::jobs::definition::{JobContext, JobDefinition, ScheduleSpec, job_fn};
    use crate::jobs::reconcile::reconcile;
    use serde_json::json;

    fn tier() -> Tier {
        "staging".parse().unwrap()
    }

    fn daily_cleanup() -> JobDefinition {
        JobDefinition::new("dailyCleanup", job_fn(|_ctx: JobContext| async { Ok(()) }))
            .unwrap()
            .schedule(
                ScheduleSpec::new(tier())
                    .cron("30 6 * * *")
                    .unwrap()
                    .with_data(json!({"keepDays": 30})),
            )
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn reconcile_twice_leaves_one_row(pool: PgPool) {
        let store = PostgresScheduleStore::new(pool.clone());
        let jobs = [daily_cleanup()];

        reconcile(&store, &jobs, &tier()).await.unwrap();
        let second = reconcile(&store, &jobs, &tier()).await.unwrap();
        assert!(second.is_noop());

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_schedules WHERE name = 'dailyCleanup'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);

        let installed = store.installed().await.unwrap();
        assert_eq!(installed["dailyCleanup"].cron.as_deref(), Some("30 6 * * *"));
        assert_eq!(installed["dailyCleanup"].data, json!({"keepDays": 30}));
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn claim_run_is_exclusive_per_instant(pool: PgPool) {
        let store = PostgresScheduleStore::new(pool);
        reconcile(&store, &[daily_cleanup()], &tier()).await.unwrap();

        let at = Utc::now();
        assert!(store.claim_run("dailyCleanup", at).await.unwrap());
        assert!(!store.claim_run("dailyCleanup", at).await.unwrap());
        assert!(!store.claim_run("missing", at).await.unwrap());
    }
}
