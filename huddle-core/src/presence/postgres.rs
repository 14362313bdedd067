use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_model::{Actor, Location, OrgId, UserId};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{HuddleError, Result};
use crate::presence::repository::{ActorDirectory, LatestVisit, PresenceRepository};

#[derive(Clone, Debug)]
pub struct PostgresPresenceRepository {
    pool: PgPool,
}

impl PostgresPresenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_latest(row: &PgRow) -> Result<LatestVisit> {
        let location: Value = row.try_get("location")?;
        Ok(LatestVisit {
            user_id: UserId(row.try_get::<Uuid, _>("user_id")?),
            external_id: row.try_get("external_user_id")?,
            context: Location::try_from(location)?,
            last_present_at: row.try_get("last_present_at")?,
        })
    }
}

#[async_trait]
impl PresenceRepository for PostgresPresenceRepository {
    async fn record_visit(
        &self,
        actor: &Actor,
        context: &Location,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        // The no-op DO UPDATE makes RETURNING yield the id of an existing row.
        let stored: DateTime<Utc> = sqlx::query_scalar(
            r#"
            WITH location AS (
                INSERT INTO presence_locations (id, org_id, location_hash, location)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (org_id, location_hash) DO UPDATE
                    SET location_hash = EXCLUDED.location_hash
                RETURNING id
            )
            INSERT INTO presence_visits
                (location_id, user_id, org_id, external_user_id, last_present_at)
            SELECT id, $5, $2, $6, $7 FROM location
            ON CONFLICT (location_id, user_id) DO UPDATE SET
                external_user_id = EXCLUDED.external_user_id,
                last_present_at =
                    GREATEST(presence_visits.last_present_at, EXCLUDED.last_present_at)
            RETURNING last_present_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(actor.org_id.to_uuid())
        .bind(context.content_hash())
        .bind(context.to_value())
        .bind(actor.user_id.to_uuid())
        .bind(&actor.external_id)
        .bind(at)
        .fetch_one(self.pool())
        .await
        .map_err(|e| HuddleError::Store(format!("Failed to record presence visit: {e}")))?;

        Ok(stored)
    }

    async fn latest_for_context(
        &self,
        org_id: OrgId,
        matcher: &Location,
        exact_match: bool,
    ) -> Result<Vec<LatestVisit>> {
        let rows = if exact_match {
            sqlx::query(
                r#"
                SELECT DISTINCT ON (v.user_id)
                    v.user_id, v.external_user_id, v.last_present_at, l.location
                FROM presence_visits v
                JOIN presence_locations l ON l.id = v.location_id
                WHERE v.org_id = $1 AND l.location_hash = $2
                ORDER BY v.user_id, v.last_present_at DESC
                "#,
            )
            .bind(org_id.to_uuid())
            .bind(matcher.content_hash())
            .fetch_all(self.pool())
            .await
        } else {
            sqlx::query(
                r#"
                SELECT DISTINCT ON (v.user_id)
                    v.user_id, v.external_user_id, v.last_present_at, l.location
                FROM presence_visits v
                JOIN presence_locations l ON l.id = v.location_id
                WHERE v.org_id = $1 AND l.location @> $2
                ORDER BY v.user_id, v.last_present_at DESC, l.location_hash
                "#,
            )
            .bind(org_id.to_uuid())
            .bind(matcher.to_value())
            .fetch_all(self.pool())
            .await
        }
        .map_err(|e| HuddleError::Store(format!("Failed to load latest presence: {e}")))?;

        let mut visits = rows.iter().map(Self::map_latest).collect::<Result<Vec<_>>>()?;
        visits.sort_by(|a, b| {
            b.last_present_at
                .cmp(&a.last_present_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(visits)
    }
}

/// Reads membership from an `org_members(org_id, user_id, active)` table
/// owned by the entity layer. Only rows marked inactive hide a user, which
/// matches [`InMemoryActorDirectory`](crate::presence::InMemoryActorDirectory).
#[derive(Clone, Debug)]
pub struct PostgresActorDirectory {
    pool: PgPool,
}

impl PostgresActorDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActorDirectory for PostgresActorDirectory {
    async fn active_users(&self, org_id: OrgId, users: &[UserId]) -> Result<HashSet<UserId>> {
        let ids: Vec<Uuid> = users.iter().map(UserId::to_uuid).collect();
        let active: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT u.user_id
            FROM UNNEST($2::uuid[]) AS u(user_id)
            WHERE NOT EXISTS (
                SELECT 1 FROM org_members m
                WHERE m.org_id = $1 AND m.user_id = u.user_id AND NOT m.active
            )
            "#,
        )
        .bind(org_id.to_uuid())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HuddleError::Store(format!("Failed to load active members: {e}")))?;

        Ok(active.into_iter().map(UserId).collect())
    }
}
