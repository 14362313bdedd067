use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_model::{Actor, Location, OrgId, UserId, location_compare};
use tokio::sync::Mutex;

use crate::error::Result;

/// The most recent durable visit of one user to a matching context.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestVisit {
    pub user_id: UserId,
    pub external_id: String,
    pub context: Location,
    pub last_present_at: DateTime<Utc>,
}

/// Durable presence storage.
#[async_trait]
pub trait PresenceRepository: Send + Sync + fmt::Debug {
    /// Ensures a location row for `context` and upserts the actor's visit.
    /// The stored time never moves backwards; the returned value is the time
    /// now stored.
    async fn record_visit(
        &self,
        actor: &Actor,
        context: &Location,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    /// Per user, the single most recent visit whose context equals
    /// (`exact_match`) or contains `matcher`.
    async fn latest_for_context(
        &self,
        org_id: OrgId,
        matcher: &Location,
        exact_match: bool,
    ) -> Result<Vec<LatestVisit>>;
}

/// Answers which users are still active members of an org. Deactivated
/// users are hidden from presence queries.
#[async_trait]
pub trait ActorDirectory: Send + Sync + fmt::Debug {
    async fn active_users(&self, org_id: OrgId, users: &[UserId]) -> Result<HashSet<UserId>>;
}

#[derive(Debug, Clone)]
struct StoredVisit {
    external_id: String,
    last_present_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    /// `(org, content hash)` → location.
    locations: HashMap<(OrgId, String), Location>,
    /// `(org, content hash, user)` → visit.
    visits: HashMap<(OrgId, String, UserId), StoredVisit>,
}

#[derive(Debug, Default)]
pub struct InMemoryPresenceRepository {
    tables: Mutex<Tables>,
}

impl InMemoryPresenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn location_count(&self) -> usize {
        self.tables.lock().await.locations.len()
    }

    /// One per `(location, user)` pair.
    pub async fn visit_count(&self) -> usize {
        self.tables.lock().await.visits.len()
    }
}

#[async_trait]
impl PresenceRepository for InMemoryPresenceRepository {
    async fn record_visit(
        &self,
        actor: &Actor,
        context: &Location,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let hash = context.content_hash();
        let mut tables = self.tables.lock().await;
        tables
            .locations
            .entry((actor.org_id, hash.clone()))
            .or_insert_with(|| context.clone());

        let visit = tables
            .visits
            .entry((actor.org_id, hash, actor.user_id))
            .or_insert_with(|| StoredVisit {
                external_id: actor.external_id.clone(),
                last_present_at: at,
            });
        visit.external_id = actor.external_id.clone();
        visit.last_present_at = visit.last_present_at.max(at);
        Ok(visit.last_present_at)
    }

    async fn latest_for_context(
        &self,
        org_id: OrgId,
        matcher: &Location,
        exact_match: bool,
    ) -> Result<Vec<LatestVisit>> {
        let matcher_hash = matcher.content_hash();
        let tables = self.tables.lock().await;
        let mut latest: HashMap<UserId, LatestVisit> = HashMap::new();

        for ((org, hash, user_id), visit) in &tables.visits {
            if *org != org_id {
                continue;
            }
            let Some(context) = tables.locations.get(&(*org, hash.clone())) else {
                continue;
            };
            let hit = if exact_match {
                *hash == matcher_hash
            } else {
                context.matches(matcher)
            };
            if !hit {
                continue;
            }

            let candidate = LatestVisit {
                user_id: *user_id,
                external_id: visit.external_id.clone(),
                context: context.clone(),
                last_present_at: visit.last_present_at,
            };
            // Ties go to the canonically smaller context so results are stable.
            let replace = match latest.get(user_id) {
                None => true,
                Some(current) => {
                    candidate.last_present_at > current.last_present_at
                        || (candidate.last_present_at == current.last_present_at
                            && location_compare(&candidate.context, &current.context).is_lt())
                }
            };
            if replace {
                latest.insert(*user_id, candidate);
            }
        }

        let mut visits: Vec<LatestVisit> = latest.into_values().collect();
        visits.sort_by(|a, b| {
            b.last_present_at
                .cmp(&a.last_present_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(visits)
    }
}

/// Directory backed by an explicit deny list; anyone not deactivated is
/// active.
#[derive(Debug, Default)]
pub struct InMemoryActorDirectory {
    deactivated: Mutex<HashSet<(OrgId, UserId)>>,
}

impl InMemoryActorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deactivate(&self, org_id: OrgId, user_id: UserId) {
        self.deactivated.lock().await.insert((org_id, user_id));
    }

    pub async fn activate(&self, org_id: OrgId, user_id: UserId) {
        self.deactivated.lock().await.remove(&(org_id, user_id));
    }
}

#[async_trait]
impl ActorDirectory for InMemoryActorDirectory {
    async fn active_users(&self, org_id: OrgId, users: &[UserId]) -> Result<HashSet<UserId>> {
        let deactivated = self.deactivated.lock().await;
        Ok(users
            .iter()
            .filter(|user| !deactivated.contains(&(org_id, **user)))
            .copied()
            .collect())
    }
}
