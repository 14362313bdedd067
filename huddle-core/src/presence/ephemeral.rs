use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use huddle_model::{EphemeralChange, Location, OrgId, location_compare};
use tokio::time::Instant;

/// One live ephemeral record.
#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralEntry {
    pub context: Location,
    pub since: DateTime<Utc>,
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
struct ActorPresence {
    /// Keyed by the canonical JSON of the exclusivity region.
    regions: HashMap<String, EphemeralEntry>,
    sequence_num: u64,
    last_change: Option<Instant>,
}

/// Snapshot of one actor's ephemeral presence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserPresence {
    /// Sorted by [`location_compare`].
    pub contexts: Vec<Location>,
    pub sequence_num: u64,
}

/// A departure caused by TTL expiry rather than an explicit leave.
#[derive(Debug, Clone, PartialEq)]
pub struct Expired {
    pub org_id: OrgId,
    pub external_id: String,
    pub change: EphemeralChange,
}

/// Process-local ephemeral presence.
///
/// Holds at most one record per `(org, actor, exclusivity region)`. Sequence
/// numbers come from one process-wide counter, so they strictly increase per
/// actor even after an idle actor is pruned.
#[derive(Debug)]
pub struct EphemeralPresence {
    ttl: Duration,
    actors: HashMap<(OrgId, String), ActorPresence>,
    next_seq: u64,
}

impl EphemeralPresence {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            actors: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Stores `context` as the actor's record for `region`. Every call
    /// advances the actor's sequence number.
    ///
    /// Returns the change to announce, or `None` when the same context was
    /// already recorded and only its TTL was renewed.
    pub fn enter(
        &mut self,
        org_id: OrgId,
        external_id: &str,
        context: &Location,
        region: &Location,
        now: Instant,
    ) -> Option<EphemeralChange> {
        let expires_at = now + self.ttl;
        let key = region.canonical_json();
        let seq = self.next_seq + 1;

        let actor = self
            .actors
            .entry((org_id, external_id.to_owned()))
            .or_default();
        if let Some(entry) = actor.regions.get_mut(&key)
            && entry.context == *context
        {
            entry.expires_at = expires_at;
            actor.sequence_num = seq;
            actor.last_change = Some(now);
            self.next_seq = seq;
            return None;
        }

        let previous = actor.regions.insert(
            key,
            EphemeralEntry {
                context: context.clone(),
                since: Utc::now(),
                expires_at,
            },
        );
        actor.sequence_num = seq;
        actor.last_change = Some(now);
        self.next_seq = seq;

        Some(EphemeralChange {
            arrived: Some(context.clone()),
            departed: previous.map(|entry| entry.context),
            sequence_num: seq,
        })
    }

    /// Removes the actor's record for `region` only if it still holds
    /// `context`. A stale leave is a no-op and returns `None`.
    pub fn leave(
        &mut self,
        org_id: OrgId,
        external_id: &str,
        context: &Location,
        region: &Location,
        now: Instant,
    ) -> Option<EphemeralChange> {
        let key = region.canonical_json();
        let actor = self.actors.get(&(org_id, external_id.to_owned()))?;
        if !actor
            .regions
            .get(&key)
            .is_some_and(|entry| entry.context == *context)
        {
            return None;
        }

        let seq = self.bump();
        let actor = self.actors.get_mut(&(org_id, external_id.to_owned()))?;
        let removed = actor.regions.remove(&key)?;
        actor.sequence_num = seq;
        actor.last_change = Some(now);

        Some(EphemeralChange {
            arrived: None,
            departed: Some(removed.context),
            sequence_num: seq,
        })
    }

    /// Drops every record whose TTL has passed and returns the departures,
    /// in sequence order. Actors left with nothing are forgotten once idle
    /// for a full TTL.
    pub fn expire(&mut self, now: Instant) -> Vec<Expired> {
        let mut stale: Vec<(OrgId, String, String, Location)> = Vec::new();
        for ((org_id, external_id), actor) in &self.actors {
            for (key, entry) in &actor.regions {
                if entry.expires_at <= now {
                    stale.push((*org_id, external_id.clone(), key.clone(), entry.context.clone()));
                }
            }
        }
        stale.sort_by(|a, b| (a.0, &a.1, &a.2).cmp(&(b.0, &b.1, &b.2)));

        let mut expired = Vec::with_capacity(stale.len());
        for (org_id, external_id, key, context) in stale {
            let seq = self.bump();
            if let Some(actor) = self.actors.get_mut(&(org_id, external_id.clone())) {
                actor.regions.remove(&key);
                actor.sequence_num = seq;
                actor.last_change = Some(now);
            }
            expired.push(Expired {
                org_id,
                external_id,
                change: EphemeralChange {
                    arrived: None,
                    departed: Some(context),
                    sequence_num: seq,
                },
            });
        }

        let ttl = self.ttl;
        self.actors.retain(|_, actor| {
            !actor.regions.is_empty()
                || actor
                    .last_change
                    .is_some_and(|changed| now.saturating_duration_since(changed) < ttl)
        });

        expired
    }

    pub fn user_presence(&self, org_id: OrgId, external_id: &str) -> UserPresence {
        self.actors
            .get(&(org_id, external_id.to_owned()))
            .map(|actor| UserPresence {
                contexts: sorted_contexts(actor),
                sequence_num: actor.sequence_num,
            })
            .unwrap_or_default()
    }

    /// Every actor in `org` with at least one live record.
    pub fn all_user_presence(&self, org_id: OrgId) -> BTreeMap<String, Vec<Location>> {
        self.actors
            .iter()
            .filter(|((org, _), actor)| *org == org_id && !actor.regions.is_empty())
            .map(|((_, external_id), actor)| (external_id.clone(), sorted_contexts(actor)))
            .collect()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }
}

fn sorted_contexts(actor: &ActorPresence) -> Vec<Location> {
    let mut contexts: Vec<Location> = actor
        .regions
        .values()
        .map(|entry| entry.context.clone())
        .collect();
    contexts.sort_by(location_compare);
    contexts
}
