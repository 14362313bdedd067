use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use huddle_model::{
    Actor, DurableVisit, EphemeralChange, Location, OrgId, PresenceChange, PubSubEvent, UserId,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::{HuddleError, Result};
use crate::presence::ephemeral::{EphemeralPresence, UserPresence};
use crate::presence::repository::{ActorDirectory, LatestVisit, PresenceRepository};
use crate::presence::validation::PresenceUpdate;

pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How long an ephemeral record lives without a refresh.
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_PRESENCE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// What a presence update did.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceOutcome {
    /// Durable visit stored with this (monotonic) time.
    Recorded { last_present_at: DateTime<Utc> },
    /// Ephemeral state changed and the change was published.
    Changed(EphemeralChange),
    /// Nothing to announce: a refresh of the same context, or a leave for a
    /// context that is no longer current.
    Unchanged,
}

/// Tracks who is where, durably (visits) and ephemerally (live presence).
pub struct PresenceTracker {
    bus: EventBus,
    repository: Arc<dyn PresenceRepository>,
    directory: Arc<dyn ActorDirectory>,
    ephemeral: Arc<Mutex<EphemeralPresence>>,
    config: PresenceConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actors = self
            .ephemeral
            .try_lock()
            .map(|guard| guard.actor_count())
            .ok();
        f.debug_struct("PresenceTracker")
            .field("config", &self.config)
            .field("repository", &self.repository)
            .field("directory", &self.directory)
            .field("ephemeral_actors", &actors)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl PresenceTracker {
    pub fn new(
        bus: EventBus,
        repository: Arc<dyn PresenceRepository>,
        directory: Arc<dyn ActorDirectory>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            bus,
            repository,
            directory,
            ephemeral: Arc::new(Mutex::new(EphemeralPresence::new(config.ttl))),
            config,
            sweeper: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Applies a presence update for `actor`.
    ///
    /// The update is validated before anything is stored or published.
    pub async fn set_user_present_context(
        &self,
        actor: &Actor,
        update: PresenceUpdate,
    ) -> Result<PresenceOutcome> {
        update.validate()?;
        if actor.external_id.is_empty() {
            return Err(HuddleError::Validation("actor has no external id".into()));
        }

        let region = &update.exclusivity_region;
        match (update.durable, update.present) {
            (true, _) => self.record_visit(actor, update.context).await,
            (false, true) => self.enter_presence(actor, &update.context, region).await,
            (false, false) => self.leave_presence(actor, &update.context, region).await,
        }
    }

    async fn record_visit(&self, actor: &Actor, context: Location) -> Result<PresenceOutcome> {
        let last_present_at = self
            .repository
            .record_visit(actor, &context, Utc::now())
            .await?;

        self.bus.publish_detached(PubSubEvent::context_presence(
            actor.org_id,
            actor.external_id.clone(),
            PresenceChange::Durable(DurableVisit {
                context,
                timestamp: last_present_at.timestamp_millis(),
            }),
        ))?;
        debug!(target: "huddle::presence", user = %actor.user_id, "durable visit recorded");
        Ok(PresenceOutcome::Recorded { last_present_at })
    }

    async fn enter_presence(
        &self,
        actor: &Actor,
        context: &Location,
        region: &Location,
    ) -> Result<PresenceOutcome> {
        let mut ephemeral = self.ephemeral.lock().await;
        let now = Instant::now();
        let change = ephemeral.enter(actor.org_id, &actor.external_id, context, region, now);
        // Queued under the lock so events leave in sequence order.
        self.announce(actor.org_id, &actor.external_id, change)
    }

    async fn leave_presence(
        &self,
        actor: &Actor,
        context: &Location,
        region: &Location,
    ) -> Result<PresenceOutcome> {
        let mut ephemeral = self.ephemeral.lock().await;
        let now = Instant::now();
        let change = ephemeral.leave(actor.org_id, &actor.external_id, context, region, now);
        self.announce(actor.org_id, &actor.external_id, change)
    }

    fn announce(
        &self,
        org_id: OrgId,
        external_id: &str,
        change: Option<EphemeralChange>,
    ) -> Result<PresenceOutcome> {
        let Some(change) = change else {
            return Ok(PresenceOutcome::Unchanged);
        };
        self.bus.publish_detached(PubSubEvent::context_presence(
            org_id,
            external_id,
            PresenceChange::Ephemeral(change.clone()),
        ))?;
        Ok(PresenceOutcome::Changed(change))
    }

    /// Per active user, the latest durable visit to a context equal to
    /// (`exact_match`) or containing `matcher`, keyed by external id.
    pub async fn latest_for_context(
        &self,
        org_id: OrgId,
        matcher: &Location,
        exact_match: bool,
    ) -> Result<BTreeMap<String, LatestVisit>> {
        let visits = self
            .repository
            .latest_for_context(org_id, matcher, exact_match)
            .await?;
        let users: Vec<UserId> = visits.iter().map(|visit| visit.user_id).collect();
        let active = self.directory.active_users(org_id, &users).await?;

        Ok(visits
            .into_iter()
            .filter(|visit| active.contains(&visit.user_id))
            .map(|visit| (visit.external_id.clone(), visit))
            .collect())
    }

    pub async fn user_presence(&self, org_id: OrgId, external_id: &str) -> UserPresence {
        self.ephemeral.lock().await.user_presence(org_id, external_id)
    }

    pub async fn all_user_presence(&self, org_id: OrgId) -> BTreeMap<String, Vec<Location>> {
        self.ephemeral.lock().await.all_user_presence(org_id)
    }

    /// Starts the background sweep that expires stale ephemeral records.
    pub async fn start(&self) -> Result<()> {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return Err(HuddleError::Internal("presence sweeper already started".into()));
        }
        *sweeper = Some(tokio::spawn(run_sweeper(
            Arc::clone(&self.ephemeral),
            self.bus.clone(),
            self.config.sweep_interval,
            self.shutdown.clone(),
        )));
        info!(
            target: "huddle::presence",
            ttl_secs = self.config.ttl.as_secs(),
            sweep_ms = self.config.sweep_interval.as_millis() as u64,
            "presence tracker started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.lock().await.take()
            && let Err(err) = handle.await
        {
            warn!(target: "huddle::presence", "presence sweeper failed: {:?}", err);
        }
        info!(target: "huddle::presence", "presence tracker stopped");
        Ok(())
    }
}

async fn run_sweeper(
    ephemeral: Arc<Mutex<EphemeralPresence>>,
    bus: EventBus,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut guard = ephemeral.lock().await;
        let expired = guard.expire(Instant::now());
        for departure in expired {
            debug!(
                target: "huddle::presence",
                org = %departure.org_id,
                user = %departure.external_id,
                "ephemeral presence expired"
            );
            let event = PubSubEvent::context_presence(
                departure.org_id,
                departure.external_id,
                PresenceChange::Ephemeral(departure.change),
            );
            if let Err(err) = bus.publish_detached(event) {
                warn!(target: "huddle::presence", error = %err, "failed to queue expiry departure");
            }
        }
    }
}
