use std::{fmt, sync::Arc};

use anyhow::Context;
use huddle_config::Config;
use huddle_core::{
    bus::{BusConfig, EventBus, InProcHub, RedisTransport, RedisTransportConfig, Transport},
    database::{DatabaseOptions, HuddleDatabase},
    jobs::{InMemoryScheduleStore, JobDefinition, JobRunner, ScheduleStore},
    presence::{
        ActorDirectory, InMemoryActorDirectory, InMemoryPresenceRepository, PresenceConfig,
        PresenceRepository, PresenceTracker,
    },
    watchdog::{Watchdog, WatchdogConfig, alert_sink_for},
};
use tracing::{info, warn};

use crate::infra::catalog;

/// Durable stores, either Postgres-backed or process-local.
#[derive(Clone)]
pub struct Stores {
    pub schedules: Arc<dyn ScheduleStore>,
    pub presence: Arc<dyn PresenceRepository>,
    pub directory: Arc<dyn ActorDirectory>,
    pub database: Option<HuddleDatabase>,
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            schedules: Arc::new(InMemoryScheduleStore::new()),
            presence: Arc::new(InMemoryPresenceRepository::new()),
            directory: Arc::new(InMemoryActorDirectory::new()),
            database: None,
        }
    }

    /// Connects to Postgres and applies pending migrations.
    pub async fn postgres(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let database = HuddleDatabase::connect(
            url,
            DatabaseOptions {
                max_connections,
                ..DatabaseOptions::default()
            },
        )
        .await
        .context("failed to connect to PostgreSQL")?;
        database
            .migrate()
            .await
            .context("failed to apply database migrations")?;

        Ok(Self {
            schedules: database.schedule_store(),
            presence: database.presence_repository(),
            directory: database.actor_directory(),
            database: Some(database),
        })
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        match config.database.url.as_deref() {
            Some(url) => Self::postgres(url, config.database.max_connections).await,
            None => {
                warn!("DATABASE_URL not set; schedules and visits are kept in memory");
                Ok(Self::in_memory())
            }
        }
    }
}

/// Connects the configured pub/sub transport. Without Redis every process
/// only hears itself.
pub async fn connect_transport(config: &Config) -> anyhow::Result<Arc<dyn Transport>> {
    match config.redis.as_ref() {
        Some(redis) => {
            let transport = RedisTransport::connect(&redis.url, RedisTransportConfig::default())
                .await
                .context("failed to connect to Redis")?;
            Ok(Arc::new(transport))
        }
        None => {
            info!("REDIS_URL not set; using the in-process event bus");
            Ok(Arc::new(InProcHub::default().connect()))
        }
    }
}

/// Every long-lived service of one process.
#[derive(Clone)]
pub struct AppContext {
    config: Arc<Config>,
    bus: EventBus,
    watchdog: Arc<Watchdog>,
    presence: Arc<PresenceTracker>,
    stores: Stores,
    jobs: Arc<Vec<JobDefinition>>,
    runner: Arc<JobRunner>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext").finish_non_exhaustive()
    }
}

impl AppContext {
    /// Connects transport and stores from `config`, then wires services.
    pub async fn bootstrap(config: Arc<Config>) -> anyhow::Result<Self> {
        let transport = connect_transport(&config).await?;
        let stores = Stores::from_config(&config).await?;
        Self::assemble(config, transport, stores)
    }

    /// Wires services over an already connected transport and store set.
    /// Nothing is started.
    pub fn assemble(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        stores: Stores,
    ) -> anyhow::Result<Self> {
        let bus = EventBus::new(
            transport,
            BusConfig {
                subscriber_buffer: config.bus.subscriber_buffer,
                ..BusConfig::default()
            },
        );

        let watchdog = Watchdog::new(
            bus.clone(),
            alert_sink_for(&config.watchdog.alert_destination),
            WatchdogConfig {
                timeout: config.watchdog.timeout,
                destination: config.watchdog.alert_destination.clone(),
            },
        );

        let presence = PresenceTracker::new(
            bus.clone(),
            Arc::clone(&stores.presence),
            Arc::clone(&stores.directory),
            PresenceConfig {
                ttl: config.presence.ttl,
                sweep_interval: config.presence.sweep_interval,
            },
        );

        let jobs = catalog::declared_jobs(&bus, &config).context("failed to declare jobs")?;
        let runner = JobRunner::new(Arc::clone(&stores.schedules), config.tier.clone(), &jobs);

        Ok(Self {
            config,
            bus,
            watchdog: Arc::new(watchdog),
            presence: Arc::new(presence),
            stores,
            jobs: Arc::new(jobs),
            runner: Arc::new(runner),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }
}
