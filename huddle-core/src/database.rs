use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::{HuddleError, Result};
use crate::jobs::PostgresScheduleStore;
use crate::presence::{PostgresActorDirectory, PostgresPresenceRepository};

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection pool plus the Postgres-backed stores built on it.
#[derive(Clone)]
pub struct HuddleDatabase {
    pool: PgPool,
    options: DatabaseOptions,
}

impl fmt::Debug for HuddleDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuddleDatabase")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("max_connections", &self.options.max_connections)
            .field("min_connections", &self.options.min_connections)
            .finish()
    }
}

impl HuddleDatabase {
    pub async fn connect(url: &str, options: DatabaseOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(url)
            .await
            .map_err(|e| HuddleError::Store(format!("Database connection failed: {e}")))?;

        info!(
            max_connections = options.max_connections,
            min_connections = options.min_connections,
            "Database pool initialized"
        );
        Ok(Self { pool, options })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            options: DatabaseOptions::default(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| HuddleError::Store(format!("Migration failed: {e}")))
    }

    pub fn schedule_store(&self) -> Arc<PostgresScheduleStore> {
        Arc::new(PostgresScheduleStore::new(self.pool.clone()))
    }

    pub fn presence_repository(&self) -> Arc<PostgresPresenceRepository> {
        Arc::new(PostgresPresenceRepository::new(self.pool.clone()))
    }

    pub fn actor_directory(&self) -> Arc<PostgresActorDirectory> {
        Arc::new(PostgresActorDirectory::new(self.pool.clone()))
    }
}
