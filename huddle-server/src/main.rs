use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use huddle_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use huddle_core::{
    database::{DatabaseOptions, HuddleDatabase},
    jobs::{JobOutcome, ScheduleStore, declared_schedules, plan_reconciliation},
};
use huddle_server::infra::{
    app_context::{AppContext, Stores, connect_transport},
    startup::{shutdown_services, shutdown_signal, start_services},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "huddle-server")]
#[command(about = "Event bus, presence and scheduled jobs for a fleet of processes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to huddle.toml (overrides HUDDLE_CONFIG and the default locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
    #[command(subcommand)]
    Schedules(SchedulesCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(Debug, Subcommand)]
enum SchedulesCommand {
    /// Print what boot reconciliation would change, without applying it
    Plan,
    /// Run one schedule of the active tier now and exit
    Trigger {
        /// Schedule name, e.g. `pubSubHealthCheck`
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;

    match cli.command {
        Some(Command::Db(DbCommand::Migrate)) => run_db_migrate(&config).await,
        Some(Command::Schedules(SchedulesCommand::Plan)) => run_schedules_plan(config).await,
        Some(Command::Schedules(SchedulesCommand::Trigger { name })) => {
            run_schedule_trigger(config, &name).await
        }
        None => run_server(config).await,
    }
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Arc<Config>> {
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,huddle::bus=info,huddle::presence=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    Ok(Arc::new(config))
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let context = AppContext::bootstrap(config).await?;

    if let Some(plan) = start_services(&context).await?
        && !plan.is_noop()
    {
        info!(
            created = ?plan.to_create.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            updated = ?plan.to_update.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            deleted = ?plan.to_delete,
            "job schedules changed"
        );
    }

    shutdown_signal().await;
    shutdown_services(&context).await;
    Ok(())
}

async fn run_db_migrate(config: &Config) -> anyhow::Result<()> {
    let Some(url) = config.database.url.as_deref() else {
        bail!("DATABASE_URL is not set; nothing to migrate");
    };
    let database = HuddleDatabase::connect(
        url,
        DatabaseOptions {
            max_connections: config.database.max_connections,
            ..DatabaseOptions::default()
        },
    )
    .await
    .context("failed to connect to PostgreSQL")?;
    database
        .migrate()
        .await
        .context("failed to apply database migrations")?;
    info!("Database migrations applied");
    Ok(())
}

async fn run_schedules_plan(config: Arc<Config>) -> anyhow::Result<()> {
    let stores = Stores::from_config(&config).await?;
    let transport = connect_transport(&config).await?;
    let context = AppContext::assemble(Arc::clone(&config), transport, stores)?;

    let installed = context
        .stores()
        .schedules
        .installed()
        .await
        .context("failed to load installed schedules")?;
    let declared = declared_schedules(context.jobs(), &config.tier);
    let plan = plan_reconciliation(&declared, &installed)?;

    println!("tier: {}", config.tier);
    for schedule in &plan.to_create {
        println!(
            "  create  {} ({})",
            schedule.name,
            cron_label(schedule.cron.as_ref().map(|c| c.as_str()))
        );
    }
    for schedule in &plan.to_update {
        println!(
            "  update  {} ({})",
            schedule.name,
            cron_label(schedule.cron.as_ref().map(|c| c.as_str()))
        );
    }
    for name in &plan.to_delete {
        println!("  delete  {name}");
    }
    for name in &plan.unchanged {
        println!("  keep    {name}");
    }
    if plan.is_noop() {
        println!("no changes");
    }
    Ok(())
}

async fn run_schedule_trigger(config: Arc<Config>, name: &str) -> anyhow::Result<()> {
    let context = AppContext::bootstrap(config).await?;
    context
        .bus()
        .start()
        .await
        .context("failed to start event bus")?;

    let outcome = context.runner().trigger(name).await;
    shutdown_services(&context).await;

    match outcome? {
        JobOutcome::Succeeded => {
            info!(schedule = %name, "schedule ran");
            Ok(())
        }
        other => bail!("schedule `{name}` did not succeed: {other:?}"),
    }
}

fn cron_label(cron: Option<&str>) -> &str {
    cron.unwrap_or("trigger only")
}
