use anyhow::{Context, Result};
use huddle_core::jobs::{ReconciliationPlan, reconcile};
use tracing::{info, warn};

use crate::infra::app_context::AppContext;

/// Starts every service in dependency order.
///
/// Schedules are reconciled before the runner starts; a reconciliation
/// failure aborts boot. Returns the applied plan, or `None` when this
/// process does not run jobs.
pub async fn start_services(context: &AppContext) -> Result<Option<ReconciliationPlan>> {
    let config = context.config();

    context
        .bus()
        .start()
        .await
        .context("failed to start event bus")?;

    let plan = if config.jobs.run_jobs {
        let plan = reconcile(context.stores().schedules.as_ref(), context.jobs(), &config.tier)
            .await
            .context("schedule reconciliation failed")?;
        Some(plan)
    } else {
        None
    };

    context
        .watchdog()
        .start()
        .await
        .context("failed to start watchdog")?;
    context
        .presence()
        .start()
        .await
        .context("failed to start presence tracker")?;

    if config.jobs.run_jobs {
        context
            .runner()
            .start()
            .await
            .context("failed to start job runner")?;
    }

    info!(
        tier = %config.tier,
        run_jobs = config.jobs.run_jobs,
        postgres = context.stores().database.is_some(),
        redis = config.redis.is_some(),
        "huddle services started"
    );
    Ok(plan)
}

/// Stops services in reverse start order. Failures are logged so the rest
/// still get a chance to stop.
pub async fn shutdown_services(context: &AppContext) {
    if let Err(err) = context.runner().shutdown().await {
        warn!(error = %err, "job runner shutdown failed");
    }
    if let Err(err) = context.presence().shutdown().await {
        warn!(error = %err, "presence tracker shutdown failed");
    }
    if let Err(err) = context.watchdog().shutdown().await {
        warn!(error = %err, "watchdog shutdown failed");
    }
    if let Err(err) = context.bus().shutdown().await {
        warn!(error = %err, "event bus shutdown failed");
    }
    info!("huddle services stopped");
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
