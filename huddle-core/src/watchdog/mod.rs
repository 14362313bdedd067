//! Pub/sub health-check watchdog.
//!
//! Every process subscribes to `pub-sub-health-check` and owns one timer.
//! Each heartbeat pushes the deadline out by the timeout. When the deadline
//! passes the watchdog raises a single alert and keeps waiting; the next
//! heartbeat re-arms it.

pub mod alert;
pub mod heartbeat;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use huddle_model::{ScopeKeys, Topic};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, ScopeFilter, Subscription, handler_fn};
use crate::error::{HuddleError, Result};

pub use alert::{AlertSink, LogAlertSink, WatchdogAlert, WebhookAlertSink, alert_sink_for};
pub use heartbeat::{HEARTBEAT_JOB, heartbeat_job};

pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub timeout: Duration,
    /// Where alerts are routed; passed through to the sink.
    pub destination: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WATCHDOG_TIMEOUT,
            destination: "log".into(),
        }
    }
}

/// Process-local heartbeat bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatState {
    pub last_seen: Option<DateTime<Utc>>,
    pub alerted: bool,
}

pub struct Watchdog {
    bus: EventBus,
    sink: Arc<dyn AlertSink>,
    config: WatchdogConfig,
    state: Arc<Mutex<HeartbeatState>>,
    subscription: Mutex<Option<Subscription>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.try_lock().map(|guard| *guard).ok();
        f.debug_struct("Watchdog")
            .field("config", &self.config)
            .field("sink", &self.sink)
            .field("state", &state)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Watchdog {
    pub fn new(bus: EventBus, sink: Arc<dyn AlertSink>, config: WatchdogConfig) -> Self {
        Self {
            bus,
            sink,
            config,
            state: Arc::new(Mutex::new(HeartbeatState::default())),
            subscription: Mutex::new(None),
            timer: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn state(&self) -> HeartbeatState {
        *self.state.lock().await
    }

    /// Subscribes to heartbeats and arms the timer.
    pub async fn start(&self) -> Result<()> {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            return Err(HuddleError::Internal("watchdog already started".into()));
        }

        let (beat_tx, beat_rx) = mpsc::unbounded_channel::<()>();
        let subscription = self
            .bus
            .subscribe(
                Topic::PubSubHealthCheck,
                ScopeFilter::Exact(ScopeKeys::none()),
                handler_fn(move |_event| {
                    let beat_tx = beat_tx.clone();
                    async move {
                        // Closed only after shutdown.
                        let _ = beat_tx.send(());
                        Ok(())
                    }
                }),
            )
            .await?;
        *self.subscription.lock().await = Some(subscription);

        *timer = Some(tokio::spawn(run_timer(
            beat_rx,
            Arc::clone(&self.state),
            Arc::clone(&self.sink),
            self.config.clone(),
            self.shutdown.clone(),
        )));

        info!(
            target: "huddle::watchdog",
            timeout_secs = self.config.timeout.as_secs(),
            destination = %self.config.destination,
            "watchdog started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(subscription) = self.subscription.lock().await.take()
            && let Err(err) = self.bus.unsubscribe(&subscription).await
        {
            debug!(target: "huddle::watchdog", error = %err, "heartbeat unsubscribe failed");
        }
        if let Some(handle) = self.timer.lock().await.take()
            && let Err(err) = handle.await
        {
            warn!(target: "huddle::watchdog", "watchdog timer task failed: {:?}", err);
        }

        info!(target: "huddle::watchdog", "watchdog stopped");
        Ok(())
    }
}

async fn run_timer(
    mut beats: mpsc::UnboundedReceiver<()>,
    state: Arc<Mutex<HeartbeatState>>,
    sink: Arc<dyn AlertSink>,
    config: WatchdogConfig,
    shutdown: CancellationToken,
) {
    let mut deadline = Instant::now() + config.timeout;
    let mut alerted = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            beat = beats.recv() => {
                if beat.is_none() {
                    break;
                }
                deadline = Instant::now() + config.timeout;
                let mut guard = state.lock().await;
                if guard.alerted {
                    info!(target: "huddle::watchdog", "heartbeat resumed");
                }
                guard.last_seen = Some(Utc::now());
                guard.alerted = false;
                alerted = false;
                debug!(target: "huddle::watchdog", "heartbeat received");
            }
            _ = tokio::time::sleep_until(deadline), if !alerted => {
                alerted = true;
                let last_seen = {
                    let mut guard = state.lock().await;
                    guard.alerted = true;
                    guard.last_seen
                };
                let alert = WatchdogAlert {
                    destination: config.destination.clone(),
                    message: format!(
                        "no pub/sub heartbeat received for {}s",
                        config.timeout.as_secs()
                    ),
                    timeout: config.timeout,
                    last_seen,
                    raised_at: Utc::now(),
                };
                if let Err(err) = sink.raise(&alert).await {
                    warn!(target: "huddle::watchdog", error = %err, "alert sink failed");
                }
            }
        }
    }
}
