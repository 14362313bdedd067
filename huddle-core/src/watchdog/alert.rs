use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};
use url::Url;

use crate::error::{HuddleError, Result};

/// Raised when no heartbeat arrived within the watchdog timeout.
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogAlert {
    pub destination: String,
    pub message: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub last_seen: Option<DateTime<Utc>>,
    pub raised_at: DateTime<Utc>,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync + fmt::Debug {
    async fn raise(&self, alert: &WatchdogAlert) -> Result<()>;
}

/// Emits the alert as an error-level log line tagged with its destination,
/// for log-based alerting pipelines.
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn raise(&self, alert: &WatchdogAlert) -> Result<()> {
        error!(
            target: "huddle::watchdog",
            destination = %alert.destination,
            timeout_secs = alert.timeout.as_secs(),
            last_seen = ?alert.last_seen,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// POSTs the alert as JSON to an HTTP(S) endpoint. Falls back to logging
/// when the request fails.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: Url,
    fallback: LogAlertSink,
}

impl WebhookAlertSink {
    pub fn new(url: Url) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HuddleError::Validation(format!(
                "webhook alert destination must be http(s), got {url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HuddleError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url,
            fallback: LogAlertSink,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn raise(&self, alert: &WatchdogAlert) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(alert)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        if let Err(err) = response {
            warn!(
                target: "huddle::watchdog",
                url = %self.url,
                error = %err,
                "alert webhook failed"
            );
            self.fallback.raise(alert).await?;
        }
        Ok(())
    }
}

/// Picks a sink for the configured destination: URLs get a webhook,
/// anything else (a channel or pager name) is logged.
pub fn alert_sink_for(destination: &str) -> Arc<dyn AlertSink> {
    match Url::parse(destination) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => match WebhookAlertSink::new(url) {
            Ok(sink) => Arc::new(sink),
            Err(err) => {
                warn!(target: "huddle::watchdog", error = %err, "falling back to log alerts");
                Arc::new(LogAlertSink)
            }
        },
        _ => Arc::new(LogAlertSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_select_webhook_sink() {
        let sink = alert_sink_for("https://alerts.example.com/hook");
        assert!(format!("{sink:?}").starts_with("WebhookAlertSink"));
        let sink = alert_sink_for("#ops-alerts");
        assert!(format!("{sink:?}").starts_with("LogAlertSink"));
    }

    #[test]
    fn alert_serializes_timeout_in_seconds() {
        let alert = WatchdogAlert {
            destination: "#ops".into(),
            message: "silence".into(),
            timeout: Duration::from_secs(300),
            last_seen: None,
            raised_at: Utc::now(),
        };
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["timeout"], 300);
    }
}
