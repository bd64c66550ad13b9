//! Operator alert channel (spec §7 "User-visible behavior"): a single webhook sink for
//! kill-switch trips, margin-insufficient events, persistent venue disconnects, and
//! position-reconciliation firing.

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub instrument: String,
    pub venue: Option<String>,
    pub residual: Option<f64>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    KillSwitchTripped,
    MarginInsufficient,
    VenueDisconnectPersistent,
    PositionReconciliation,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: Alert);
}

/// Posts alerts as JSON to a configured webhook URL, mirroring the teacher's
/// `reqwest`-based outbound-notification style (`src/vault/execution.rs`).
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: Alert) {
        if let Err(e) = self.client.post(&self.url).json(&alert).send().await {
            tracing::error!(error = %e, "failed to deliver alert webhook");
        }
    }
}

/// No-op sink for tests and for operators who haven't configured a webhook.
#[derive(Default)]
pub struct NullAlertSink;

#[async_trait]
impl AlertSink for NullAlertSink {
    async fn send(&self, alert: Alert) {
        tracing::warn!(?alert, "alert (no sink configured)");
    }
}
