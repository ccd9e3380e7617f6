//! # Collaborator Interfaces
//!
//! The delivery core does not own provider integrations, lead data or human
//! notification channels. Each collaborator is a trait injected at
//! construction time (no module singletons, no dynamic lookup), so tests run
//! against fakes and the host application wires real integrations in its
//! bootstrap.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

use crate::error::ExecutionError;

/// Outbound channel for a message dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Call,
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

/// Receipt from a successful provider dispatch.
#[derive(Debug, Clone, Default)]
pub struct ProviderReceipt {
    pub provider_id: Option<String>,
}

/// Actual SMS/email/call dispatch, owned by the messaging integration.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(
        &self,
        channel: Channel,
        to: &str,
        content: &str,
    ) -> Result<ProviderReceipt, ExecutionError>;
}

/// Lead state the follow-up guards consult.
#[async_trait]
pub trait LeadStatusProvider: Send + Sync {
    async fn is_opted_out(&self, phone: &str) -> Result<bool, ExecutionError>;

    async fn has_future_booking(&self, tenant_id: &str, phone: &str)
        -> Result<bool, ExecutionError>;
}

/// Severity bands for human alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Human notification sink. Best-effort: callers catch and log failures.
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send_alert(
        &self,
        message: &str,
        severity: AlertSeverity,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), ExecutionError>;
}

/// Re-POSTs a replayed webhook to an internal endpoint.
#[async_trait]
pub trait WebhookPoster: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<(), ExecutionError>;
}

/// `reqwest`-backed poster used outside of tests. Any 2xx response counts as
/// success; everything else maps onto the execution-error taxonomy.
pub struct HttpWebhookPoster {
    client: reqwest::Client,
}

impl HttpWebhookPoster {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpWebhookPoster {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl WebhookPoster for HttpWebhookPoster {
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<(), ExecutionError> {
        let mut request = self.client.post(endpoint).json(payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout {
                    timeout: std::time::Duration::from_secs(30),
                }
            } else {
                ExecutionError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ExecutionError::Http {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

/// Log-only alert sink for local runs and environments without a pager.
#[derive(Debug, Clone, Default)]
pub struct LogAlertSender;

#[async_trait]
impl AlertSender for LogAlertSender {
    async fn send_alert(
        &self,
        message: &str,
        severity: AlertSeverity,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), ExecutionError> {
        info!(severity = severity.as_str(), metadata = ?metadata, "ALERT: {message}");
        Ok(())
    }
}
