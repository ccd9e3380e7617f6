//! Standalone dispatcher process backed by the in-memory store.
//!
//! Useful for local development and smoke testing; production embedders wire
//! [`CoreSystem`] with a `PostgresStore` and real provider clients instead.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use outreach_core::bootstrap::{Collaborators, CoreSystem, Stores};
use outreach_core::config::{ConfigLoader, CoreConfig};
use outreach_core::error::ExecutionError;
use outreach_core::logging;
use outreach_core::services::{
    Channel, LeadStatusProvider, LogAlertSender, MessageSender, ProviderReceipt, WebhookPoster,
};

/// Logs outbound messages instead of calling a provider.
struct LogMessageSender;

#[async_trait]
impl MessageSender for LogMessageSender {
    async fn send_message(
        &self,
        channel: Channel,
        to: &str,
        content: &str,
    ) -> Result<ProviderReceipt, ExecutionError> {
        info!(?channel, to, content, "outbound message");
        Ok(ProviderReceipt { provider_id: None })
    }
}

/// Treats every lead as reachable; no opt-outs, no existing bookings.
struct OpenLeadStatus;

#[async_trait]
impl LeadStatusProvider for OpenLeadStatus {
    async fn is_opted_out(&self, _phone: &str) -> Result<bool, ExecutionError> {
        Ok(false)
    }

    async fn has_future_booking(
        &self,
        _tenant_id: &str,
        _phone: &str,
    ) -> Result<bool, ExecutionError> {
        Ok(false)
    }
}

/// Logs webhook replays instead of re-POSTing them.
struct LogWebhookPoster;

#[async_trait]
impl WebhookPoster for LogWebhookPoster {
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Result<(), ExecutionError> {
        info!(endpoint, %payload, "webhook replay");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    let config = if Path::new("config").is_dir() {
        ConfigLoader::load().context("failed to load configuration")?
    } else {
        info!("no config directory found, using defaults");
        CoreConfig::default()
    };

    let collaborators = Collaborators {
        message_sender: Arc::new(LogMessageSender),
        lead_status: Arc::new(OpenLeadStatus),
        alert_sender: Arc::new(LogAlertSender),
        webhook_poster: Arc::new(LogWebhookPoster),
    };

    let mut system = CoreSystem::new(config, Stores::in_memory(), collaborators);
    let handles = system.start().context("failed to start core system")?;

    info!("dispatcher running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    handles.dispatcher.abort();
    handles.notifier.abort();
    Ok(())
}
