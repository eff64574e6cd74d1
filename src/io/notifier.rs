//! Reminder delivery adapters

use crate::services::reminders::{Notifier, Reminder};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Serialize)]
struct WebhookBody<'a> {
    site: &'a str,
    #[serde(flatten)]
    reminder: &'a Reminder,
}

/// POSTs each reminder as JSON to a webhook
pub struct WebhookNotifier {
    url: String,
    site_id: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, site_id: &str, timeout_ms: u64) -> anyhow::Result<Self> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { url: url.to_string(), site_id: site_id.to_string(), client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
        let start = Instant::now();
        let body = WebhookBody { site: &self.site_id, reminder };

        let result = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        let latency_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(response) => {
                info!(
                    booking_id = %reminder.booking_id,
                    kind = %reminder.kind.as_str(),
                    status = %response.status().as_u16(),
                    latency_us = %latency_us,
                    "reminder_webhook_delivered"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    booking_id = %reminder.booking_id,
                    kind = %reminder.kind.as_str(),
                    latency_us = %latency_us,
                    error = %e,
                    "reminder_webhook_error"
                );
                Err(e).context("reminder webhook request failed")
            }
        }
    }
}

/// Writes reminders to the log when no webhook is configured
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
        info!(
            booking_id = %reminder.booking_id,
            kind = %reminder.kind.as_str(),
            recipient = %reminder.recipient,
            role = %reminder.role.as_str(),
            date = %reminder.date,
            "reminder"
        );
        Ok(())
    }
}
