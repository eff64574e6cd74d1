//! Car sharing marketplace service
//!
//! Serves the rental lifecycle, handover and promo APIs over HTTP, relays
//! live handover positions over MQTT and sends pickup/return reminders.
//!
//! Module structure:
//! - `domain/` - Core business types and pure rules (Booking, RentalState, PromoCode)
//! - `io/` - External interfaces (HTTP, MQTT, webhook, store, audit)
//! - `services/` - Business operations (Handover, Promo, Booking, Reminders)
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use anyhow::Context;
use carshare::domain::lifecycle::HandoverPolicy;
use carshare::infra::{Config, Metrics, SystemClock};
use carshare::io::{
    create_realtime_channel, start_http_server, AppState, AuditLog, InMemoryStore, LogNotifier,
    MqttPublisher, RentalStore, SeedData, WebhookNotifier,
};
use carshare::services::{Notifier, ServiceContext};
use clap::Parser;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Car sharing marketplace service
#[derive(Parser, Debug)]
#[command(name = "carshare", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::new(Rfc3339))
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "carshare starting");

    let args = Args::parse();
    let config = Config::load(args.config.as_deref());

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        bind_address = %config.bind_address(),
        server_port = %config.server_port(),
        owner_may_initiate = %config.owner_may_initiate(),
        reminders_enabled = %config.reminders_enabled(),
        mqtt_enabled = %config.mqtt_enabled(),
        audit_file = %config.audit_file(),
        admin_enabled = %config.admin_token().is_some(),
        "config_loaded"
    );

    let store: Arc<dyn RentalStore> = match config.seed_file() {
        Some(path) => {
            let seed = SeedData::from_file(path)?;
            Arc::new(InMemoryStore::from_seed(seed).context("Invalid seed data")?)
        }
        None => Arc::new(InMemoryStore::new()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let mut ctx = ServiceContext::new(store, Arc::new(SystemClock), metrics.clone())
        .with_audit(AuditLog::new(config.audit_file(), config.site_id()));

    // Realtime channel and publisher (if enabled)
    let mut publisher_task = None;
    if config.mqtt_enabled() {
        let (sender, rx) = create_realtime_channel(1000, config.site_id().to_string());
        let publisher = MqttPublisher::new(&config, rx);
        let publisher_shutdown = shutdown_rx.clone();
        publisher_task = Some(tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        }));
        ctx = ctx.with_realtime(sender);
    }

    let notifier: Arc<dyn Notifier> = match config.reminder_webhook_url() {
        Some(url) => Arc::new(WebhookNotifier::new(url, config.site_id(), config.reminder_timeout_ms())?),
        None => Arc::new(LogNotifier),
    };

    let policy = HandoverPolicy { owner_may_initiate: config.owner_may_initiate() };
    let state = Arc::new(AppState::new(config.site_id(), config.admin_token(), ctx, policy, notifier));

    // Reminder sweep loop
    if config.reminders_enabled() {
        let reminders = state.reminders.clone();
        let interval_secs = config.reminder_interval_secs();
        let reminder_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            reminders.run(interval_secs, reminder_shutdown).await;
        });
    }

    // Metrics reporter
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(metrics_interval.max(1)));
        loop {
            interval.tick().await;
            metrics.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = signal_tx.send(true);
    });

    let served =
        start_http_server(config.bind_address(), config.server_port(), state, shutdown_rx).await;

    // Also stops the publisher when the server failed on its own; the
    // publisher bounds its own drain and flush
    let _ = shutdown_tx.send(true);
    if let Some(task) = publisher_task {
        if let Err(e) = task.await {
            error!(error = %e, "mqtt_publisher_join_failed");
        }
    }

    if let Err(e) = served {
        error!(error = %format!("{e:#}"), "http_server_error");
        return Err(e);
    }

    info!("carshare shutdown complete");
    Ok(())
}
