//! MQTT publisher for realtime handover traffic
//!
//! Publishes to per-session topics under the configured prefix:
//! - {prefix}/handover/{session_id}/location - Live participant positions (QoS 0)
//! - {prefix}/handover/{session_id}/events - Session lifecycle events (QoS 1)

use crate::domain::types::SessionId;
use crate::infra::config::Config;
use crate::io::realtime::RealtimeMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound for draining and flushing on shutdown
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub fn location_topic(prefix: &str, session_id: SessionId) -> String {
    format!("{}/handover/{}/location", prefix, session_id)
}

pub fn events_topic(prefix: &str, session_id: SessionId) -> String {
    format!("{}/handover/{}/events", prefix, session_id)
}

/// Topic, QoS and body for one message
fn route(prefix: &str, msg: &RealtimeMessage) -> serde_json::Result<(String, QoS, String)> {
    match msg {
        RealtimeMessage::Location(payload) => Ok((
            location_topic(prefix, payload.session_id),
            QoS::AtMostOnce,
            serde_json::to_string(payload)?,
        )),
        RealtimeMessage::Handover(payload) => Ok((
            events_topic(prefix, payload.session_id),
            QoS::AtLeastOnce,
            serde_json::to_string(payload)?,
        )),
    }
}

/// MQTT publisher actor
///
/// Receives messages from the realtime channel and publishes them. On
/// shutdown, queued messages are published and the connection is closed
/// once the event loop has written everything ahead of the disconnect.
pub struct MqttPublisher {
    client: AsyncClient,
    eventloop: JoinHandle<()>,
    rx: mpsc::Receiver<RealtimeMessage>,
    topic_prefix: String,
    flush_timeout: Duration,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<RealtimeMessage>) -> Self {
        let client_id = format!("{}-realtime-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        let eventloop = tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_realtime_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_realtime_puback");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("mqtt_realtime_disconnected");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_realtime_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            eventloop,
            rx,
            topic_prefix: config.mqtt_topic_prefix().to_string(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Run the publisher loop until shutdown, then drain and flush
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(prefix = %self.topic_prefix, "mqtt_realtime_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }

        info!("mqtt_realtime_shutdown");
        let flush_timeout = self.flush_timeout;
        if tokio::time::timeout(flush_timeout, self.drain_and_disconnect()).await.is_err() {
            warn!(timeout_ms = %flush_timeout.as_millis(), "mqtt_realtime_flush_timeout");
            self.eventloop.abort();
        }
    }

    /// Publish everything still queued, then wait for the event loop to
    /// write the disconnect that follows those publishes
    async fn drain_and_disconnect(&mut self) {
        self.rx.close();
        while let Some(msg) = self.rx.recv().await {
            self.publish_message(msg).await;
        }
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "mqtt_realtime_disconnect_failed");
        }
        if let Err(e) = (&mut self.eventloop).await {
            warn!(error = %e, "mqtt_realtime_eventloop_join_failed");
        }
    }

    async fn publish_message(&self, msg: RealtimeMessage) {
        let (topic, qos, body) = match route(&self.topic_prefix, &msg) {
            Ok(routed) => routed,
            Err(e) => {
                error!(session_id = %msg.session_id(), error = %e, "mqtt_realtime_serialize_failed");
                return;
            }
        };

        if let Err(e) = self.client.publish(&topic, qos, false, body.into_bytes()).await {
            match qos {
                QoS::AtMostOnce => debug!(topic = %topic, error = %e, "mqtt_realtime_publish_failed"),
                _ => error!(topic = %topic, error = %e, "mqtt_realtime_publish_failed"),
            }
        }
    }
}
