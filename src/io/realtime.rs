//! Typed channel for realtime handover messages
//!
//! Provides a non-blocking way to hand location updates and handover
//! events to the MQTT publisher. Uses a bounded mpsc channel so a slow
//! broker can never grow memory without limit.

use crate::domain::types::{BookingId, HandoverType, SessionId, UserId};
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the publisher
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeMessage {
    /// Live position of a participant during a handover
    Location(LocationPayload),
    /// Session lifecycle event
    Handover(HandoverEventPayload),
}

impl RealtimeMessage {
    pub fn session_id(&self) -> SessionId {
        match self {
            RealtimeMessage::Location(p) => p.session_id,
            RealtimeMessage::Handover(p) => p.session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub lat: f64,
    pub lng: f64,
    /// Epoch ms
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoverEventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub session_id: SessionId,
    pub booking_id: BookingId,
    pub handover_type: HandoverType,
    /// created, step_completed, completed
    pub t: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub user_id: UserId,
    /// Epoch ms
    pub ts: i64,
}

/// Sender handle for realtime messages
///
/// Clone this to share across services. Non-blocking - if the channel is
/// full, messages are dropped.
#[derive(Clone)]
pub struct RealtimeSender {
    tx: mpsc::Sender<RealtimeMessage>,
    site_id: String,
}

impl RealtimeSender {
    pub fn new(tx: mpsc::Sender<RealtimeMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Returns false when the update was dropped
    pub fn send_location(&self, mut payload: LocationPayload) -> bool {
        payload.site = Some(self.site_id.clone());
        self.tx.try_send(RealtimeMessage::Location(payload)).is_ok()
    }

    pub fn send_handover_event(&self, mut payload: HandoverEventPayload) -> bool {
        payload.site = Some(self.site_id.clone());
        self.tx.try_send(RealtimeMessage::Handover(payload)).is_ok()
    }
}

/// Create a new realtime channel pair
pub fn create_realtime_channel(
    buffer_size: usize,
    site_id: String,
) -> (RealtimeSender, mpsc::Receiver<RealtimeMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (RealtimeSender::new(tx, site_id), rx)
}
