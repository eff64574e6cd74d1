//! Audit trail - appends completed business operations to a file
//!
//! Records are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::types::{
    BookingId, BookingStatus, Cents, HandoverType, PromoCodeId, SessionId, UserId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// One auditable operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    HandoverStarted {
        booking_id: BookingId,
        session_id: SessionId,
        handover_type: HandoverType,
        initiator: UserId,
        created: bool,
    },
    StepCompleted {
        session_id: SessionId,
        step: String,
        user_id: UserId,
    },
    SessionCompleted {
        booking_id: BookingId,
        session_id: SessionId,
        handover_type: HandoverType,
        user_id: UserId,
    },
    BookingTransitioned {
        booking_id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    PromoRedeemed {
        promo_code_id: PromoCodeId,
        code: String,
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        booking_id: Option<BookingId>,
        discount: Cents,
    },
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::HandoverStarted { .. } => "handover_started",
            AuditEvent::StepCompleted { .. } => "step_completed",
            AuditEvent::SessionCompleted { .. } => "session_completed",
            AuditEvent::BookingTransitioned { .. } => "booking_transitioned",
            AuditEvent::PromoRedeemed { .. } => "promo_redeemed",
        }
    }
}

#[derive(Serialize)]
struct AuditLine<'a> {
    ts: DateTime<Utc>,
    site: &'a str,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Audit writer
pub struct AuditLog {
    file_path: Option<String>,
    site_id: String,
}

impl AuditLog {
    pub fn new(file_path: &str, site_id: &str) -> Self {
        info!(file_path = %file_path, "audit_initialized");
        Self { file_path: Some(file_path.to_string()), site_id: site_id.to_string() }
    }

    /// Writer that drops every record
    pub fn disabled() -> Self {
        Self { file_path: None, site_id: String::new() }
    }

    /// Append an event; returns true if it was written
    pub fn record(&self, event: &AuditEvent, ts: DateTime<Utc>) -> bool {
        let Some(file_path) = &self.file_path else {
            return false;
        };

        let line = AuditLine { ts, site: &self.site_id, event };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                error!(event = %event.as_str(), error = %e, "audit_serialize_failed");
                return false;
            }
        };

        match Self::append_line(file_path, &json) {
            Ok(()) => {
                debug!(event = %event.as_str(), bytes = %json.len(), "audit_written");
                true
            }
            Err(e) => {
                error!(event = %event.as_str(), file = %file_path, error = %e, "audit_write_failed");
                false
            }
        }
    }

    fn append_line(file_path: &str, line: &str) -> std::io::Result<()> {
        let path = Path::new(file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
