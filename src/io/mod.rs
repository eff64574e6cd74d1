//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `store` - Storage port shared by every service
//! - `memory` - In-memory store adapter with JSON seed loading
//! - `http` - JSON HTTP API and Prometheus metrics endpoint
//! - `realtime` - Typed channel for live handover messages
//! - `mqtt_publisher` - MQTT publisher for realtime messages
//! - `notifier` - Reminder delivery (webhook or log)
//! - `audit` - Business operation trail (JSONL format)

pub mod audit;
pub mod http;
pub mod memory;
pub mod mqtt_publisher;
pub mod notifier;
pub mod realtime;
pub mod store;

// Re-export commonly used types
pub use audit::{AuditEvent, AuditLog};
pub use http::{start_http_server, AppState};
pub use memory::{InMemoryStore, SeedData};
pub use mqtt_publisher::MqttPublisher;
pub use notifier::{LogNotifier, WebhookNotifier};
pub use realtime::{create_realtime_channel, RealtimeMessage, RealtimeSender};
pub use store::{load_rental, BookingFilter, RentalStore};
