//! Shared handles every service is built from

use crate::infra::clock::Clock;
use crate::infra::metrics::Metrics;
use crate::io::audit::{AuditEvent, AuditLog};
use crate::io::realtime::RealtimeSender;
use crate::io::store::RentalStore;
use std::sync::Arc;

/// Process-wide dependencies, cloned into each service
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn RentalStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub audit: Arc<AuditLog>,
    /// None when MQTT is disabled
    pub realtime: Option<RealtimeSender>,
}

impl ServiceContext {
    pub fn new(store: Arc<dyn RentalStore>, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        Self { store, clock, metrics, audit: Arc::new(AuditLog::disabled()), realtime: None }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Arc::new(audit);
        self
    }

    pub fn with_realtime(mut self, sender: RealtimeSender) -> Self {
        self.realtime = Some(sender);
        self
    }

    pub(crate) fn record_audit(&self, event: AuditEvent) {
        self.audit.record(&event, self.clock.now());
    }
}
