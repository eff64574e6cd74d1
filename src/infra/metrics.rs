//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain atomics so services can record from any task without
//! contention. Only the per-interval request rate is reset on report.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must never drive business decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Request latency bucket boundaries (microseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2500, ≤5000, ≤10000, ≤25000, ≤50000, ≤100000, ≤250000, >250000
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [250, 500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000];
pub const METRICS_NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Lock-free metrics collector
pub struct Metrics {
    http_requests_total: AtomicU64,
    http_errors_total: AtomicU64,
    http_latency_sum_us: AtomicU64,
    http_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    requests_since_report: AtomicU64,
    /// Start-handover calls that returned a session (new or existing)
    handovers_started: AtomicU64,
    /// Sessions actually inserted
    sessions_created: AtomicU64,
    steps_completed: AtomicU64,
    sessions_completed: AtomicU64,
    bookings_transitioned: AtomicU64,
    promo_validations: AtomicU64,
    promo_redemptions: AtomicU64,
    promo_rejections: AtomicU64,
    reminders_sent: AtomicU64,
    reminder_failures: AtomicU64,
    location_updates: AtomicU64,
    location_drops: AtomicU64,
    last_report: Mutex<Instant>,
}

/// Snapshot produced by [`Metrics::report`]
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub http_requests_total: u64,
    pub http_errors_total: u64,
    pub requests_per_sec: f64,
    pub http_latency_sum_us: u64,
    pub http_latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub handovers_started: u64,
    pub sessions_created: u64,
    pub steps_completed: u64,
    pub sessions_completed: u64,
    pub bookings_transitioned: u64,
    pub promo_validations: u64,
    pub promo_redemptions: u64,
    pub promo_rejections: u64,
    pub reminders_sent: u64,
    pub reminder_failures: u64,
    pub location_updates: u64,
    pub location_drops: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            http_requests = %self.http_requests_total,
            http_errors = %self.http_errors_total,
            requests_per_sec = %format!("{:.2}", self.requests_per_sec),
            handovers_started = %self.handovers_started,
            sessions_created = %self.sessions_created,
            sessions_completed = %self.sessions_completed,
            promo_redemptions = %self.promo_redemptions,
            promo_rejections = %self.promo_rejections,
            reminders_sent = %self.reminders_sent,
            reminder_failures = %self.reminder_failures,
            location_drops = %self.location_drops,
            "metrics"
        );
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            http_errors_total: AtomicU64::new(0),
            http_latency_sum_us: AtomicU64::new(0),
            http_latency_buckets: Default::default(),
            requests_since_report: AtomicU64::new(0),
            handovers_started: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            steps_completed: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            bookings_transitioned: AtomicU64::new(0),
            promo_validations: AtomicU64::new(0),
            promo_redemptions: AtomicU64::new(0),
            promo_rejections: AtomicU64::new(0),
            reminders_sent: AtomicU64::new(0),
            reminder_failures: AtomicU64::new(0),
            location_updates: AtomicU64::new(0),
            location_drops: AtomicU64::new(0),
            last_report: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_http_request(&self, latency_us: u64, is_error: bool) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_since_report.fetch_add(1, Ordering::Relaxed);
        self.http_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.http_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.http_errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_handover_started(&self, created: bool) {
        self.handovers_started.fetch_add(1, Ordering::Relaxed);
        if created {
            self.sessions_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_step_completed(&self) {
        self.steps_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_booking_transition(&self) {
        self.bookings_transitioned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_promo_validation(&self, accepted: bool) {
        self.promo_validations.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.promo_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_promo_redemption(&self) {
        self.promo_redemptions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reminder(&self, delivered: bool) {
        if delivered {
            self.reminders_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reminder_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_location_update(&self, dropped: bool) {
        self.location_updates.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.location_drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot all counters; resets the request-rate window
    pub fn report(&self) -> MetricsSummary {
        let elapsed = {
            let mut last = self.last_report.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };
        let window_requests = self.requests_since_report.swap(0, Ordering::Relaxed);
        let requests_per_sec =
            if elapsed > 0.0 { window_requests as f64 / elapsed } else { 0.0 };

        MetricsSummary {
            http_requests_total: self.http_requests_total.load(Ordering::Relaxed),
            http_errors_total: self.http_errors_total.load(Ordering::Relaxed),
            requests_per_sec,
            http_latency_sum_us: self.http_latency_sum_us.load(Ordering::Relaxed),
            http_latency_buckets: load_buckets(&self.http_latency_buckets),
            handovers_started: self.handovers_started.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            steps_completed: self.steps_completed.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            bookings_transitioned: self.bookings_transitioned.load(Ordering::Relaxed),
            promo_validations: self.promo_validations.load(Ordering::Relaxed),
            promo_redemptions: self.promo_redemptions.load(Ordering::Relaxed),
            promo_rejections: self.promo_rejections.load(Ordering::Relaxed),
            reminders_sent: self.reminders_sent.load(Ordering::Relaxed),
            reminder_failures: self.reminder_failures.load(Ordering::Relaxed),
            location_updates: self.location_updates.load(Ordering::Relaxed),
            location_drops: self.location_drops.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(250), 0);
        assert_eq!(bucket_index(251), 1);
        assert_eq!(bucket_index(250_000), 9);
        assert_eq!(bucket_index(250_001), 10);
    }

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.record_http_request(300, false);
        metrics.record_http_request(40_000, true);
        metrics.record_handover_started(true);
        metrics.record_handover_started(false);
        metrics.record_promo_validation(true);
        metrics.record_promo_validation(false);
        metrics.record_reminder(false);
        metrics.record_location_update(true);

        let summary = metrics.report();
        assert_eq!(summary.http_requests_total, 2);
        assert_eq!(summary.http_errors_total, 1);
        assert_eq!(summary.http_latency_sum_us, 40_300);
        assert_eq!(summary.http_latency_buckets[1], 1);
        assert_eq!(summary.http_latency_buckets[7], 1);
        assert_eq!(summary.handovers_started, 2);
        assert_eq!(summary.sessions_created, 1);
        assert_eq!(summary.promo_validations, 2);
        assert_eq!(summary.promo_rejections, 1);
        assert_eq!(summary.reminder_failures, 1);
        assert_eq!(summary.reminders_sent, 0);
        assert_eq!(summary.location_drops, 1);
    }

    #[test]
    fn test_report_keeps_totals() {
        let metrics = Metrics::new();
        metrics.record_http_request(100, false);
        let _ = metrics.report();
        let second = metrics.report();
        assert_eq!(second.http_requests_total, 1);
    }
}
