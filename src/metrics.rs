//! Prometheus metrics for the lockbridge relayer
//!
//! Exposed on the API server's /metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_int_counter,
    register_int_gauge, CounterVec, Gauge, Histogram, IntCounter, IntGauge,
};

lazy_static! {
    // Source side
    pub static ref LOCK_EVENTS_OBSERVED: IntCounter = register_int_counter!(
        "lockbridge_lock_events_observed_total",
        "Total number of lock events delivered by the source subscription"
    ).unwrap();

    pub static ref DUPLICATES_DISCARDED: IntCounter = register_int_counter!(
        "lockbridge_duplicate_events_discarded_total",
        "Lock events discarded by the replay guard"
    ).unwrap();

    pub static ref DELIVERY_ERRORS: IntCounter = register_int_counter!(
        "lockbridge_delivery_errors_total",
        "Transient source delivery failures"
    ).unwrap();

    pub static ref LATEST_SOURCE_BLOCK: IntGauge = register_int_gauge!(
        "lockbridge_latest_source_block",
        "Latest source block whose lock events were delivered"
    ).unwrap();

    // Destination side
    pub static ref ATTESTATIONS_SIGNED: IntCounter = register_int_counter!(
        "lockbridge_attestations_signed_total",
        "Total number of release attestations signed"
    ).unwrap();

    pub static ref RELEASES: CounterVec = register_counter_vec!(
        "lockbridge_releases_total",
        "Release submissions by outcome",
        &["status", "class"]
    ).unwrap();

    pub static ref IN_FLIGHT: IntGauge = register_int_gauge!(
        "lockbridge_in_flight_submissions",
        "Release submissions currently awaiting finalization"
    ).unwrap();

    pub static ref PROCESSING_LATENCY: Histogram = register_histogram!(
        "lockbridge_processing_latency_seconds",
        "Time from dequeue to final outcome for one lock event",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Health
    pub static ref UP: Gauge = register_gauge!(
        "lockbridge_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record a lock event delivered by the source
pub fn record_lock_event() {
    LOCK_EVENTS_OBSERVED.inc();
}

/// Record a redelivery dropped by the guard
pub fn record_duplicate() {
    DUPLICATES_DISCARDED.inc();
}

pub fn record_delivery_error() {
    DELIVERY_ERRORS.inc();
}

pub fn record_source_block(block: u64) {
    LATEST_SOURCE_BLOCK.set(block as i64);
}

pub fn record_attestation() {
    ATTESTATIONS_SIGNED.inc();
}

/// Record a release outcome (`class` is "none" for successes)
pub fn record_release(status: &str, class: &str) {
    RELEASES.with_label_values(&[status, class]).inc();
}

pub fn record_latency(seconds: f64) {
    PROCESSING_LATENCY.observe(seconds);
}
