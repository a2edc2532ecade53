//! Metrics instrumentation for omada-dns.
//!
//! All metrics are prefixed with `omada_dns.`

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Register descriptions for every metric this crate emits.
pub fn describe() {
    describe_counter!("omada_dns.query.count", "DNS queries by record type and result");
    describe_histogram!(
        "omada_dns.query.duration.seconds",
        Unit::Seconds,
        "Time spent answering a query"
    );
    describe_counter!("omada_dns.refresh.count", "Zone refresh cycles by result");
    describe_histogram!(
        "omada_dns.refresh.duration.seconds",
        Unit::Seconds,
        "Duration of a zone refresh cycle"
    );
    describe_counter!("omada_dns.login.count", "Controller logins by result");
    describe_counter!("omada_dns.records.purged.count", "Stale records evicted");
    describe_counter!("omada_dns.fallback.count", "Fallback target resolutions by result");
    describe_gauge!("omada_dns.state.zones.count", "Published zones");
    describe_gauge!("omada_dns.state.records.forward", "Published forward records");
    describe_gauge!("omada_dns.state.records.reverse", "Published reverse records");
    describe_gauge!("omada_dns.state.ready", "1 once a snapshot has been published");
    describe_gauge!("omada_dns.state.serial", "Serial of the published snapshot");
}

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::Deferred => "deferred",
        QueryResult::ServFail => "servfail",
    };

    counter!("omada_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("omada_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query answered from the published snapshot.
    Success,
    /// Handed to the next authority in the chain.
    Deferred,
    /// Nothing could answer.
    ServFail,
}

/// Record the outcome of a refresh cycle.
pub fn record_refresh(result: RefreshResult, duration: std::time::Duration) {
    let result_str = match result {
        RefreshResult::Success => "success",
        RefreshResult::Error => "error",
    };

    counter!("omada_dns.refresh.count", "result" => result_str).increment(1);
    histogram!("omada_dns.refresh.duration.seconds").record(duration.as_secs_f64());
}

/// Outcome of a refresh cycle or login.
#[derive(Debug, Clone, Copy)]
pub enum RefreshResult {
    /// Completed.
    Success,
    /// Failed; previous state kept.
    Error,
}

/// Record a controller login attempt.
pub fn record_login(result: RefreshResult) {
    let result_str = match result {
        RefreshResult::Success => "success",
        RefreshResult::Error => "error",
    };
    counter!("omada_dns.login.count", "result" => result_str).increment(1);
}

/// Record entries evicted as stale during a cycle.
pub fn record_stale_purged(count: usize) {
    counter!("omada_dns.records.purged.count").increment(count as u64);
}

/// Record whether a zone's fallback target resolved.
pub fn record_fallback(resolved: bool) {
    let result_str = if resolved { "resolved" } else { "missing" };
    counter!("omada_dns.fallback.count", "result" => result_str).increment(1);
}

/// Record state counts (call periodically or on change).
pub fn record_state_counts(zones: usize, forward: usize, reverse: usize) {
    gauge!("omada_dns.state.zones.count").set(zones as f64);
    gauge!("omada_dns.state.records.forward").set(forward as f64);
    gauge!("omada_dns.state.records.reverse").set(reverse as f64);
}

/// Record readiness state.
pub fn record_ready_state(ready: bool) {
    gauge!("omada_dns.state.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record the snapshot serial number.
pub fn record_serial(serial: u32) {
    gauge!("omada_dns.state.serial").set(serial as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
