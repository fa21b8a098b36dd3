// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade; without an installed recorder every helper
//! is a no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all buildscribe metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("buildscribe_events_total", "Inbound events by ingest outcome");
    describe_counter!("buildscribe_builds_ready_total", "Builds that reached READY");
    describe_counter!(
        "buildscribe_analysis_attempts_total",
        "Analysis attempts by result"
    );
    describe_counter!(
        "buildscribe_builds_failed_total",
        "Builds whose analysis attempts were exhausted"
    );
    describe_counter!(
        "buildscribe_dispatch_saturated_total",
        "Dispatch submissions rejected by a full queue"
    );
    describe_counter!("buildscribe_pruned_messages_total", "Messages removed by pruning");
    describe_gauge!("buildscribe_stale_builds", "Accumulating builds past the staleness window");
    describe_gauge!("buildscribe_tracked_builds", "Builds held in the accumulator registry");
    describe_histogram!(
        "buildscribe_analysis_latency_seconds",
        "Analysis service latency in seconds"
    );
}

/// Record one inbound event. `outcome` is e.g. "accumulating", "duplicate", "rejected".
pub fn record_event(outcome: &'static str) {
    metrics::counter!("buildscribe_events_total", "outcome" => outcome).increment(1);
}

pub fn record_build_ready() {
    metrics::counter!("buildscribe_builds_ready_total").increment(1);
}

/// Record one analysis attempt. `result` is "success", "transient" or "malformed".
pub fn record_analysis_attempt(result: &'static str) {
    metrics::counter!("buildscribe_analysis_attempts_total", "result" => result).increment(1);
}

pub fn record_build_failed() {
    metrics::counter!("buildscribe_builds_failed_total").increment(1);
}

pub fn record_dispatch_saturated() {
    metrics::counter!("buildscribe_dispatch_saturated_total").increment(1);
}

pub fn record_pruned(removed: u64) {
    metrics::counter!("buildscribe_pruned_messages_total").increment(removed);
}

pub fn set_stale_builds(count: usize) {
    metrics::gauge!("buildscribe_stale_builds").set(count as f64);
}

pub fn set_tracked_builds(count: usize) {
    metrics::gauge!("buildscribe_tracked_builds").set(count as f64);
}

/// Record analysis service latency.
pub fn record_latency(seconds: f64) {
    metrics::histogram!("buildscribe_analysis_latency_seconds").record(seconds);
}
