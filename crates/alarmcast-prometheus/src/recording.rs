// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call is a
//! no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all alarmcast metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "alarmcast_delivery_attempts_total",
        "Channel send calls by channel, provider and outcome"
    );
    describe_counter!(
        "alarmcast_delivery_failures_total",
        "Classified delivery failures by channel, kind and category"
    );
    describe_counter!("alarmcast_retries_total", "Channel send retries");
    describe_counter!(
        "alarmcast_circuit_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "alarmcast_circuit_rejections_total",
        "Calls rejected by an open or probing circuit"
    );
    describe_counter!(
        "alarmcast_modem_selections_total",
        "Modem selections by pool tier"
    );
    describe_counter!(
        "alarmcast_modem_pool_exhausted_total",
        "Sends that fell back past the service pool"
    );
    describe_gauge!("alarmcast_modem_sent_count", "Messages sent per modem");
    describe_counter!(
        "alarmcast_queue_messages_total",
        "Queue message outcomes (ack, nack, dead_letter)"
    );
    describe_counter!(
        "alarmcast_queue_paused_requeues_total",
        "Messages requeued unconsumed because processing is paused"
    );
    describe_gauge!("alarmcast_queue_depth", "Messages waiting in the queue");
    describe_counter!(
        "alarmcast_duplicates_total",
        "Alarms skipped by deduplication"
    );
    describe_counter!(
        "alarmcast_dead_letters_total",
        "Messages moved to the dead-letter store"
    );
    describe_counter!(
        "alarmcast_dead_letter_reprocessed_total",
        "Dead-letter replays by outcome"
    );
    describe_gauge!("alarmcast_dead_letter_size", "Items in the dead-letter store");
    describe_gauge!("alarmcast_workers", "Registered workers by status");
    describe_histogram!(
        "alarmcast_processing_seconds",
        "Time to process one alarm end to end"
    );
}

fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Record one channel send call.
pub fn record_delivery(channel: &str, provider: &str, success: bool) {
    metrics::counter!(
        "alarmcast_delivery_attempts_total",
        "channel" => channel.to_string(),
        "provider" => provider.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a classified failure.
pub fn record_delivery_failure(channel: &str, kind: &str, category: &str) {
    metrics::counter!(
        "alarmcast_delivery_failures_total",
        "channel" => channel.to_string(),
        "kind" => kind.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}

pub fn record_retry(channel: &str) {
    metrics::counter!("alarmcast_retries_total", "channel" => channel.to_string()).increment(1);
}

/// Record a breaker moving between states.
pub fn record_circuit_transition(endpoint: &str, from: &str, to: &str) {
    metrics::counter!(
        "alarmcast_circuit_transitions_total",
        "endpoint" => endpoint.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_breaker_rejection(endpoint: &str, reason: &str) {
    metrics::counter!(
        "alarmcast_circuit_rejections_total",
        "endpoint" => endpoint.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record which pool tier served an SMS send.
pub fn record_modem_selection(tier: &str) {
    metrics::counter!("alarmcast_modem_selections_total", "tier" => tier.to_string())
        .increment(1);
}

pub fn record_pool_exhausted(service: &str) {
    metrics::counter!(
        "alarmcast_modem_pool_exhausted_total",
        "service" => service.to_string()
    )
    .increment(1);
}

pub fn set_modem_usage(modem_id: &str, sent_count: u64) {
    metrics::gauge!("alarmcast_modem_sent_count", "modem" => modem_id.to_string())
        .set(sent_count as f64);
}

/// Record a queue message outcome: `ack`, `nack`, or `dead_letter`.
pub fn record_queue_outcome(outcome: &str) {
    metrics::counter!("alarmcast_queue_messages_total", "outcome" => outcome.to_string())
        .increment(1);
}

pub fn record_paused_requeue() {
    metrics::counter!("alarmcast_queue_paused_requeues_total").increment(1);
}

pub fn set_queue_depth(depth: u64) {
    metrics::gauge!("alarmcast_queue_depth").set(depth as f64);
}

pub fn record_duplicate() {
    metrics::counter!("alarmcast_duplicates_total").increment(1);
}

/// Record a move to the dead-letter store. `channel` is `all` for whole messages.
pub fn record_dead_letter(channel: &str) {
    metrics::counter!("alarmcast_dead_letters_total", "channel" => channel.to_string())
        .increment(1);
}

pub fn record_dead_letter_reprocessed(success: bool) {
    metrics::counter!(
        "alarmcast_dead_letter_reprocessed_total",
        "outcome" => outcome(success)
    )
    .increment(1);
}

pub fn set_dead_letter_size(size: u64) {
    metrics::gauge!("alarmcast_dead_letter_size").set(size as f64);
}

/// Set the number of registered workers in a status.
pub fn set_workers(status: &str, count: usize) {
    metrics::gauge!("alarmcast_workers", "status" => status.to_string()).set(count as f64);
}

pub fn record_processing_latency(seconds: f64) {
    metrics::histogram!("alarmcast_processing_seconds").record(seconds);
}
