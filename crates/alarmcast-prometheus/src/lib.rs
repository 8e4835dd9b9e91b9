// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics adapter for alarmcast.
//!
//! Every crate records through the metrics-rs facade using the helpers in
//! [`recording`]. This crate installs the Prometheus recorder once at startup
//! and renders the collected metrics as Prometheus text.

pub mod recording;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use alarmcast_core::traits::adapter::PluginAdapter;
use alarmcast_core::types::HealthStatus;
use alarmcast_core::AlarmcastError;

pub use recording::{
    record_breaker_rejection, record_circuit_transition, record_dead_letter,
    record_dead_letter_reprocessed, record_delivery, record_delivery_failure, record_duplicate,
    record_modem_selection, record_paused_requeue, record_pool_exhausted,
    record_processing_latency, record_queue_outcome, record_retry, register_metrics,
    set_dead_letter_size, set_modem_usage, set_queue_depth, set_workers,
};

/// Prometheus metrics adapter.
///
/// Installs the Prometheus recorder and exposes a handle for rendering
/// metrics in Prometheus text format.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
}

impl PrometheusAdapter {
    /// Install the Prometheus recorder globally.
    ///
    /// Only one recorder can be installed per process. Returns an error if a
    /// recorder is already installed.
    pub fn new() -> Result<Self, AlarmcastError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            AlarmcastError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[async_trait]
impl PluginAdapter for PrometheusAdapter {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        Ok(HealthStatus::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn helpers_render_through_a_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            record_delivery("sms", "modem-pool", true);
            record_queue_outcome("ack");
            set_dead_letter_size(3);
        });
        let text = handle.render();
        assert!(text.contains("alarmcast_delivery_attempts_total"));
        assert!(text.contains("outcome=\"ack\""));
        assert!(text.contains("alarmcast_dead_letter_size 3"));
    }
}
