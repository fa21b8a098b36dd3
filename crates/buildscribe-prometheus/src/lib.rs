// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics adapter for the buildscribe engine.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. When a listen
//! address is given the exporter serves `/metrics` itself; the handle can
//! always be rendered directly.

pub mod recording;

use std::net::SocketAddr;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use buildscribe_core::BuildscribeError;
use buildscribe_core::traits::adapter::PluginAdapter;
use buildscribe_core::types::{AdapterType, HealthStatus};

pub use recording::{
    record_analysis_attempt, record_build_failed, record_build_ready, record_dispatch_saturated,
    record_event, record_latency, record_pruned, set_stale_builds, set_tracked_builds,
};

/// Prometheus metrics adapter.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
    listen_address: Option<SocketAddr>,
}

impl PrometheusAdapter {
    /// Installs the Prometheus recorder globally without an HTTP listener.
    ///
    /// Only one recorder can be installed per process.
    pub fn new() -> Result<Self, BuildscribeError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            BuildscribeError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();
        tracing::info!("prometheus metrics recorder installed");

        Ok(Self {
            handle,
            listen_address: None,
        })
    }

    /// Installs the recorder and serves the scrape endpoint on `listen_address`.
    ///
    /// Must be called from within a Tokio runtime; the exporter runs as a
    /// background task for the lifetime of the process.
    pub fn with_listener(listen_address: &str) -> Result<Self, BuildscribeError> {
        let addr: SocketAddr = listen_address.parse().map_err(|e| {
            BuildscribeError::Config(format!(
                "invalid prometheus listen address `{listen_address}`: {e}"
            ))
        })?;

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(addr)
            .build()
            .map_err(|e| {
                BuildscribeError::Internal(format!("failed to build Prometheus exporter: {e}"))
            })?;
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| {
            BuildscribeError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "prometheus exporter stopped");
            }
        });

        recording::register_metrics();
        tracing::info!(%addr, "prometheus metrics exporter listening");

        Ok(Self {
            handle,
            listen_address: Some(addr),
        })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    pub fn listen_address(&self) -> Option<SocketAddr> {
        self.listen_address
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

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Observability
    }

    async fn health_check(&self) -> Result<HealthStatus, BuildscribeError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BuildscribeError> {
        Ok(())
    }
}
