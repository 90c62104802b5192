//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the Prometheus scrape endpoint.
//!
//! Histogram buckets declared by `metrics` stages must be known before the
//! recorder is installed, so they are collected from the stage list here.

use std::net::SocketAddr;

use anyhow::Result;
use logweave_core::config::MetricsConfig;
use logweave_core::metrics::DAEMON_BUILD_INFO;
use logweave_core::stage_config::StageConfig;
use logweave_log_pipeline::stage::metric::histogram_buckets;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Install the global metrics recorder and start the HTTP listener.
///
/// This function should be called once per process.
///
/// # Errors
///
/// - `listen_addr` is not a socket address
/// - A histogram bucket list is rejected by the exporter
/// - Socket binding fails or a global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig, stages: &[StageConfig]) -> Result<()> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    let mut builder = PrometheusBuilder::new().with_http_listener(addr);
    for (name, buckets) in histogram_buckets(stages) {
        builder = builder
            .set_buckets_for_metric(Matcher::Full(name.clone()), &buckets)
            .map_err(|e| anyhow::anyhow!("invalid buckets for histogram '{}': {}", name, e))?;
    }

    builder
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    logweave_core::metrics::describe_all();
    metrics::gauge!(DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
