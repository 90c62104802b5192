//! Integration tests for metrics server functionality.
//!
//! Only one global recorder can exist per process, so a single test installs it.

use logweave_core::config::MetricsConfig;
use logweave_core::stage_config::{
    DEFAULT_METRIC_PREFIX, MetricConfig, MetricType, MetricsStageConfig, StageConfig,
};
use logweave_daemon::metrics_server;
use serial_test::serial;

fn histogram_stage() -> Vec<StageConfig> {
    let latency = MetricConfig {
        metric_type: MetricType::Histogram,
        source: Some("duration".to_owned()),
        prefix: DEFAULT_METRIC_PREFIX.to_owned(),
        description: Some("request latency".to_owned()),
        value: None,
        action: None,
        match_all: false,
        count_entry_bytes: false,
        buckets: vec![0.1, 0.5, 1.0],
    };
    vec![StageConfig::Metrics(MetricsStageConfig {
        metrics: [("latency".to_owned(), latency)].into_iter().collect(),
    })]
}

#[tokio::test]
#[serial]
async fn test_install_metrics_recorder_succeeds_with_valid_config() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1:19464".to_owned(),
    };

    let result = metrics_server::install_metrics_recorder(&config, &histogram_stage());

    assert!(
        result.is_ok(),
        "install_metrics_recorder should succeed with valid config: {:?}",
        result.err()
    );
}

#[test]
#[serial]
fn test_install_metrics_recorder_fails_with_invalid_address() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "999.999.999.999:9464".to_owned(),
    };

    let result = metrics_server::install_metrics_recorder(&config, &[]);

    assert!(
        result.is_err(),
        "install_metrics_recorder should fail with invalid address"
    );
}
