//! Integration tests for the daemon handler chain.

use logweave_core::LabelSet;
use logweave_core::config::LogweaveConfig;
use logweave_daemon::daemon::{self, Daemon};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

fn config(pipeline: &str) -> LogweaveConfig {
    let toml = format!(
        r#"
[general]
log_level = "debug"

[metrics]
enabled = false

{pipeline}
"#
    );
    LogweaveConfig::parse(&toml).expect("test config should parse")
}

fn output_lines(out: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8(out.to_vec())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_lines_flow_through_pipeline_to_sink() {
    // Given: a pipeline extracting a level label and rewriting the line
    let config = config(
        r#"
[[pipeline.stages]]
logfmt = { mapping = { level = "", msg = "" } }

[[pipeline.stages]]
labels = { values = { level = "" } }

[[pipeline.stages]]
drop = { source = "level", value = "debug" }

[[pipeline.stages]]
output = { source = "msg" }
"#,
    );
    let labels = LabelSet::from_pairs([("job", "stdin")]).unwrap();
    let daemon = Daemon::start(config, labels, Vec::new()).unwrap();

    // When: feeding three lines
    let input: &[u8] = b"level=info msg=started\nlevel=debug msg=noise\nlevel=warn msg=slow\n";
    let read = daemon
        .ingest(BufReader::new(input), &CancellationToken::new())
        .await
        .unwrap();
    let (out, written) = daemon.shutdown().await.unwrap();

    // Then: the debug line is dropped and labels are attached
    assert_eq!(read, 3);
    assert_eq!(written, 2);
    let lines = output_lines(&out);
    assert_eq!(lines[0]["line"], "started");
    assert_eq!(lines[0]["labels"]["level"], "info");
    assert_eq!(lines[0]["labels"]["job"], "stdin");
    assert_eq!(lines[1]["line"], "slow");
    assert_eq!(lines[1]["labels"]["level"], "warn");
}

#[tokio::test]
async fn test_disabled_pipeline_forwards_unchanged() {
    let config = config(
        r#"
[pipeline]
enabled = false

[[pipeline.stages]]
output = { source = "msg" }
"#,
    );
    let daemon = Daemon::start(config, LabelSet::new(), Vec::new()).unwrap();

    let input: &[u8] = b"raw line\n";
    daemon
        .ingest(BufReader::new(input), &CancellationToken::new())
        .await
        .unwrap();
    let (out, written) = daemon.shutdown().await.unwrap();

    assert_eq!(written, 1);
    let lines = output_lines(&out);
    assert_eq!(lines[0]["line"], "raw line");
    assert_eq!(lines[0]["labels"], serde_json::json!({}));
}

#[tokio::test]
async fn test_multiline_blocks_are_flushed_on_shutdown() {
    let config = config(
        r#"
[[pipeline.stages]]
multiline = { firstline = '^\S', max_wait_time = "10s" }
"#,
    );
    let daemon = Daemon::start(config, LabelSet::new(), Vec::new()).unwrap();

    let input: &[u8] = b"Traceback:\n  File a.py\n  File b.py\n";
    daemon
        .ingest(BufReader::new(input), &CancellationToken::new())
        .await
        .unwrap();
    let (out, written) = daemon.shutdown().await.unwrap();

    assert_eq!(written, 1);
    assert_eq!(
        output_lines(&out)[0]["line"],
        "Traceback:\n  File a.py\n  File b.py"
    );
}

#[tokio::test]
async fn test_invalid_stage_fails_start() {
    let config = config(
        r#"
[[pipeline.stages]]
regex = { expression = "(unclosed" }
"#,
    );
    let result = Daemon::start(config, LabelSet::new(), Vec::new());
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancelled_ingest_reads_nothing() {
    let daemon = Daemon::start(config(""), LabelSet::new(), Vec::new()).unwrap();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let input: &[u8] = b"a\nb\n";
    let read = daemon.ingest(BufReader::new(input), &shutdown).await.unwrap();
    let (_, written) = daemon.shutdown().await.unwrap();

    assert_eq!(read, 0);
    assert_eq!(written, 0);
}

#[test]
fn test_check_reports_stage_order() {
    let config = config(
        r#"
[[pipeline.stages]]
cri = {}

[[pipeline.stages]]
decolorize = {}
"#,
    );
    let stages = daemon::check(&config).unwrap();
    assert_eq!(stages, vec!["cri", "decolorize"]);
}

#[test]
fn test_check_rejects_invalid_rate_limit() {
    let mut config = config("");
    config.pipeline.rate_limit.enabled = true;
    config.pipeline.rate_limit.burst = 0;
    assert!(daemon::check(&config).is_err());
}

#[tokio::test]
async fn test_example_config_file_passes_check() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut file,
        include_str!("../../logweave.toml.example").as_bytes(),
    )
    .unwrap();

    let config = LogweaveConfig::load(file.path()).await.unwrap();
    let stages = daemon::check(&config).unwrap();
    assert_eq!(stages, vec!["json", "labels", "timestamp", "drop", "output"]);
}
