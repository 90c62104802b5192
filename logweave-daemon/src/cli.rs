//! CLI argument definitions for logweave-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use logweave_core::LabelSet;

/// logweave log processing daemon.
///
/// Reads log lines from stdin, runs them through the configured stage
/// pipeline and writes the resulting entries to stdout as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "logweave-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logweave.toml configuration file.
    #[arg(short, long, default_value = "/etc/logweave/logweave.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and stages, then exit.
    #[arg(long)]
    pub validate: bool,

    /// Static label attached to every entry read from stdin (`name=value`).
    ///
    /// May be repeated.
    #[arg(short, long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
}

impl DaemonCli {
    /// Collect `--label` flags into a validated label set.
    pub fn static_labels(&self) -> Result<LabelSet> {
        LabelSet::from_pairs(self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(|e| anyhow::anyhow!("invalid --label: {}", e))
    }
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}
