//! Diagnostic logging for logweave-daemon.
//!
//! stdout is reserved for processed entries (one JSON object per line), so the
//! daemon's own diagnostics are written to stderr. [`subscriber`] takes the
//! writer as a parameter; [`init_tracing`] wires it to stderr and installs the
//! result as the global default.
//!
//! `RUST_LOG` takes precedence over `[general] log_level` when it is set.

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use logweave_core::config::GeneralConfig;

type Filtered = Layered<EnvFilter, Registry>;

/// Install the global subscriber, writing to stderr.
///
/// Must be called once, before any entries flow.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level '{}'", config.log_level))?,
    };

    subscriber(filter, &config.log_format, std::io::stderr)?
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Build a subscriber for `log_format` (`json` or `pretty`) that writes to `writer`.
pub fn subscriber<W>(
    filter: EnvFilter,
    log_format: &str,
    writer: W,
) -> Result<impl Subscriber + Send + Sync + 'static>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let output: Box<dyn Layer<Filtered> + Send + Sync> = match log_format {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(writer)
            .boxed(),
        other => anyhow::bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
    };

    Ok(tracing_subscriber::registry().with(filter).with(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture(level: &str, format: &str, emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber =
            subscriber(EnvFilter::new(level), format, move || writer.clone()).unwrap();
        tracing::subscriber::with_default(subscriber, emit);
        captured.text()
    }

    #[test]
    fn json_format_writes_one_object_per_event() {
        let out = capture("info", "json", || {
            tracing::info!(stage = "drop", "pipeline built");
        });
        let line = out.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["fields"]["message"], "pipeline built");
        assert_eq!(value["fields"]["stage"], "drop");
    }

    #[test]
    fn level_filter_is_applied() {
        let out = capture("warn", "json", || {
            tracing::info!("hidden");
            tracing::warn!("shown");
        });
        assert!(!out.contains("hidden"));
        assert!(out.contains("shown"));
    }

    #[test]
    fn pretty_format_goes_to_the_given_writer() {
        let out = capture("info", "pretty", || tracing::info!("draining"));
        assert!(out.contains("draining"));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = subscriber(EnvFilter::new("info"), "xml", io::sink)
            .err()
            .unwrap();
        assert!(err.to_string().contains("xml"));
    }
}
