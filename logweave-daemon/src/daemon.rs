//! Daemon assembly -- handler chain wiring and lifecycle management.
//!
//! # Handler chain
//!
//! ```text
//! source -> static label middleware -> pipeline (optional) -> fan-out -> JSON lines sink
//! ```
//!
//! # Shutdown order (upstream first)
//!
//! 1. Static label middleware (bounded by `drain_timeout_secs`)
//! 2. Pipeline (drains every stage, flushes buffered multiline/CRI entries)
//! 3. Fan-out
//! 4. Sink writer (flushes once every sender is gone)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use logweave_core::config::LogweaveConfig;
use logweave_core::{ChannelHandler, EntryHandler, LabelSet};
use logweave_log_pipeline::{
    EntryMutatorHandler, EntryRateLimiter, Fanout, FanoutHandler, Pipeline, PipelineConfig,
    PipelineHandler, StageContext,
};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{metrics_server, sink, source};

/// Validate configuration and build (but do not run) the stage pipeline.
///
/// Returns the stage kinds in declaration order.
pub fn check(config: &LogweaveConfig) -> Result<Vec<&'static str>> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
    let pipeline_config = PipelineConfig::from_core(&config.pipeline);
    pipeline_config.validate()?;
    let pipeline = Pipeline::new(&pipeline_config.stages, &StageContext::default())?;
    EntryRateLimiter::from_config(&pipeline_config.rate_limit)?;
    Ok(pipeline.stage_names())
}

/// The running handler chain.
pub struct Daemon<W> {
    head: EntryMutatorHandler,
    pipeline: Option<PipelineHandler>,
    fanout: FanoutHandler,
    sink: ChannelHandler,
    writer: JoinHandle<std::io::Result<(W, u64)>>,
}

impl<W> Daemon<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Build every handler and start the background tasks.
    ///
    /// Installs the Prometheus recorder when `[metrics]` is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails, a stage cannot be
    /// built, or the metrics recorder cannot be installed.
    pub fn start(config: LogweaveConfig, static_labels: LabelSet, writer: W) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        let pipeline_config = PipelineConfig::from_core(&config.pipeline);
        pipeline_config.validate()?;
        let capacity = pipeline_config.channel_capacity;

        // 실행 전에 스테이지와 속도 제한을 모두 검증한다
        let pipeline = if pipeline_config.enabled {
            let pipeline = Pipeline::new(&pipeline_config.stages, &StageContext::default())?;
            let limiter =
                EntryRateLimiter::from_config(&pipeline_config.rate_limit)?.map(Arc::new);
            Some((pipeline, limiter))
        } else {
            tracing::info!("pipeline disabled, entries are forwarded unchanged");
            None
        };

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics, &pipeline_config.stages)?;
        }

        let (sink, rx) = ChannelHandler::new(capacity);
        let writer = tokio::spawn(sink::write_entries(rx, writer));
        let fanout = Fanout::new().add(&sink).capacity(capacity).start();

        let pipeline = pipeline.map(|(pipeline, limiter)| {
            tracing::info!(stages = ?pipeline.stage_names(), "pipeline started");
            pipeline.wrap_with_capacity(&fanout, limiter, capacity)
        });
        let next: &dyn EntryHandler = match &pipeline {
            Some(handler) => handler,
            None => &fanout,
        };

        let head = EntryMutatorHandler::with_capacity(
            next,
            move |mut entry| {
                for (name, value) in static_labels.iter() {
                    if let Err(e) = entry.labels.insert(name, value) {
                        tracing::warn!(error = %e, "failed to attach static label");
                    }
                }
                entry
            },
            pipeline_config.drain_timeout,
            capacity,
        );

        Ok(Self {
            head,
            pipeline,
            fanout,
            sink,
            writer,
        })
    }

    /// Feed entries from `reader` until EOF or `shutdown`.
    ///
    /// Returns the number of entries read.
    pub async fn ingest<R>(&self, reader: R, shutdown: &CancellationToken) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let tx = self.head.sender();
        Ok(source::read_lines(reader, &tx, shutdown).await?)
    }

    /// Stop every handler in order and wait for the sink to flush.
    ///
    /// Returns the writer and the number of entries written.
    pub async fn shutdown(self) -> Result<(W, u64)> {
        let Self {
            mut head,
            mut pipeline,
            mut fanout,
            mut sink,
            writer,
        } = self;

        head.stop().await;
        if head.lost_entries() > 0 {
            tracing::warn!(
                lost = head.lost_entries(),
                timeout = ?head.drain_timeout(),
                "static label middleware dropped entries on stop"
            );
        }

        if let Some(handler) = pipeline.as_mut() {
            handler.stop().await;
            tracing::info!(dropped = ?handler.drop_counter().snapshot(), "pipeline drop summary");
        }

        fanout.stop().await;
        sink.stop().await;
        drop(sink);

        let (writer, written) = writer
            .await
            .map_err(|e| anyhow::anyhow!("sink writer panicked: {}", e))??;
        tracing::info!(written, "sink flushed");
        Ok((writer, written))
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT) and cancel `shutdown`.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal(shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
        _ = shutdown.cancelled() => return Ok(()),
    };
    tracing::info!(signal = name, "shutdown signal received");
    shutdown.cancel();
    Ok(())
}

/// Grace period for blocking stdin reads when the runtime shuts down.
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
