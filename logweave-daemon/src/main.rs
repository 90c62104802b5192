use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use logweave_core::config::LogweaveConfig;
use logweave_daemon::cli::DaemonCli;
use logweave_daemon::daemon::{self, Daemon, RUNTIME_SHUTDOWN_TIMEOUT};
use logweave_daemon::logging;

fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(cli));
    // 블로킹 stdin 읽기가 남아 있어도 종료한다
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(cli: DaemonCli) -> Result<()> {
    let mut config = LogweaveConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    logging::init_tracing(&config.general)?;

    if cli.validate {
        let stages = daemon::check(&config)?;
        tracing::info!(path = %cli.config.display(), ?stages, "configuration is valid");
        return Ok(());
    }

    let labels = cli.static_labels()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "logweave-daemon starting");
    let daemon = Daemon::start(config, labels, tokio::io::stdout())?;

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(daemon::wait_for_shutdown_signal(shutdown.clone()));

    let read = daemon
        .ingest(BufReader::new(tokio::io::stdin()), &shutdown)
        .await?;
    shutdown.cancel();
    if let Ok(Err(e)) = signals.await {
        tracing::warn!(error = %e, "signal handling failed");
    }

    let (_, written) = daemon.shutdown().await?;
    tracing::info!(read, written, "logweave-daemon shut down");
    Ok(())
}
