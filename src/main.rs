//! CLI entry point for the Rio bus GPS proxy.
//!
//! `serve` exposes the feed over HTTP; `snapshot` runs a single collection
//! and writes the result as JSON.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use onibus_rio::{
    collector::FeedCollector,
    config::Config,
    fetch::BasicClient,
    output::save_snapshot,
    server,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "onibus_rio")]
#[command(about = "Proxy for the Rio de Janeiro bus GPS feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the feed over HTTP
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Collect the feed once and write it as JSON
    Snapshot {
        /// Normalize and filter records, as /onibus_tratado does
        #[arg(short, long, default_value_t = false)]
        tratado: bool,

        /// File to write to; stdout when omitted
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    let _log_guard = init_tracing(&config.log_file_path);

    let client = BasicClient::new(config.feed.timeout)?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            let addr = config.bind_addr();
            let collector = Arc::new(FeedCollector::new(client, config.feed));
            let app = server::router(collector);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "Listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            info!("Server stopped");
        }
        Commands::Snapshot { tratado, output } => {
            let collector = FeedCollector::new(client, config.feed);
            let output = output.as_deref();
            let result = if tratado {
                collector
                    .collect_normalized()
                    .await
                    .map(|records| save_snapshot(output, &records))
            } else {
                collector
                    .collect_raw()
                    .await
                    .map(|records| save_snapshot(output, &records))
            };
            result.map_err(|e| anyhow::anyhow!("Falha na coleta: {e}"))??;
        }
    }

    Ok(())
}

/// Colored stderr plus a daily-rotated JSON log file.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_file_path: &str) -> WorkerGuard {
    let log_dir = Path::new(log_file_path)
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("onibus_rio.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        );

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::try_from_env("RUST_LOG_JSON").unwrap_or_else(|_| EnvFilter::new("debug")),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
