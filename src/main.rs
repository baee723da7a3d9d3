#![forbid(unsafe_code)]

//! `ami-monitor`: prints the manager event feed as JSON lines.
//!
//! Loads the adapter configuration, resolves the login secret, connects,
//! logs in, and streams events to stdout until interrupted or until the
//! adapter gives up on the link.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ami_link::ami::{Adapter, EventStream};
use ami_link::config::{load_secret, AdapterConfig};
use ami_link::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ami-monitor", about = "Stream manager events as JSON lines", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Login user name; falls back to `AMI_USERNAME`.
    #[arg(long, env = "AMI_USERNAME")]
    username: String,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("ami-monitor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = AdapterConfig::load_from_path(&args.config)?;
    info!(endpoint = %config.endpoint(), "configuration loaded");

    let secret = load_secret(&args.username).await?;

    let adapter = Adapter::connect(config).await?;
    let events = adapter.login(&args.username, &secret).await?;
    info!(username = %args.username, "streaming events");

    let outcome = tokio::select! {
        () = shutdown_signal() => Ok(()),
        err = adapter.wait_terminal() => Err(err),
        res = print_events(events) => res,
    };

    if outcome.is_ok() {
        if let Err(err) = adapter.logoff().await {
            warn!(%err, "logoff failed");
        }
    }
    adapter.close();

    if let Err(ref err) = outcome {
        error!(%err, "ami-monitor stopped");
    }
    outcome
}

async fn print_events(mut events: EventStream) -> Result<()> {
    let stdout = std::io::stdout();
    while let Some(event) = events.next_event().await {
        let line = serde_json::to_string(&event)
            .map_err(|err| AppError::Io(format!("failed to encode event: {err}")))?;
        let mut out = stdout.lock();
        writeln!(out, "{line}")?;
        out.flush()?;
    }
    Err(AppError::Closed("event stream ended".into()))
}

/// Resolves on Ctrl-C or, on unix, SIGTERM. A handler that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(%err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("interrupt received"),
        () = terminate => info!("SIGTERM received"),
    }
}

/// Logs go to stderr so stdout carries only event lines.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    installed.map_err(|err| AppError::Config(format!("tracing subscriber: {err}")))
}
