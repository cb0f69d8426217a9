//! # Cell Reporter
//!
//! Periodically reports device location and LTE cell measurements to a
//! request/reply collector.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse command line and load TOML configuration
//!    - Set up logging (stderr, plus a daily rolling file when configured)
//!    - Build the snapshot source, TCP connector and reporter
//!
//! 2. **Command Loop**
//!    - Read `start`, `stop`, `send`, `status`, `quit` from stdin
//!    - Print every send outcome as it happens
//!
//! 3. **Graceful Shutdown**
//!    - On Ctrl+C, `quit` or end of input, stop the reporter and close its session
//!
//! ```text
//! $ cell-reporter --config config/default.toml --autostart
//! INFO cell_reporter: Cell Reporter v0.1.0 starting...
//! INFO cell_reporter::reporter: Reporter started: every 1s to 127.0.0.1:2222
//! INFO cell_reporter::reporter::outcome: tick 1: collector replied: OK
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cell_reporter::config::Config;
use cell_reporter::control::{Command, Reply, ReporterControl};
use cell_reporter::reporter::{LogObserver, TelemetryReporter};
use cell_reporter::snapshot::source::FileSource;
use cell_reporter::transport::TcpConnector;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "cell-reporter", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Collector endpoint, overrides the configuration (host:port)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Reporting interval in milliseconds, overrides the configuration
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Start periodic reporting immediately
    #[arg(long)]
    autostart: bool,

    /// Send a single snapshot and exit
    #[arg(long, conflicts_with = "autostart")]
    once: bool,
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// must be held for the life of the program so buffered file logs are flushed.
fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if config.logging.dir.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.logging.dir, "cell-reporter.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(endpoint) = args.endpoint {
        config.collector.endpoint = endpoint;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.reporter.interval_ms = interval_ms;
    }
    config.validate().context("Invalid configuration after command line overrides")?;

    let _log_guard = init_logging(&config);
    info!("Cell Reporter v{} starting...", env!("CARGO_PKG_VERSION"));

    let source = FileSource::new(&config.source.path);
    info!("Reading snapshots from {}", source.path().display());

    let reporter = TelemetryReporter::new(
        Arc::new(source),
        Arc::new(TcpConnector::new(config.connect_timeout())),
        Arc::new(LogObserver),
    )
    .with_exchange_timeout(config.exchange_timeout());

    let control = ReporterControl::new(
        Arc::new(reporter),
        config.interval(),
        config.collector.endpoint.clone(),
    );

    if args.once {
        let reply = control
            .send_once()
            .await
            .with_context(|| format!("Send to {} failed", control.endpoint()))?;
        println!("{}", String::from_utf8_lossy(&reply));
        return Ok(());
    }

    if args.autostart || config.reporter.autostart {
        match control.execute(Command::Start).await {
            Reply::Failed { message, .. } => warn!("Autostart failed: {}", message),
            reply => info!("Autostart: {}", reply),
        }
    }

    info!("Commands: start, stop, send, status, quit. Press Ctrl+C to exit");
    let stdin = BufReader::new(tokio::io::stdin());
    match run_command_loop(&control, stdin, ctrl_c()).await {
        LoopExit::Interrupted => info!("Received Ctrl+C, shutting down..."),
        LoopExit::EndOfInput => info!("End of input, shutting down..."),
        LoopExit::Quit | LoopExit::InputError => info!("Shutting down..."),
    }

    control.stop().await;
    Ok(())
}

/// Why the command loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Quit,
    EndOfInput,
    InputError,
    Interrupted,
}

/// Resolves on the first Ctrl+C
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Read commands line by line until `quit`, end of input or `shutdown`
///
/// `shutdown` is polled for the whole loop, including while a command runs.
async fn run_command_loop<R, S>(control: &ReporterControl, input: R, shutdown: S) -> LoopExit
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut shutdown => return LoopExit::Interrupted,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return LoopExit::EndOfInput,
            Err(e) => {
                error!("Failed to read command: {}", e);
                return LoopExit::InputError;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        if command == Command::SendOnce {
            // Runs on its own session; don't block the prompt on it
            let control = control.clone();
            tokio::spawn(async move {
                println!("{}", control.execute(Command::SendOnce).await);
            });
            continue;
        }

        let reply = tokio::select! {
            reply = control.execute(command) => reply,
            _ = &mut shutdown => {
                warn!("Interrupted while running '{:?}'", command);
                return LoopExit::Interrupted;
            }
        };

        println!("{}", reply);
        if reply == Reply::Quit {
            return LoopExit::Quit;
        }
    }
}
