//! exim-exporter - Prometheus exporter for the Exim MTA.
//!
//! Follows the main, reject and panic logs (files, or the systemd journal
//! when built with the `systemd` feature) for message counters and scans
//! the spool and process table on every scrape for queue and daemon gauges.

mod handlers;
mod state;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use prometheus::Registry;
use tower_http::compression::CompressionLayer;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use exim_exporter_core::collector::{Collector, CollectorConfig, LogSources, RealFs, TailError};
use exim_exporter_core::exporter::Exporter;
use exim_exporter_core::metrics::Metrics;

use state::{AppInner, SharedState};

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "exim-exporter",
    about = "Prometheus exporter for the Exim MTA",
    version = exim_exporter_core::VERSION
)]
struct Args {
    /// Path to the Exim main log.
    #[arg(long = "exim.mainlog", env = "EXIM_MAINLOG", default_value = "/var/log/exim4/mainlog")]
    mainlog: PathBuf,

    /// Path to the Exim reject log.
    #[arg(
        long = "exim.rejectlog",
        env = "EXIM_REJECTLOG",
        default_value = "/var/log/exim4/rejectlog"
    )]
    rejectlog: PathBuf,

    /// Path to the Exim panic log.
    #[arg(long = "exim.paniclog", env = "EXIM_PANICLOG", default_value = "/var/log/exim4/paniclog")]
    paniclog: PathBuf,

    /// Read the logs from the systemd journal instead of the log files.
    #[arg(long = "systemd.enable", env = "EXIM_SYSTEMD_ENABLE")]
    systemd_enable: bool,

    /// SYSLOG_IDENTIFIER of Exim's journal entries.
    #[arg(
        long = "systemd.identifier",
        env = "EXIM_SYSTEMD_IDENTIFIER",
        default_value = "exim"
    )]
    systemd_identifier: String,

    /// Path to the Exim spool input directory.
    #[arg(
        long = "exim.input-path",
        env = "EXIM_INPUT_PATH",
        default_value = "/var/spool/exim4/input"
    )]
    input_path: PathBuf,

    /// Basename of the Exim executable in the process table.
    #[arg(long = "exim.binary-name", env = "EXIM_BINARY_NAME", default_value = "exim4")]
    binary_name: String,

    /// Time budget for frozen-message detection per scrape (e.g. "10s", "500ms").
    /// "0" disables the budget.
    #[arg(
        long = "exim.queue-scan-timeout",
        env = "EXIM_QUEUE_SCAN_TIMEOUT",
        default_value = "10s",
        value_parser = parse_duration
    )]
    queue_scan_timeout: Duration,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// How often the log readers poll for new lines.
    #[arg(long, default_value = "250ms", value_parser = parse_duration)]
    poll_interval: Duration,

    /// Listen address.
    #[arg(long = "web.listen-address", env = "EXIM_LISTEN", default_value = "0.0.0.0:9350")]
    listen: SocketAddr,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Parses a duration with an optional `ms`, `s` or `m` suffix. A bare
/// number is seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num_str, millis_per_unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else {
        (s, 1_000)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map(|n| Duration::from_millis(n.saturating_mul(millis_per_unit)))
        .map_err(|e| format!("invalid duration '{}': {}", s, e))
}

/// Normalizes the telemetry path and rejects paths that would shadow the
/// other routes.
fn telemetry_path(raw: &str) -> Result<String, StartupError> {
    let path = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{}", raw)
    };
    if path == "/" || path.starts_with("/api/") {
        return Err(StartupError::Config(format!(
            "telemetry path '{}' conflicts with built-in routes",
            raw
        )));
    }
    Ok(path)
}

/// Starts the line sources selected by the flags.
fn open_sources(args: &Args) -> Result<LogSources, StartupError> {
    if args.systemd_enable {
        return open_journal(&args.systemd_identifier, args.poll_interval);
    }
    Ok(LogSources::follow_files(
        args.mainlog.clone(),
        args.rejectlog.clone(),
        args.paniclog.clone(),
        args.poll_interval,
    )?)
}

#[cfg(feature = "systemd")]
fn open_journal(identifier: &str, poll_interval: Duration) -> Result<LogSources, StartupError> {
    Ok(LogSources::follow_journal(identifier, poll_interval)?)
}

#[cfg(not(feature = "systemd"))]
fn open_journal(_identifier: &str, _poll_interval: Duration) -> Result<LogSources, StartupError> {
    Err(StartupError::Config(
        "journal input requires a build with the systemd feature".to_string(),
    ))
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["exim_exporter", "exim_exporter_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Errors
// ============================================================

/// Failures that prevent the exporter from starting.
#[derive(Debug)]
enum StartupError {
    /// A configured log source could not be started.
    LogOpen(TailError),
    /// Metric registration failed.
    Metrics(prometheus::Error),
    /// The listener could not be bound.
    Bind { addr: SocketAddr, source: io::Error },
    /// Invalid flag combination.
    Config(String),
    /// Runtime or server I/O failure.
    Io(io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::LogOpen(e) => write!(f, "{}", e),
            StartupError::Metrics(e) => write!(f, "metrics registration failed: {}", e),
            StartupError::Bind { addr, source } => {
                write!(f, "failed to bind {}: {}", addr, source)
            }
            StartupError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            StartupError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::LogOpen(e) => Some(e),
            StartupError::Metrics(e) => Some(e),
            StartupError::Bind { source, .. } => Some(source),
            StartupError::Config(_) => None,
            StartupError::Io(e) => Some(e),
        }
    }
}

impl From<TailError> for StartupError {
    fn from(e: TailError) -> Self {
        StartupError::LogOpen(e)
    }
}

impl From<prometheus::Error> for StartupError {
    fn from(e: prometheus::Error) -> Self {
        StartupError::Metrics(e)
    }
}

impl From<io::Error> for StartupError {
    fn from(e: io::Error) -> Self {
        StartupError::Io(e)
    }
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args) {
        error!(error = %e, "exim-exporter failed");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), StartupError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), StartupError> {
    let telemetry_path = telemetry_path(&args.telemetry_path)?;

    info!(version = exim_exporter_core::VERSION, "exim-exporter starting");
    if args.systemd_enable {
        info!(identifier = %args.systemd_identifier, "reading logs from the systemd journal");
    } else {
        info!(
            mainlog = %args.mainlog.display(),
            rejectlog = %args.rejectlog.display(),
            paniclog = %args.paniclog.display(),
            "reading log files"
        );
    }
    info!(
        input_path = %args.input_path.display(),
        binary_name = %args.binary_name,
        queue_scan_timeout_ms = args.queue_scan_timeout.as_millis() as u64,
        proc_path = %args.proc_path,
        "configuration"
    );

    let sources = open_sources(&args)?;

    let config = CollectorConfig {
        binary_name: args.binary_name,
        queue_path: args.input_path,
        scan_timeout: args.queue_scan_timeout,
        proc_path: args.proc_path,
    };
    let metrics = Arc::new(Metrics::new()?);
    let collector = Arc::new(Collector::new(RealFs::new(), config, metrics));
    let mut tail_tasks = collector.start(sources);

    let registry = Registry::new();
    registry.register(Box::new(Exporter::new(collector.clone())?))?;

    let state: SharedState = Arc::new(AppInner {
        registry,
        collector,
        telemetry_path: telemetry_path.clone(),
    });

    // Router
    let app = Router::new()
        .route(&telemetry_path, get(handlers::handle_metrics))
        .route("/", get(handlers::handle_landing))
        .route("/api/v1/health", get(handlers::handle_health))
        .route("/api/v1/snapshot", get(handlers::handle_snapshot))
        .with_state(state)
        .layer(CompressionLayer::new());

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .map_err(|source| StartupError::Bind {
            addr: args.listen,
            source,
        })?;
    info!(addr = %args.listen, path = %telemetry_path, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tail_tasks.abort_all();
    info!("exim-exporter stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
