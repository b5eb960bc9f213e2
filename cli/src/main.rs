//! vigil - relays game-server log events to a downstream sink.
//!
//! Thin bootstrap around `vigil-core`: resolve configuration from flags or
//! environment variables, validate it, start the monitor, and run until a
//! shutdown signal arrives. Missing or invalid mandatory configuration
//! exits non-zero before anything is watched.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::filter::EnvFilter;
use vigil_core::mapping::{self, UserMapping};
use vigil_core::{ConsoleSink, Monitor};
use vigil_types::{DispatchConfig, MonitorConfig, RetryConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Tail a directory of game-server logs and relay structured events")]
struct Args {
    /// Directory of log files to watch.
    #[arg(long, env = "WATCH_DIRECTORY")]
    watch_directory: PathBuf,

    /// Game format identifier selecting the log parser.
    #[arg(long, env = "GAME_FORMAT", default_value = vigil_core::parser::DEFAULT_FORMAT)]
    game_format: String,

    /// Identifier-to-display-name pairs, e.g. "u123=Alice,u456=Bob".
    #[arg(long, env = "USER_MAPPINGS")]
    user_mappings: String,

    /// File extensions treated as log files.
    #[arg(long, env = "ALLOWED_EXTENSIONS", value_delimiter = ',', default_value = "log")]
    allowed_extensions: Vec<String>,

    /// Skip files whose name contains one of these substrings.
    #[arg(long, env = "IGNORE_PATTERNS", value_delimiter = ',')]
    ignore_patterns: Vec<String>,

    /// Quiet window after a change notification before reading, in ms.
    #[arg(long, env = "FILE_DEBOUNCE_MS", default_value_t = 250)]
    file_debounce_ms: u64,

    /// Fallback directory re-scan interval, in seconds.
    #[arg(long, env = "POLL_INTERVAL_SEC", default_value_t = 5)]
    poll_interval_sec: u64,

    /// Replay files that already exist at startup from their beginning.
    #[arg(long, env = "REPLAY_EXISTING", default_value_t = false)]
    replay_existing: bool,

    /// Maximum events held awaiting delivery before intake pauses.
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    /// Drop queued events older than this many seconds (0 disables).
    #[arg(long, env = "MAX_EVENT_AGE_SEC", default_value_t = 0)]
    max_event_age_sec: u64,

    /// First retry delay after a transient delivery failure, in ms.
    #[arg(long, env = "RETRY_INITIAL_BACKOFF_MS", default_value_t = 500)]
    retry_initial_backoff_ms: u64,

    /// Retry delay ceiling, in ms.
    #[arg(long, env = "RETRY_MAX_BACKOFF_MS", default_value_t = 30_000)]
    retry_max_backoff_ms: u64,

    /// Delivery attempts per event before giving up.
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value_t = 5)]
    retry_max_attempts: u32,

    /// Upper bound on the shutdown drain, in seconds.
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SEC", default_value_t = 5)]
    shutdown_timeout_sec: u64,
}

impl Args {
    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            watch_directory: self.watch_directory.clone(),
            game_format: self.game_format.clone(),
            allowed_extensions: self.allowed_extensions.clone(),
            ignore_patterns: self.ignore_patterns.clone(),
            file_debounce_ms: self.file_debounce_ms,
            poll_interval_secs: self.poll_interval_sec,
            replay_existing: self.replay_existing,
            ..Default::default()
        }
    }

    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            queue_capacity: self.queue_capacity,
            max_event_age_secs: (self.max_event_age_sec > 0).then_some(self.max_event_age_sec),
            shutdown_timeout_secs: self.shutdown_timeout_sec,
            retry: RetryConfig {
                initial_backoff_ms: self.retry_initial_backoff_ms,
                max_backoff_ms: self.retry_max_backoff_ms,
                max_attempts: self.retry_max_attempts,
            },
            ..Default::default()
        }
    }
}

/// Initialize logging, writing to VIGIL_LOG_PATH if set, otherwise stderr.
fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    if let Ok(path) = std::env::var("VIGIL_LOG_PATH") {
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    // Fallback to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let mapping = match UserMapping::parse(&args.user_mappings) {
        Ok(mapping) => mapping,
        Err(e) => {
            error!(
                error = %e,
                "invalid USER_MAPPINGS, expected \"raw=display,raw=display\""
            );
            return ExitCode::FAILURE;
        }
    };
    info!(entries = mapping.len(), "loaded user mappings");
    for id in mapping.identifiers() {
        debug!(identifier = %mapping::mask_id(id), "mapping entry");
    }

    let monitor = match Monitor::new(
        args.monitor_config(),
        args.dispatch_config(),
        mapping,
        ConsoleSink,
    ) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    match monitor.run(shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "monitor failed to start");
            ExitCode::FAILURE
        }
    }
}
