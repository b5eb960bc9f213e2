//! Runtime configuration for the monitor and dispatcher.
//!
//! These are plain data types: defaults live here, validation lives with the
//! components that consume them. The bootstrap layer fills them in from
//! environment variables; tests construct them directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the directory watcher and tail trackers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Directory whose log files are tailed.
    pub watch_directory: PathBuf,

    /// Game format identifier selecting a parser implementation.
    pub game_format: String,

    /// File extensions considered log files (without the dot).
    /// An empty list matches every file.
    pub allowed_extensions: Vec<String>,

    /// Case-insensitive substrings; a file name containing one is skipped.
    pub ignore_patterns: Vec<String>,

    /// Quiet window after a change notification before a read cycle fires.
    pub file_debounce_ms: u64,

    /// Interval of the fallback directory re-scan.
    pub poll_interval_secs: u64,

    /// Replay files that already exist at startup from offset 0 instead of
    /// starting at their current end.
    pub replay_existing: bool,

    /// Number of recent line offset ranges remembered per file for
    /// duplicate suppression.
    pub dedup_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            watch_directory: PathBuf::from("./data"),
            game_format: "chatter".to_string(),
            allowed_extensions: vec!["log".to_string()],
            ignore_patterns: Vec::new(),
            file_debounce_ms: 250,
            poll_interval_secs: 5,
            replay_existing: false,
            dedup_window: 256,
        }
    }
}

/// Settings for the delivery side: queueing, retry, and shutdown drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum events held awaiting delivery. Once full, intake pauses and
    /// the pipeline stops forwarding (backpressure).
    pub queue_capacity: usize,

    /// Capacity of the channel between pipeline and dispatcher.
    pub intake_capacity: usize,

    /// Events older than this are dropped from the queue, oldest first,
    /// with a system event recording the drop. `None` disables age drops.
    pub max_event_age_secs: Option<u64>,

    /// Upper bound on the shutdown drain of undelivered events.
    pub shutdown_timeout_secs: u64,

    pub retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            intake_capacity: 64,
            max_event_age_secs: None,
            shutdown_timeout_secs: 5,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff bounds for transient delivery failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Total attempts per event, the first delivery included.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_defaults() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.game_format, "chatter");
        assert_eq!(cfg.allowed_extensions, vec!["log"]);
        assert_eq!(cfg.file_debounce_ms, 250);
        assert!(!cfg.replay_existing);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml = r#"
watch_directory = "/srv/game/logs"
game_format = "bracket"
"#;
        let cfg: MonitorConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.watch_directory, PathBuf::from("/srv/game/logs"));
        assert_eq!(cfg.game_format, "bracket");
        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.dedup_window, 256);
    }

    #[test]
    fn dispatch_roundtrip() {
        let cfg = DispatchConfig {
            queue_capacity: 16,
            max_event_age_secs: Some(60),
            ..Default::default()
        };
        let text = toml::to_string(&cfg).unwrap();
        let back: DispatchConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.queue_capacity, 16);
        assert_eq!(back.max_event_age_secs, Some(60));
        assert_eq!(back.retry.max_attempts, 5);
    }
}
