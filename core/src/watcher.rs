//! Directory watching: change notifications, debounce, and a periodic
//! re-scan backstop.
//!
//! Filesystem notifications are the primary trigger; the re-scan exists
//! because notification backends drop events under load, so correctness can
//! never depend on them. Rapid notification bursts for one file are
//! coalesced into a single read cycle by a per-file debounce deadline.

use hashbrown::{HashMap, HashSet};
use notify::{EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tracing::{trace, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch directory {path:?} is not accessible: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start filesystem watcher: {0}")]
    Notify(#[from] notify::Error),
}

/// Events delivered to the monitor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A matching file appeared.
    NewFile(PathBuf),
    /// A matching file changed and its debounce window elapsed.
    Modified(PathBuf),
    /// A matching file disappeared.
    FileRemoved(PathBuf),
    /// The notification backend reported a problem; the re-scan covers it.
    Error(String),
}

/// File name filter recovered from the watcher configuration: allowed
/// extensions plus case-insensitive ignore substrings.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Precomputed lowercase `.ext` suffixes. Empty matches everything.
    suffixes: Vec<String>,
    ignore_patterns: Vec<String>,
}

impl FileFilter {
    pub fn new(allowed_extensions: &[String], ignore_patterns: &[String]) -> Self {
        Self {
            suffixes: allowed_extensions
                .iter()
                .map(|e| format!(".{}", e.trim_start_matches('.').to_ascii_lowercase()))
                .collect(),
            ignore_patterns: ignore_patterns
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let name = name.to_ascii_lowercase();

        if self.ignore_patterns.iter().any(|p| name.contains(p.as_str())) {
            return false;
        }
        if self.suffixes.is_empty() {
            return true;
        }
        self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

enum RawNotification {
    Fs(notify::Event),
    Lost(String),
}

/// Watches one directory, non-recursively, for matching log files.
pub struct DirectoryWatcher {
    dir: PathBuf,
    filter: FileFilter,
    debounce: Duration,
    raw_rx: mpsc::Receiver<RawNotification>,
    // Held for its Drop; dropping it stops the notification stream.
    _watcher: RecommendedWatcher,
    known: HashSet<PathBuf>,
    initial: Vec<PathBuf>,
    pending: HashMap<PathBuf, Instant>,
    ready: VecDeque<WatchEvent>,
    rescan: Interval,
}

impl DirectoryWatcher {
    pub fn new(
        dir: &Path,
        filter: FileFilter,
        debounce: Duration,
        rescan_every: Duration,
    ) -> Result<Self, WatchError> {
        // Prime the known set so files present at startup are not reported
        // as new; the monitor decides separately where to start them.
        let entries = std::fs::read_dir(dir).map_err(|source| WatchError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut known = HashSet::new();
        let mut initial = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && filter.matches(&path) {
                known.insert(path.clone());
                initial.push(path);
            }
        }
        initial.sort();

        let (raw_tx, raw_rx) = mpsc::channel(256);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                let notification = match res {
                    Ok(event) => RawNotification::Fs(event),
                    Err(e) => RawNotification::Lost(e.to_string()),
                };
                // A full channel means a burst; the re-scan catches up.
                let _ = raw_tx.try_send(notification);
            },
            notify::Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let mut rescan = interval_at(Instant::now() + rescan_every, rescan_every);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self {
            dir: dir.to_path_buf(),
            filter,
            debounce,
            raw_rx,
            _watcher: watcher,
            known,
            initial,
            pending: HashMap::new(),
            ready: VecDeque::new(),
            rescan,
        })
    }

    /// Matching files that existed when the watcher started.
    pub fn initial_files(&self) -> &[PathBuf] {
        &self.initial
    }

    /// Next watch event. Returns `None` only if the notification backend
    /// is gone, which does not happen in normal operation.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }

            let next_deadline = self.pending.values().min().copied();
            let wake = next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                raw = self.raw_rx.recv() => match raw {
                    Some(RawNotification::Fs(event)) => self.ingest(event),
                    Some(RawNotification::Lost(msg)) => {
                        warn!(error = %msg, "notification backend error");
                        self.ready.push_back(WatchEvent::Error(msg));
                    }
                    None => return None,
                },
                _ = self.rescan.tick() => self.rescan_directory(),
                _ = sleep_until(wake), if next_deadline.is_some() => self.flush_due(),
            }
        }
    }

    fn ingest(&mut self, event: notify::Event) {
        for path in &event.paths {
            if !self.filter.matches(path) {
                continue;
            }
            match event.kind {
                NotifyKind::Remove(_) => self.note_removed(path),
                NotifyKind::Create(_) | NotifyKind::Modify(_) | NotifyKind::Any => {
                    if self.known.contains(path) {
                        // Renames and removals surface here too; the tail
                        // tracker sorts them out when the read cycle fires.
                        self.arm_debounce(path);
                    } else if path.is_file() {
                        self.note_created(path);
                    }
                }
                _ => {}
            }
        }
    }

    fn note_created(&mut self, path: &Path) {
        trace!(path = %path.display(), "new file");
        self.known.insert(path.to_path_buf());
        self.pending.remove(path);
        self.ready.push_back(WatchEvent::NewFile(path.to_path_buf()));
    }

    fn note_removed(&mut self, path: &Path) {
        if self.known.remove(path) {
            self.pending.remove(path);
            self.ready.push_back(WatchEvent::FileRemoved(path.to_path_buf()));
        }
    }

    /// Arm a debounce deadline unless one is already pending; later
    /// notifications inside the window are absorbed by the existing one.
    fn arm_debounce(&mut self, path: &Path) {
        let deadline = Instant::now() + self.debounce;
        self.pending.entry(path.to_path_buf()).or_insert(deadline);
    }

    fn flush_due(&mut self) {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in due {
            self.pending.remove(&path);
            self.ready.push_back(WatchEvent::Modified(path));
        }
    }

    /// Fallback pass over the directory: pick up anything the notification
    /// stream missed and schedule a read cycle for every known file.
    fn rescan_directory(&mut self) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "re-scan failed");
                return;
            }
        };

        let mut present = HashSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !self.filter.matches(&path) {
                continue;
            }
            if self.known.contains(&path) {
                self.arm_debounce(&path);
            } else {
                self.note_created(&path);
            }
            present.insert(path);
        }

        let gone: Vec<PathBuf> = self
            .known
            .iter()
            .filter(|p| !present.contains(*p))
            .cloned()
            .collect();
        for path in gone {
            self.note_removed(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn filter() -> FileFilter {
        FileFilter::new(&["log".to_string()], &[])
    }

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    async fn expect_event(watcher: &mut DirectoryWatcher) -> WatchEvent {
        timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .expect("timed out waiting for watch event")
            .expect("watcher stream ended")
    }

    #[test]
    fn filter_matches_extensions_case_insensitively() {
        let filter = FileFilter::new(&["log".to_string(), ".txt".to_string()], &[]);
        assert!(filter.matches(Path::new("/srv/Server.LOG")));
        assert!(filter.matches(Path::new("notes.txt")));
        assert!(!filter.matches(Path::new("save.se1")));
    }

    #[test]
    fn filter_applies_ignore_patterns() {
        let filter = FileFilter::new(&["log".to_string()], &["Backup".to_string()]);
        assert!(!filter.matches(Path::new("server-BACKUP.log")));
        assert!(filter.matches(Path::new("server.log")));
    }

    #[test]
    fn empty_extension_list_matches_everything() {
        let filter = FileFilter::new(&[], &[]);
        assert!(filter.matches(Path::new("anything.bin")));
    }

    #[tokio::test]
    async fn reports_existing_files_without_events() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("pre.log"), "old\n");
        append(&dir.path().join("skip.tmp"), "x\n");

        let watcher = DirectoryWatcher::new(
            dir.path(),
            filter(),
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
        .unwrap();

        assert_eq!(watcher.initial_files(), &[dir.path().join("pre.log")]);
    }

    #[tokio::test]
    async fn detects_create_modify_remove() {
        let dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(
            dir.path(),
            filter(),
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
        .unwrap();

        let path = dir.path().join("server.log");
        append(&path, "one\n");
        assert_eq!(expect_event(&mut watcher).await, WatchEvent::NewFile(path.clone()));

        append(&path, "two\n");
        let event = expect_event(&mut watcher).await;
        assert_eq!(event, WatchEvent::Modified(path.clone()));

        std::fs::remove_file(&path).unwrap();
        loop {
            match expect_event(&mut watcher).await {
                WatchEvent::FileRemoved(p) => {
                    assert_eq!(p, path);
                    break;
                }
                WatchEvent::Modified(_) => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let result = DirectoryWatcher::new(
            &missing,
            filter(),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(WatchError::Directory { .. })));
    }
}
