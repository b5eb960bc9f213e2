//! Incremental tailing of a single append-mostly log file.
//!
//! Each tracked file is owned by exactly one `TailTracker`, which holds an
//! open handle, the byte offset just past the last complete line consumed,
//! and any unterminated trailing fragment. The open handle is what makes
//! rotation safe: after the path is re-pointed at a new file, the bytes
//! remaining in the old one are still readable through the handle.

use crate::event::RawLine;
use memchr::memchr_iter;
use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Upper bound on bytes consumed in a single read cycle. A larger backlog
/// is drained across subsequent cycles.
const MAX_READ_BYTES: u64 = 4 * 1024 * 1024;

/// Stable identity of an open file, compared against the path's current
/// occupant to detect rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        // No inode available; creation time is the closest stable handle.
        let created = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self { dev: 0, ino: created }
    }
}

/// Things a read cycle observed beyond the lines themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailNote {
    /// File shrank in place; the read offset was reset to zero.
    Truncated { dropped_bytes: u64 },
    /// The path now points at a new file; the old one was flushed first.
    Rotated,
    /// The file disappeared; the tracker is stale and should be dropped.
    Vanished,
}

/// Result of one read cycle: complete lines in file order, plus any
/// state-machine transitions that occurred.
#[derive(Debug, Default)]
pub struct TailCycle {
    pub lines: Vec<RawLine>,
    pub notes: Vec<TailNote>,
}

/// Per-file tail state machine.
#[derive(Debug)]
pub struct TailTracker {
    path: PathBuf,
    file: File,
    identity: FileIdentity,
    /// Byte position just past the last complete line consumed.
    last_offset: u64,
    /// File size at the last cycle, for truncation detection.
    last_size: u64,
    /// Unterminated trailing fragment carried between reads.
    pending: Vec<u8>,
    stale: bool,
}

impl TailTracker {
    /// Open a tracker positioned at the start of the file.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::open_at(path, 0)
    }

    /// Open a tracker positioned at the current end of the file, skipping
    /// pre-existing history.
    pub fn open_at_end(path: &Path) -> io::Result<Self> {
        let len = std::fs::metadata(path)?.len();
        Self::open_at(path, len)
    }

    fn open_at(path: &Path, offset: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        Ok(Self {
            path: path.to_path_buf(),
            identity: FileIdentity::of(&meta),
            last_offset: offset,
            last_size: meta.len(),
            pending: Vec::new(),
            stale: false,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A stale tracker lost its file and reads nothing further.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// React to a change notification for this tracker's path: re-stat,
    /// detect truncation/rotation/removal, then drain new complete lines.
    pub fn on_file_event(&mut self) -> TailCycle {
        let mut cycle = TailCycle::default();
        if self.stale {
            return cycle;
        }

        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "tracked file vanished");
                self.stale = true;
                cycle.notes.push(TailNote::Vanished);
                return cycle;
            }
            Err(e) => {
                // Transient stat failure; the next notification or re-scan
                // retries.
                trace!(path = %self.path.display(), error = %e, "stat failed");
                return cycle;
            }
        };

        let identity = FileIdentity::of(&meta);
        if identity != self.identity {
            self.handle_rotation(identity, &mut cycle);
            return cycle;
        }

        if meta.len() < self.last_size {
            let dropped_bytes = self.last_offset + self.pending.len() as u64;
            debug!(
                path = %self.path.display(),
                dropped_bytes,
                "file truncated, resetting to start"
            );
            self.last_offset = 0;
            self.last_size = 0;
            self.pending.clear();
            cycle.notes.push(TailNote::Truncated { dropped_bytes });
        }

        self.read_new_bytes(&mut cycle);
        cycle
    }

    /// Drain bytes between the logical read cursor and the current end of
    /// the tracked identity, splitting them into complete lines.
    pub fn read_new_bytes(&mut self, cycle: &mut TailCycle) {
        let end = match self.file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                trace!(path = %self.path.display(), error = %e, "handle stat failed");
                return;
            }
        };

        let read_pos = self.last_offset + self.pending.len() as u64;
        if end <= read_pos {
            self.last_size = end;
            return;
        }

        let want = (end - read_pos).min(MAX_READ_BYTES);
        let mut buf = Vec::with_capacity(want as usize);
        let read = self
            .file
            .seek(SeekFrom::Start(read_pos))
            .and_then(|_| (&self.file).take(want).read_to_end(&mut buf));
        if let Err(e) = read {
            // Transient read failure; offsets are untouched so the next
            // notification retries the same range.
            trace!(path = %self.path.display(), error = %e, "read failed");
            return;
        }

        self.split_lines(&buf, &mut cycle.lines);
        self.last_size = read_pos + buf.len() as u64;
    }

    /// Split a freshly read chunk on line terminators. The fragment after
    /// the last terminator is retained and prefixed to the next read;
    /// `last_offset` only advances past complete lines.
    fn split_lines(&mut self, buf: &[u8], lines: &mut Vec<RawLine>) {
        let mut seg_start = 0usize;
        for nl_pos in memchr_iter(b'\n', buf) {
            let start_abs = self.last_offset;
            let end_abs =
                start_abs + self.pending.len() as u64 + (nl_pos - seg_start) as u64 + 1;

            let mut bytes = std::mem::take(&mut self.pending);
            bytes.extend_from_slice(&buf[seg_start..nl_pos]);
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }

            lines.push(RawLine {
                source: self.path.clone(),
                text: String::from_utf8_lossy(&bytes).into_owned(),
                offset_range: start_abs..end_abs,
            });

            self.last_offset = end_abs;
            seg_start = nl_pos + 1;
        }

        if seg_start < buf.len() {
            self.pending.extend_from_slice(&buf[seg_start..]);
        }
    }

    /// The path points at a different file than the one we hold open.
    /// Drain what remains of the old identity through the handle, emit the
    /// unterminated tail (it will never be completed), then restart on the
    /// new occupant at offset zero.
    fn handle_rotation(&mut self, new_identity: FileIdentity, cycle: &mut TailCycle) {
        self.read_new_bytes(cycle);

        if !self.pending.is_empty() {
            let start_abs = self.last_offset;
            let end_abs = start_abs + self.pending.len() as u64;
            let bytes = std::mem::take(&mut self.pending);
            cycle.lines.push(RawLine {
                source: self.path.clone(),
                text: String::from_utf8_lossy(&bytes).into_owned(),
                offset_range: start_abs..end_abs,
            });
            self.last_offset = end_abs;
        }

        match File::open(&self.path) {
            Ok(file) => {
                debug!(path = %self.path.display(), "file rotated, restarting at offset 0");
                self.file = file;
                self.identity = new_identity;
                self.last_offset = 0;
                self.last_size = 0;
                cycle.notes.push(TailNote::Rotated);
                self.read_new_bytes(cycle);
            }
            Err(_) => {
                // New occupant disappeared between stat and open. Treat as
                // removal; the watcher recreates a tracker if it comes back.
                self.stale = true;
                cycle.notes.push(TailNote::Vanished);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn texts(cycle: &TailCycle) -> Vec<&str> {
        cycle.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn reads_appended_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "one\ntwo\n");

        let mut tracker = TailTracker::open(&path).unwrap();
        let cycle = tracker.on_file_event();
        assert_eq!(texts(&cycle), vec!["one", "two"]);
        assert_eq!(cycle.lines[0].offset_range, 0..4);
        assert_eq!(cycle.lines[1].offset_range, 4..8);
        assert_eq!(tracker.last_offset(), 8);

        append(&path, "three\n");
        let cycle = tracker.on_file_event();
        assert_eq!(texts(&cycle), vec!["three"]);
        assert_eq!(cycle.lines[0].offset_range, 8..14);
    }

    #[test]
    fn buffers_partial_line_across_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "hel");

        let mut tracker = TailTracker::open(&path).unwrap();
        let cycle = tracker.on_file_event();
        assert!(cycle.lines.is_empty());
        assert_eq!(tracker.last_offset(), 0);

        append(&path, "lo\nnext");
        let cycle = tracker.on_file_event();
        assert_eq!(texts(&cycle), vec!["hello"]);
        assert_eq!(cycle.lines[0].offset_range, 0..6);

        append(&path, "\n");
        let cycle = tracker.on_file_event();
        assert_eq!(texts(&cycle), vec!["next"]);
    }

    #[test]
    fn strips_crlf_terminators() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "alpha\r\nbeta\r\n");

        let mut tracker = TailTracker::open(&path).unwrap();
        let cycle = tracker.on_file_event();
        assert_eq!(texts(&cycle), vec!["alpha", "beta"]);
        // Ranges still cover the terminator bytes.
        assert_eq!(cycle.lines[0].offset_range, 0..7);
        assert_eq!(cycle.lines[1].offset_range, 7..13);
    }

    #[test]
    fn open_at_end_skips_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "old one\nold two\n");

        let mut tracker = TailTracker::open_at_end(&path).unwrap();
        let cycle = tracker.on_file_event();
        assert!(cycle.lines.is_empty());

        append(&path, "new\n");
        let cycle = tracker.on_file_event();
        assert_eq!(texts(&cycle), vec!["new"]);
    }

    #[test]
    fn truncation_resets_to_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "one\ntwo\n");

        let mut tracker = TailTracker::open(&path).unwrap();
        tracker.on_file_event();

        // Shrink in place, keeping the same identity.
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(0).unwrap();
        drop(f);
        append(&path, "re\n");

        let cycle = tracker.on_file_event();
        assert_eq!(
            cycle.notes,
            vec![TailNote::Truncated { dropped_bytes: 8 }]
        );
        assert_eq!(texts(&cycle), vec!["re"]);
        assert_eq!(cycle.lines[0].offset_range, 0..3);
    }

    #[test]
    fn rotation_flushes_old_identity_then_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "one\n");

        let mut tracker = TailTracker::open(&path).unwrap();
        tracker.on_file_event();

        // Bytes the tracker has not seen yet, ending without a terminator.
        append(&path, "two\ntail");

        // Rotate: rename away, create a fresh file at the same path.
        std::fs::rename(&path, dir.path().join("server.log.1")).unwrap();
        append(&path, "fresh\n");

        let cycle = tracker.on_file_event();
        assert_eq!(cycle.notes, vec![TailNote::Rotated]);
        assert_eq!(texts(&cycle), vec!["two", "tail", "fresh"]);
        // New identity restarts at offset zero.
        assert_eq!(cycle.lines[2].offset_range, 0..6);
        assert!(!tracker.is_stale());
    }

    #[test]
    fn vanished_file_marks_tracker_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "one\n");

        let mut tracker = TailTracker::open(&path).unwrap();
        tracker.on_file_event();

        std::fs::remove_file(&path).unwrap();
        let cycle = tracker.on_file_event();
        assert_eq!(cycle.notes, vec![TailNote::Vanished]);
        assert!(tracker.is_stale());

        // Further events are no-ops.
        let cycle = tracker.on_file_event();
        assert!(cycle.lines.is_empty());
        assert!(cycle.notes.is_empty());
    }

    #[test]
    fn redelivered_notification_produces_nothing_new() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        append(&path, "one\n");

        let mut tracker = TailTracker::open(&path).unwrap();
        let first = tracker.on_file_event();
        assert_eq!(first.lines.len(), 1);

        let second = tracker.on_file_event();
        assert!(second.lines.is_empty());
        assert!(second.notes.is_empty());
    }
}
