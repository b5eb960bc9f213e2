//! Event model shared by every pipeline stage.
//!
//! A `RawLine` is a complete line lifted out of a tracked file, addressed by
//! its absolute byte range. A parser turns it into at most one `Event`;
//! everything downstream treats events as immutable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Range;
use std::path::PathBuf;

/// Classification of a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Chat,
    Join,
    Leave,
    Death,
    System,
    Unparsed,
}

/// A complete newline-terminated line read from a tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub source: PathBuf,
    pub text: String,
    /// Absolute byte range in the source file, terminator included.
    /// Together with `source` this is the duplicate-suppression key.
    pub offset_range: Range<u64>,
}

/// A structured event ready for enrichment and delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,

    /// Raw player identifier as it appeared in the log line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,

    /// Mapped display name, or the raw identifier when unmapped.
    /// Filled in by the pipeline; parsers leave it empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    pub message: String,

    /// Line this event was parsed from. Synthesized `system` events
    /// have none.
    #[serde(skip)]
    pub raw: Option<RawLine>,
}

impl Event {
    /// Event parsed out of a log line.
    pub fn from_line(kind: EventKind, raw: RawLine, player: Option<String>, message: String) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            player,
            display_name: None,
            message,
            raw: Some(raw),
        }
    }

    /// Event describing something the pipeline itself observed
    /// (truncation reset, file removal, queue drop).
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::System,
            timestamp: Utc::now(),
            player: None,
            display_name: None,
            message: message.into(),
            raw: None,
        }
    }

    /// Fallback for a line no parser rule matched. The raw text is carried
    /// in `message` so nothing is silently discarded.
    pub fn unparsed(raw: RawLine) -> Self {
        let message = raw.text.clone();
        Self {
            kind: EventKind::Unparsed,
            timestamp: Utc::now(),
            player: None,
            display_name: None,
            message,
            raw: Some(raw),
        }
    }
}
