//! Enrichment and duplicate suppression between parser and dispatcher.
//!
//! Duplicates only arise within a short window — overlapping change
//! notifications or a replayed read cycle — so a bounded per-file ring of
//! recently seen offset ranges is enough; it is never a durable ledger.

use crate::event::Event;
use crate::mapping::UserMapping;
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Recently seen offset ranges for one file, bounded to the newest K.
#[derive(Debug, Default)]
struct SeenWindow {
    order: VecDeque<(u64, u64)>,
    set: HashSet<(u64, u64)>,
}

impl SeenWindow {
    /// Record a range; returns false if it was already present.
    fn insert(&mut self, range: &Range<u64>, capacity: usize) -> bool {
        let key = (range.start, range.end);
        if !self.set.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// Orders, deduplicates, and enriches parsed events.
pub struct EventPipeline {
    mapping: Arc<UserMapping>,
    seen: HashMap<PathBuf, SeenWindow>,
    window: usize,
}

impl EventPipeline {
    pub fn new(mapping: Arc<UserMapping>, window: usize) -> Self {
        Self {
            mapping,
            seen: HashMap::new(),
            window: window.max(1),
        }
    }

    /// Enrich an event with its resolved display name, suppressing it if
    /// its source range was already processed. Events without a source line
    /// (synthesized `system` events) always pass through.
    pub fn process(&mut self, mut event: Event) -> Option<Event> {
        if let Some(raw) = &event.raw {
            let window = self.window;
            let seen = self.seen.entry(raw.source.clone()).or_default();
            if !seen.insert(&raw.offset_range, window) {
                return None;
            }
        }

        if let Some(player) = &event.player {
            event.display_name = Some(self.mapping.resolve(player).to_string());
        }

        Some(event)
    }

    /// Drop dedup state for a file that is no longer tracked.
    pub fn forget(&mut self, path: &Path) {
        self.seen.remove(path);
    }
}
