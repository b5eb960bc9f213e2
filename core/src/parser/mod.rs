//! Game-format parsing behind one narrow interface.
//!
//! A parser turns one complete line into at most one event. Implementations
//! are pure and total: no I/O, no panics on malformed input — anything
//! nonempty that matches no rule degrades to an `unparsed` event so it is
//! never silently discarded. The format is selected once per process run by
//! a configured identifier; adding a game means adding an implementation
//! here, not touching the pipeline.

mod bracket;
mod chatter;

pub use bracket::BracketParser;
pub use chatter::ChatterParser;

use crate::event::{Event, RawLine};
use hashbrown::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Format used when the configuration names none.
pub const DEFAULT_FORMAT: &str = "chatter";

pub trait LogParser: Send + Sync {
    /// Identifier this parser is selected by.
    fn name(&self) -> &'static str;

    /// Convert one complete line into at most one event.
    ///
    /// Returns `None` only for lines that carry no event (blank lines).
    /// Malformed input yields an `unparsed` event instead.
    fn parse(&self, line: &RawLine) -> Option<Event>;
}

#[derive(Debug, Error)]
#[error("unknown game format {name:?} (known formats: {known})")]
pub struct UnknownFormat {
    pub name: String,
    pub known: String,
}

/// Flat table of format identifier → parser, with a named default.
pub struct ParserRegistry {
    parsers: HashMap<&'static str, Arc<dyn LogParser>>,
}

impl ParserRegistry {
    /// Registry holding the built-in formats.
    pub fn builtin() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
        };
        registry.register(Arc::new(ChatterParser));
        registry.register(Arc::new(BracketParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn LogParser>) {
        self.parsers.insert(parser.name(), parser);
    }

    /// Look up a parser by its configured identifier.
    pub fn select(&self, name: &str) -> Result<Arc<dyn LogParser>, UnknownFormat> {
        self.parsers
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownFormat {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
pub(crate) fn test_line(text: &str) -> RawLine {
    RawLine {
        source: std::path::PathBuf::from("server.log"),
        text: text.to_string(),
        offset_range: 0..text.len() as u64 + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn selects_default_format() {
        let registry = ParserRegistry::builtin();
        let parser = registry.select(DEFAULT_FORMAT).unwrap();
        assert_eq!(parser.name(), "chatter");
    }

    #[test]
    fn unknown_format_lists_known_names() {
        let registry = ParserRegistry::builtin();
        let err = registry.select("pbem1").err().unwrap();
        assert_eq!(err.name, "pbem1");
        assert_eq!(err.known, "bracket, chatter");
    }

    #[test]
    fn registered_parser_is_selectable() {
        struct Null;
        impl LogParser for Null {
            fn name(&self) -> &'static str {
                "null"
            }
            fn parse(&self, _line: &RawLine) -> Option<Event> {
                None
            }
        }

        let mut registry = ParserRegistry::builtin();
        registry.register(Arc::new(Null));
        assert!(registry.select("null").is_ok());
    }

    #[test]
    fn parsers_are_total_over_garbage() {
        let registry = ParserRegistry::builtin();
        for name in registry.names() {
            let parser = registry.select(name).unwrap();
            let event = parser.parse(&test_line("\u{1}\u{2} not a log line")).unwrap();
            assert_eq!(event.kind, EventKind::Unparsed, "format {name}");
            assert!(parser.parse(&test_line("")).is_none(), "format {name}");
        }
    }
}
