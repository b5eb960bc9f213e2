//! Default format: plain chat lines with `*`-prefixed presence notices.
//!
//! ```text
//! u123: hello there
//! * u456 joined
//! * u456 left
//! * u123 died
//! ```

use super::LogParser;
use crate::event::{Event, EventKind, RawLine};
use memchr::memchr;

pub struct ChatterParser;

impl LogParser for ChatterParser {
    fn name(&self) -> &'static str {
        "chatter"
    }

    fn parse(&self, line: &RawLine) -> Option<Event> {
        let text = line.text.trim_end();
        if text.trim().is_empty() {
            return None;
        }

        if let Some(notice) = text.strip_prefix("* ") {
            return Some(parse_notice(line, notice));
        }

        Some(parse_chat(line, text))
    }
}

/// `player: message`. The identifier must be a single token and the colon
/// must be followed by a space (or end the line), otherwise the line is
/// not chat.
fn parse_chat(line: &RawLine, text: &str) -> Event {
    let bytes = text.as_bytes();
    let Some(colon) = memchr(b':', bytes) else {
        return Event::unparsed(line.clone());
    };

    let player = &text[..colon];
    if player.is_empty() || player.contains(char::is_whitespace) {
        return Event::unparsed(line.clone());
    }

    let rest = &text[colon + 1..];
    let message = match rest.strip_prefix(' ') {
        Some(message) => message,
        None if rest.is_empty() => "",
        None => return Event::unparsed(line.clone()),
    };

    Event::from_line(
        EventKind::Chat,
        line.clone(),
        Some(player.to_string()),
        message.to_string(),
    )
}

/// `* player joined|left|died`.
fn parse_notice(line: &RawLine, notice: &str) -> Event {
    let mut tokens = notice.split_whitespace();
    let (Some(player), Some(verb)) = (tokens.next(), tokens.next()) else {
        return Event::unparsed(line.clone());
    };

    let kind = match verb {
        "joined" => EventKind::Join,
        "left" => EventKind::Leave,
        "died" => EventKind::Death,
        _ => return Event::unparsed(line.clone()),
    };

    Event::from_line(
        kind,
        line.clone(),
        Some(player.to_string()),
        notice.to_string(),
    )
}
