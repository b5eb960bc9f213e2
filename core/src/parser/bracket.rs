//! Bracket format: lines carrying a fixed-width time-of-day prefix.
//!
//! ```text
//! [21:10:32.156] CHAT u123 hello there
//! [21:10:40.003] JOIN u456
//! [21:11:02.940] SYSTEM map change imminent
//! ```
//!
//! The timestamp is validated byte-wise against its fixed layout before any
//! slicing, so arbitrary input can never panic the parser.

use super::LogParser;
use crate::event::{Event, EventKind, RawLine};
use chrono::{NaiveTime, Utc};

pub struct BracketParser;

impl LogParser for BracketParser {
    fn name(&self) -> &'static str {
        "bracket"
    }

    fn parse(&self, line: &RawLine) -> Option<Event> {
        let text = line.text.trim_end();
        if text.trim().is_empty() {
            return None;
        }

        let Some((rest, time)) = parse_timestamp(text) else {
            return Some(Event::unparsed(line.clone()));
        };

        let mut tokens = rest.split_whitespace();
        let Some(tag) = tokens.next() else {
            return Some(Event::unparsed(line.clone()));
        };

        let mut event = match tag {
            "CHAT" => {
                let Some(player) = tokens.next() else {
                    return Some(Event::unparsed(line.clone()));
                };
                let message = tokens.collect::<Vec<_>>().join(" ");
                Event::from_line(
                    EventKind::Chat,
                    line.clone(),
                    Some(player.to_string()),
                    message,
                )
            }
            "JOIN" | "LEAVE" | "DEATH" => {
                let Some(player) = tokens.next() else {
                    return Some(Event::unparsed(line.clone()));
                };
                let kind = match tag {
                    "JOIN" => EventKind::Join,
                    "LEAVE" => EventKind::Leave,
                    _ => EventKind::Death,
                };
                let message = format!("{player} {}", tag.to_lowercase());
                Event::from_line(kind, line.clone(), Some(player.to_string()), message)
            }
            "SYSTEM" => {
                let message = tokens.collect::<Vec<_>>().join(" ");
                Event::from_line(EventKind::System, line.clone(), None, message)
            }
            _ => return Some(Event::unparsed(line.clone())),
        };

        // Time-of-day from the line, date from arrival: log lines carry no
        // date and the monitor reads within moments of the write.
        event.timestamp = Utc::now()
            .date_naive()
            .and_time(time)
            .and_utc();
        Some(event)
    }
}

/// Parse a `[HH:MM:SS.mmm]` prefix. Returns the remainder after the closing
/// bracket and any following space.
fn parse_timestamp(input: &str) -> Option<(&str, NaiveTime)> {
    let b = input.as_bytes();
    if b.len() < 14 || b[0] != b'[' || b[3] != b':' || b[6] != b':' || b[9] != b'.' || b[13] != b']'
    {
        return None;
    }

    let digits = [b[1], b[2], b[4], b[5], b[7], b[8], b[10], b[11], b[12]];
    if digits.iter().any(|d| !d.is_ascii_digit()) {
        return None;
    }

    let hour = ((b[1] - b'0') * 10 + (b[2] - b'0')) as u32;
    let minute = ((b[4] - b'0') * 10 + (b[5] - b'0')) as u32;
    let second = ((b[7] - b'0') * 10 + (b[8] - b'0')) as u32;
    let millis =
        (b[10] - b'0') as u32 * 100 + (b[11] - b'0') as u32 * 10 + (b[12] - b'0') as u32;

    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, millis)?;
    Some((input[14..].trim_start(), time))
}
