//! Built-in sink: one JSON object per line on stdout.
//!
//! This is the default downstream collaborator so the daemon runs end to
//! end out of the box; real deployments implement `EventSink` against
//! their own delivery target.

use crate::dispatch::{EventSink, SinkError};
use crate::event::Event;
use std::future::Future;

pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn submit(&self, event: &Event) -> impl Future<Output = Result<(), SinkError>> + Send {
        let payload = serde_json::to_string(event).map_err(|e| SinkError::Permanent(e.to_string()));
        async move {
            let json = payload?;
            println!("{json}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[tokio::test]
    async fn submits_serializable_events() {
        let mut event = Event::system("hello");
        event.kind = EventKind::Chat;
        assert!(ConsoleSink.submit(&event).await.is_ok());
    }
}
