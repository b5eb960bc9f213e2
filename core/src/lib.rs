pub mod dispatch;
pub mod event;
pub mod mapping;
pub mod monitor;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod tail;
pub mod watcher;

// Re-exports for convenience
pub use dispatch::{DispatchHandle, Dispatcher, EventSink, SinkError};
pub use event::{Event, EventKind, RawLine};
pub use mapping::UserMapping;
pub use monitor::Monitor;
pub use parser::{LogParser, ParserRegistry};
pub use sink::ConsoleSink;
