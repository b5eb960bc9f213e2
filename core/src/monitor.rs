//! Top-level monitoring loop.
//!
//! One task owns every tracker's offset state and reacts to watch events;
//! the dispatcher runs beside it, fed through a bounded channel. When the
//! dispatcher is at capacity the `enqueue` await suspends this loop, which
//! is the backpressure the rest of the pipeline inherits: files keep
//! growing, but no new lines are forwarded until capacity recovers.

use crate::dispatch::{DispatchHandle, Dispatcher, EventSink};
use crate::event::Event;
use crate::mapping::UserMapping;
use crate::parser::{LogParser, ParserRegistry, UnknownFormat};
use crate::pipeline::EventPipeline;
use crate::tail::{TailCycle, TailNote, TailTracker};
use crate::watcher::{DirectoryWatcher, FileFilter, WatchError, WatchEvent};
use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{info, warn};
use vigil_types::{DispatchConfig, MonitorConfig};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormat),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Ties watcher, trackers, parser, pipeline, and dispatcher together for
/// one watched directory.
pub struct Monitor<S> {
    cfg: MonitorConfig,
    dispatch_cfg: DispatchConfig,
    parser: Arc<dyn LogParser>,
    pipeline: EventPipeline,
    sink: S,
}

impl<S: EventSink> Monitor<S> {
    /// Validate configuration and assemble the pipeline. Configuration
    /// problems (unknown game format) surface here, before anything runs.
    pub fn new(
        cfg: MonitorConfig,
        dispatch_cfg: DispatchConfig,
        mapping: UserMapping,
        sink: S,
    ) -> Result<Self, MonitorError> {
        let parser = ParserRegistry::builtin().select(&cfg.game_format)?;
        let pipeline = EventPipeline::new(Arc::new(mapping), cfg.dedup_window);
        Ok(Self {
            cfg,
            dispatch_cfg,
            parser,
            pipeline,
            sink,
        })
    }

    /// Run until the shutdown flag is raised. The dispatcher queue is
    /// drained best-effort before returning.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        let Monitor {
            cfg,
            dispatch_cfg,
            parser,
            pipeline,
            sink,
        } = self;

        let filter = FileFilter::new(&cfg.allowed_extensions, &cfg.ignore_patterns);
        let mut watcher = DirectoryWatcher::new(
            &cfg.watch_directory,
            filter,
            Duration::from_millis(cfg.file_debounce_ms),
            Duration::from_secs(cfg.poll_interval_secs.max(1)),
        )?;

        let (handle, dispatcher) = Dispatcher::new(sink, dispatch_cfg);
        let dispatcher_task = tokio::spawn(dispatcher.run(shutdown.clone()));

        let mut state = LoopState {
            parser,
            pipeline,
            trackers: HashMap::new(),
            handle,
        };

        state
            .seed_existing(watcher.initial_files(), cfg.replay_existing)
            .await;
        info!(
            dir = %cfg.watch_directory.display(),
            files = state.trackers.len(),
            format = %cfg.game_format,
            "monitoring started"
        );

        let mut shutdown_rx = shutdown;
        loop {
            let step = tokio::select! {
                event = watcher.next_event() => event,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("shutdown signal received");
                        break;
                    }
                    continue;
                }
            };

            match step {
                Some(event) => {
                    if !state.handle_event(event).await {
                        // Dispatcher is gone; nothing left to deliver to.
                        break;
                    }
                }
                None => break,
            }
        }

        // Stop accepting notifications, then let the dispatcher drain.
        drop(watcher);
        drop(state);
        let _ = dispatcher_task.await;
        Ok(())
    }
}

/// Mutable state owned by the monitor loop. Every tracker has exactly one
/// writer: this task.
struct LoopState {
    parser: Arc<dyn LogParser>,
    pipeline: EventPipeline,
    trackers: HashMap<PathBuf, TailTracker>,
    handle: DispatchHandle,
}

impl LoopState {
    /// Build trackers for files present at startup. History is skipped
    /// unless replay is requested.
    async fn seed_existing(&mut self, paths: &[PathBuf], replay: bool) {
        for path in paths.to_vec() {
            let opened = if replay {
                TailTracker::open(&path)
            } else {
                TailTracker::open_at_end(&path)
            };
            match opened {
                Ok(mut tracker) => {
                    if replay {
                        let cycle = tracker.on_file_event();
                        self.trackers.insert(path.clone(), tracker);
                        self.forward_cycle(&path, cycle).await;
                    } else {
                        self.trackers.insert(path, tracker);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not open existing file");
                }
            }
        }
    }

    /// React to one watch event. Returns false once the dispatcher has
    /// gone away and delivery is impossible.
    async fn handle_event(&mut self, event: WatchEvent) -> bool {
        match event {
            WatchEvent::NewFile(path) => {
                // Files appearing while we run are read from the start.
                match TailTracker::open(&path) {
                    Ok(mut tracker) => {
                        info!(path = %path.display(), "tracking new file");
                        let cycle = tracker.on_file_event();
                        self.trackers.insert(path.clone(), tracker);
                        self.forward_cycle(&path, cycle).await
                    }
                    Err(e) => {
                        // Created and deleted again before we got here; the
                        // next notification or re-scan retries.
                        warn!(path = %path.display(), error = %e, "could not open new file");
                        true
                    }
                }
            }

            WatchEvent::Modified(path) => {
                let (cycle, stale) = match self.trackers.get_mut(&path) {
                    Some(tracker) => (tracker.on_file_event(), tracker.is_stale()),
                    // Raced a removal, or the re-scan will report it as new.
                    None => return true,
                };
                let ok = self.forward_cycle(&path, cycle).await;
                if stale {
                    self.trackers.remove(&path);
                    self.pipeline.forget(&path);
                }
                ok
            }

            WatchEvent::FileRemoved(path) => {
                if self.trackers.remove(&path).is_some() {
                    info!(path = %path.display(), "stopped tracking removed file");
                    self.pipeline.forget(&path);
                    return self
                        .dispatch(Event::system(format!(
                            "stopped tracking removed file {}",
                            path.display()
                        )))
                        .await;
                }
                true
            }

            WatchEvent::Error(message) => {
                warn!(%message, "watcher error, relying on re-scan");
                true
            }
        }
    }

    /// Push one read cycle through parse → enrich/dedup → dispatch.
    /// State-machine notes go first so a truncation reset is announced
    /// before the re-read lines that follow it.
    async fn forward_cycle(&mut self, path: &Path, cycle: TailCycle) -> bool {
        for note in &cycle.notes {
            let message = match note {
                TailNote::Truncated { dropped_bytes } => {
                    // Offsets restart at zero, so remembered ranges would
                    // wrongly suppress rewritten lines of the same length.
                    self.pipeline.forget(path);
                    format!(
                        "{} truncated after {dropped_bytes} consumed bytes, restarting from offset 0",
                        path.display()
                    )
                }
                TailNote::Rotated => {
                    self.pipeline.forget(path);
                    format!("{} rotated, tailing new file from offset 0", path.display())
                }
                TailNote::Vanished => {
                    format!("{} disappeared, tracking stopped", path.display())
                }
            };
            if !self.dispatch(Event::system(message)).await {
                return false;
            }
        }

        for line in cycle.lines {
            if let Some(event) = self.parser.parse(&line) {
                if !self.dispatch(event).await {
                    return false;
                }
            }
        }
        true
    }

    async fn dispatch(&mut self, event: Event) -> bool {
        match self.pipeline.process(event) {
            Some(event) => self.handle.enqueue(event).await,
            None => true, // duplicate suppressed
        }
    }
}
