//! Per-instance diagnostics.
//!
//! Components never log through a process-wide, per-type logger. Each one is
//! handed a [`Diagnostics`] value at construction, which carries the log
//! target for that instance (for example `gfx_lifecycle::ctx0::buffers`).
//! Records always go to the [`log`] facade; when a [`DiagnosticLog`] capture
//! is attached they are additionally kept in a bounded ring buffer so the
//! owner (or a test) can inspect exactly what was reported.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Default ring buffer size for captured entries.
pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// A single captured diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub level: log::Level,
    pub target: String,
    pub message: String,
}

/// Ring buffer of captured diagnostic records.
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: VecDeque<DiagnosticEntry>,
    max_capacity: usize,
}

impl DiagnosticLog {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_capacity.min(1024)),
            max_capacity: max_capacity.max(1),
        }
    }

    pub fn entries(&self) -> &VecDeque<DiagnosticEntry> {
        &self.entries
    }

    /// Number of captured records at exactly `level`.
    pub fn count(&self, level: log::Level) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// Records at `level` whose message contains `needle`.
    pub fn matching<'a>(
        &'a self,
        level: log::Level,
        needle: &'a str,
    ) -> impl Iterator<Item = &'a DiagnosticEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.level == level && e.message.contains(needle))
    }

    fn push(&mut self, entry: DiagnosticEntry) {
        if self.entries.len() >= self.max_capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Diagnostics collaborator owned by one component instance.
#[derive(Clone)]
pub struct Diagnostics {
    target: Arc<str>,
    capture: Option<Arc<Mutex<DiagnosticLog>>>,
}

impl Diagnostics {
    /// Diagnostics that only forward to the `log` facade.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Arc::from(target.into()),
            capture: None,
        }
    }

    /// Diagnostics with a fresh capture buffer of `capacity` entries.
    pub fn capturing(target: impl Into<String>, capacity: usize) -> Self {
        Self::new(target).with_capture(Arc::new(Mutex::new(DiagnosticLog::new(capacity))))
    }

    /// Attach a capture buffer. Children created afterwards share it.
    pub fn with_capture(mut self, capture: Arc<Mutex<DiagnosticLog>>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Derive the diagnostics of a sub-component: same capture, nested target.
    pub fn child(&self, name: &str) -> Self {
        Self {
            target: Arc::from(format!("{}::{}", self.target, name)),
            capture: self.capture.clone(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn capture(&self) -> Option<&Arc<Mutex<DiagnosticLog>>> {
        self.capture.as_ref()
    }

    pub fn record(&self, level: log::Level, args: fmt::Arguments<'_>) {
        log::log!(target: &*self.target, level, "{}", args);

        if let Some(capture) = &self.capture {
            capture.lock().push(DiagnosticEntry {
                level,
                target: self.target.to_string(),
                message: args.to_string(),
            });
        }
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.record(log::Level::Trace, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.record(log::Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.record(log::Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.record(log::Level::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.record(log::Level::Error, args);
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(env!("CARGO_CRATE_NAME"))
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("target", &self.target)
            .field("capturing", &self.capture.is_some())
            .finish()
    }
}
