//! Ordered, typed diagnostic trail.
//!
//! Every component reports through a [`LogSink`]. Entries keep emission order,
//! carry a unique id and a local timestamp, and are only ever removed all at
//! once by [`LogSink::clear`]. Appending never fails: the sink is used inside
//! the error paths of everything else.
//!
//! Each entry is also forwarded to the `log` facade under the
//! `m4gflash::trail` target, so a CLI run with `-vv` shows the same trail a
//! front-end would render.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

const LOG_TARGET: &str = "m4gflash::trail";

/// Kind of trail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogVariant {
    /// Regular progress message.
    Info,
    /// A failure (tolerated or not).
    Error,
    /// A completed milestone.
    Success,
    /// Low-level detail for diagnosis.
    Trace,
}

impl fmt::Display for LogVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

/// One trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Unique id, never reused, not even after [`LogSink::clear`].
    pub id: u64,
    /// Local wall-clock time of emission.
    pub timestamp: String,
    /// Human-readable message.
    pub message: String,
    /// Entry kind.
    pub variant: LogVariant,
}

#[derive(Debug, Default)]
struct SinkInner {
    next_id: AtomicU64,
    entries: Mutex<Vec<LogEntry>>,
}

/// Append-only trail shared by every component.
///
/// Cloning is cheap; clones append to the same sequence.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn append(&self, message: impl Into<String>, variant: LogVariant) {
        let message = message.into();
        match variant {
            LogVariant::Error => log::error!(target: LOG_TARGET, "{message}"),
            LogVariant::Info | LogVariant::Success => log::info!(target: LOG_TARGET, "{message}"),
            LogVariant::Trace => log::trace!(target: LOG_TARGET, "{message}"),
        }

        let id = self
            .inner
            .next_id
            .fetch_add(1, Ordering::Relaxed);
        let entry = LogEntry {
            id,
            timestamp: chrono::Local::now()
                .format("%H:%M:%S%.3f")
                .to_string(),
            message,
            variant,
        };
        self.entries_mut().push(entry);
    }

    /// Append an [`LogVariant::Info`] entry.
    pub fn info(&self, message: impl Into<String>) {
        self.append(message, LogVariant::Info);
    }

    /// Append an [`LogVariant::Error`] entry.
    pub fn error(&self, message: impl Into<String>) {
        self.append(message, LogVariant::Error);
    }

    /// Append a [`LogVariant::Success`] entry.
    pub fn success(&self, message: impl Into<String>) {
        self.append(message, LogVariant::Success);
    }

    /// Append a [`LogVariant::Trace`] entry.
    pub fn trace(&self, message: impl Into<String>) {
        self.append(message, LogVariant::Trace);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries_mut().clear();
    }

    /// Snapshot of the trail in emission order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries_mut().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries_mut().len()
    }

    /// Whether the trail is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries of one variant.
    pub fn count(&self, variant: LogVariant) -> usize {
        self.entries_mut()
            .iter()
            .filter(|e| e.variant == variant)
            .count()
    }

    // A panic while holding the lock cannot leave a half-written entry, so a
    // poisoned mutex is still safe to use.
    fn entries_mut(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
