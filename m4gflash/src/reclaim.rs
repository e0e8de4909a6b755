//! Forcibly return a transport handle to a closed, lock-free state.
//!
//! A previous session that crashed or was abandoned can leave a reader or
//! writer holding a stream lock, which makes the port impossible to close
//! and therefore impossible to reopen. [`Reclaimer::reclaim`] breaks those
//! locks and closes the port, logging every step to the trail.
//!
//! Failures are reported but never stop the sequence: the caller decides
//! whether to carry on, and a port that really stays busy fails later with
//! a clearer open or handshake error.

use std::time::Duration;

use log::debug;
use tokio::time::sleep;

use crate::config::EngineConfig;
use crate::error::{PortError, ReclaimError};
use crate::port::{SerialHandle, StreamKind};
use crate::trail::LogSink;

/// Lock-breaking close sequence with settle delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reclaimer {
    settle: Duration,
    close_settle: Duration,
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Reclaimer {
    /// Create a reclaimer with explicit delays.
    pub fn new(settle: Duration, close_settle: Duration) -> Self {
        Self {
            settle,
            close_settle,
        }
    }

    /// Take the delays from an engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.settle_delay, config.close_settle_delay)
    }

    /// Release leftover locks on `handle` and close it if it is open.
    ///
    /// Idempotent: a closed handle is left untouched. Every step is attempted
    /// even after a failure; the first failure is returned.
    pub async fn reclaim<H: SerialHandle>(
        &self,
        handle: &mut H,
        context: &str,
        sink: &LogSink,
    ) -> Result<(), ReclaimError> {
        if !handle
            .stream_state()
            .is_open()
        {
            sink.trace(format!("{context}: port not open, skipping close"));
            return Ok(());
        }

        sink.trace(format!(
            "{context}: closing serial session for {}…",
            handle.describe()
        ));
        sink.trace(format!(
            "{context} - before lock release state: {}",
            handle.stream_state()
        ));

        let mut first_error = None;

        if handle
            .stream_state()
            .readable_locked()
        {
            sink.trace(format!("{context}: releasing readable lock…"));
            match release_reader(handle).await {
                Ok(()) => {
                    sink.trace(format!("{context}: readable lock released"));
                    sleep(self.settle).await;
                },
                Err(source) => {
                    sink.error(format!(
                        "{context}: failed to release readable lock: {source}"
                    ));
                    first_error.get_or_insert(ReclaimError::LockRelease {
                        stream: StreamKind::Readable,
                        source,
                    });
                },
            }
        }

        if handle
            .stream_state()
            .writable_locked()
        {
            sink.trace(format!("{context}: releasing writable lock…"));
            match release_writer(handle).await {
                Ok(()) => {
                    sink.trace(format!("{context}: writable lock released"));
                    sleep(self.settle).await;
                },
                Err(source) => {
                    sink.error(format!(
                        "{context}: failed to release writable lock: {source}"
                    ));
                    first_error.get_or_insert(ReclaimError::LockRelease {
                        stream: StreamKind::Writable,
                        source,
                    });
                },
            }
        }

        sink.trace(format!(
            "{context} - after lock release state: {}",
            handle.stream_state()
        ));

        if handle
            .stream_state()
            .is_open()
        {
            match handle.close().await {
                Ok(()) => {
                    sink.trace(format!("{context}: port closed successfully"));
                    sleep(self.close_settle).await;
                },
                Err(source) => {
                    sink.error(format!("{context}: close failed - {source}"));
                    first_error.get_or_insert(ReclaimError::Close(source));
                },
            }
        }

        debug!("Reclaim of {} finished: {}", handle.describe(), handle.stream_state());
        first_error.map_or(Ok(()), Err)
    }
}

async fn release_reader<H: SerialHandle>(handle: &mut H) -> Result<(), PortError> {
    handle.cancel_reader().await?;
    handle.release_reader()
}

async fn release_writer<H: SerialHandle>(handle: &mut H) -> Result<(), PortError> {
    match handle.close_writer().await {
        // A writer that is already closing still has to give up its lock.
        Ok(()) | Err(PortError::WriterClosing) => {},
        Err(e) => return Err(e),
    }
    handle.release_writer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::StreamState;
    use crate::test_helpers::FakePort;
    use crate::trail::LogVariant;

    fn reclaimer() -> Reclaimer {
        Reclaimer::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_handle_twice_is_a_noop() {
        let sink = LogSink::new();
        let mut port = FakePort::new("/dev/ttyACM0");

        reclaimer()
            .reclaim(&mut port, "previous", &sink)
            .await
            .unwrap();
        reclaimer()
            .reclaim(&mut port, "previous", &sink)
            .await
            .unwrap();

        assert_eq!(port.state(), StreamState::CLOSED);
        assert_eq!(port.script().closes, 0);
        assert_eq!(sink.count(LogVariant::Error), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_streams_are_released_then_closed() {
        let sink = LogSink::new();
        let mut port = FakePort::new("/dev/ttyACM0").with_state(StreamState {
            readable: Some(true),
            writable: Some(true),
        });

        reclaimer()
            .reclaim(&mut port, "selected", &sink)
            .await
            .unwrap();

        let script = port.script();
        assert_eq!(script.state, StreamState::CLOSED);
        assert_eq!(script.reader_cancels, 1);
        assert_eq!(script.writer_closes, 1);
        assert_eq!(script.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_already_closing_is_tolerated() {
        let sink = LogSink::new();
        let mut port = FakePort::new("/dev/ttyUSB0").with_state(StreamState {
            readable: Some(false),
            writable: Some(true),
        });
        port.script().writer_closing = true;

        reclaimer()
            .reclaim(&mut port, "selected", &sink)
            .await
            .unwrap();

        assert_eq!(port.state(), StreamState::CLOSED);
        assert_eq!(sink.count(LogVariant::Error), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_logged_and_sequence_continues() {
        let sink = LogSink::new();
        let mut port = FakePort::new("/dev/ttyUSB0").with_state(StreamState {
            readable: Some(true),
            writable: Some(false),
        });
        port.script().fail_cancel_reader = true;

        let err = reclaimer()
            .reclaim(&mut port, "previous", &sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReclaimError::LockRelease {
                stream: StreamKind::Readable,
                ..
            }
        ));
        // The close was still attempted and refused because the lock is held.
        assert_eq!(port.script().close_attempts, 1);
        assert_eq!(sink.count(LogVariant::Error), 2);
        assert!(port.state().readable_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delays_elapse() {
        let sink = LogSink::new();
        let mut port = FakePort::new("/dev/ttyUSB0").with_state(StreamState {
            readable: Some(true),
            writable: Some(false),
        });

        let start = tokio::time::Instant::now();
        reclaimer()
            .reclaim(&mut port, "selected", &sink)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }
}
