//! Connection-and-flash state machine.
//!
//! [`DeviceManager`] owns the single device session and the state it is in:
//!
//! ```text
//!            connect()                 handshake ok
//!   idle ───────────────► connecting ───────────────► connected ◄──┐
//!    ▲                        │                          │        │ success or
//!    │      fatal error       │                  flash() │        │ write/fetch
//!    └────────────────────────┘                          ▼        │ failure
//!    ▲                                                flashing ───┘
//!    │                 disconnect() from any state       │
//!    └───────────────────────────────────────────────────┘
//! ```
//!
//! Every connect and disconnect bumps a generation counter. Work that was
//! started under an older generation keeps running to its next suspension
//! point, then notices it was superseded, releases whatever it holds and
//! reports [`ConnectError::Superseded`](crate::error::ConnectError::Superseded) /
//! [`FlashError::Superseded`](crate::error::FlashError::Superseded)
//! without touching the state.
//!
//! All methods take `&self`. The manager expects a single-threaded executor
//! (the CLI uses tokio's `current_thread` flavour): operations interleave only
//! at `.await` points and the internal lock is never held across one.

mod connect;
mod flash;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::loader::{Loader, LoaderFactory};
use crate::port::{PortInfo, PortProvider};
use crate::reclaim::Reclaimer;
use crate::trail::LogSink;

pub use flash::{FlashSummary, FlashedFile, ResetOutcome};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session.
    #[default]
    Idle,
    /// A connect attempt owns the state machine.
    Connecting,
    /// A session is ready for flashing.
    Connected,
    /// A flash owns the session.
    Flashing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Flashing => write!(f, "flashing"),
        }
    }
}

/// What the last successful connect learned about the board.
///
/// Any field may be missing: inventory queries are allowed to fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Chip name reported by the bootloader.
    pub chip: Option<String>,
    /// Flash JEDEC id, hex formatted.
    pub flash_id: Option<String>,
    /// Flash size in bytes.
    pub flash_size_bytes: Option<u64>,
    /// Transport details.
    pub port_info: Option<PortInfo>,
}

impl DeviceInfo {
    /// Chip name, `Unknown` when it was not reported.
    pub fn chip_display(&self) -> &str {
        self.chip
            .as_deref()
            .unwrap_or("Unknown")
    }

    /// Flash size as `x.y MB`, or `Unknown`.
    #[allow(clippy::cast_precision_loss)]
    pub fn flash_size_display(&self) -> String {
        match self.flash_size_bytes {
            Some(bytes) if bytes > 0 => format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0)),
            _ => "Unknown".to_string(),
        }
    }
}

/// State-change callback: `(from, to)`.
pub type StateObserver = Box<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// The live pairing of a handshaken loader and its transport.
struct Session<L> {
    loader: L,
    generation: u64,
    baud: u32,
}

struct Inner<L> {
    state: ConnectionState,
    generation: u64,
    session: Option<Session<L>>,
    device_info: Option<DeviceInfo>,
    progress: u8,
    last_error: Option<String>,
}

impl<L> Default for Inner<L> {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
            session: None,
            device_info: None,
            progress: 0,
            last_error: None,
        }
    }
}

/// Orchestrates connect, flash and disconnect for one device.
pub struct DeviceManager<P, F>
where
    F: LoaderFactory,
{
    provider: P,
    factory: F,
    config: EngineConfig,
    reclaimer: Reclaimer,
    sink: LogSink,
    observer: Option<StateObserver>,
    inner: Mutex<Inner<F::Loader>>,
}

impl<P, F> DeviceManager<P, F>
where
    P: PortProvider,
    F: LoaderFactory<Port = P::Port>,
{
    /// Create an idle manager.
    pub fn new(provider: P, factory: F, sink: LogSink) -> Self {
        let config = EngineConfig::default();
        Self {
            provider,
            factory,
            reclaimer: Reclaimer::from_config(&config),
            config,
            sink,
            observer: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Replace the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.reclaimer = Reclaimer::from_config(&config);
        self.config = config;
        self
    }

    /// Observe every state change. The callback runs under the manager's
    /// lock and must not call back into the manager.
    #[must_use]
    pub fn with_state_observer(
        mut self,
        observer: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Whether a session is ready or flashing.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Flashing
        )
    }

    /// Device details from the last successful connect.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.lock()
            .device_info
            .clone()
    }

    /// Last reported flash percentage.
    pub fn progress(&self) -> u8 {
        self.lock().progress
    }

    /// Latest user-facing error message.
    pub fn last_error(&self) -> Option<String> {
        self.lock()
            .last_error
            .clone()
    }

    /// Current generation tag.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Baud rate of the current session.
    pub fn session_baud(&self) -> Option<u32> {
        self.lock()
            .session
            .as_ref()
            .map(|s| s.baud)
    }

    /// The shared trail.
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Port provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Loader factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Tear down the session, whatever state the manager is in.
    ///
    /// Pending connects and flashes are not interrupted; they notice the
    /// new generation at their next suspension point and discard their
    /// results. Release failures are logged and swallowed.
    pub async fn disconnect(&self) {
        self.sink.info("Disconnecting from device…");
        let (session, previous) = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.device_info = None;
            let session = inner.session.take();
            let previous = inner.state;
            self.set_state(&mut inner, ConnectionState::Idle);
            (session, previous)
        };

        match (session, previous) {
            (Some(session), _) => {
                debug!("Releasing session of generation {}", session.generation);
                self.release_loader(session.loader, "disconnect").await;
                self.sink.success("Serial port released");
            },
            (None, ConnectionState::Connecting) => self
                .sink
                .trace("Port release deferred to the pending connect attempt"),
            (None, ConnectionState::Flashing) => self
                .sink
                .trace("Port release deferred to the running flash"),
            (None, _) => self.sink.trace("No open session to release"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<F::Loader>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner<F::Loader>, next: ConnectionState) {
        let previous = inner.state;
        if previous == next {
            return;
        }
        inner.state = next;
        debug!("Connection state {previous} -> {next}");
        if let Some(observer) = &self.observer {
            observer(previous, next);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn set_last_error(&self, message: String) {
        self.lock().last_error = Some(message);
    }

    /// Return the loader's port to a closed state. Never fails.
    async fn release_loader(&self, loader: F::Loader, context: &str) {
        let mut port = loader.into_port();
        if let Err(e) = self
            .reclaimer
            .reclaim(&mut port, context, &self.sink)
            .await
        {
            self.sink.trace(format!(
                "Warning: failed to release {context} transport: {e}"
            ));
        }
    }
}
