//! Scriptable fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{FetchError, PortError, ProtocolError, SelectError};
use crate::firmware::{FlashConfiguration, Fetcher};
use crate::loader::{Loader, LoaderFactory, LoaderOptions, WriteProgress};
use crate::manager::DeviceManager;
use crate::port::{PortInfo, PortProvider, SerialHandle, StreamKind, StreamState, UsbFilter};
use crate::trail::LogSink;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Observable and scriptable state of a [`FakePort`].
#[derive(Debug, Default)]
pub struct PortScript {
    pub state: StreamState,
    pub fail_open: bool,
    pub fail_cancel_reader: bool,
    pub writer_closing: bool,
    pub fail_close: bool,
    pub opened_at: Vec<u32>,
    pub reader_cancels: usize,
    pub writer_closes: usize,
    pub close_attempts: usize,
    pub closes: usize,
}

/// In-memory handle. Clones share state.
#[derive(Debug, Clone)]
pub struct FakePort {
    info: PortInfo,
    script: Arc<Mutex<PortScript>>,
}

impl FakePort {
    pub fn new(name: &str) -> Self {
        Self {
            info: PortInfo {
                name: name.to_string(),
                vid: Some(0x303a),
                pid: Some(0x1001),
                ..PortInfo::default()
            },
            script: Arc::new(Mutex::new(PortScript {
                state: StreamState::CLOSED,
                ..PortScript::default()
            })),
        }
    }

    pub fn with_vid(mut self, vid: Option<u16>) -> Self {
        self.info.vid = vid;
        self
    }

    pub fn with_state(self, state: StreamState) -> Self {
        self.script().state = state;
        self
    }

    pub fn state(&self) -> StreamState {
        self.script().state
    }

    pub fn script(&self) -> MutexGuard<'_, PortScript> {
        guard(&self.script)
    }
}

fn io_failure(what: &str) -> PortError {
    PortError::Io(io::Error::other(format!("{what} failed")))
}

impl SerialHandle for FakePort {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    fn stream_state(&self) -> StreamState {
        self.state()
    }

    async fn open(&mut self, baud_rate: u32) -> Result<(), PortError> {
        let mut script = self.script();
        if script.state.is_open() {
            return Err(PortError::AlreadyOpen);
        }
        if script.fail_open {
            return Err(io_failure("open"));
        }
        script.opened_at.push(baud_rate);
        script.state = StreamState::OPEN;
        Ok(())
    }

    async fn cancel_reader(&mut self) -> Result<(), PortError> {
        let mut script = self.script();
        script.reader_cancels += 1;
        if script.fail_cancel_reader {
            return Err(io_failure("cancel"));
        }
        Ok(())
    }

    fn release_reader(&mut self) -> Result<(), PortError> {
        let mut script = self.script();
        if script.state.readable.is_none() {
            return Err(PortError::NoStream(StreamKind::Readable));
        }
        script.state.readable = Some(false);
        Ok(())
    }

    async fn close_writer(&mut self) -> Result<(), PortError> {
        let mut script = self.script();
        script.writer_closes += 1;
        if script.writer_closing {
            return Err(PortError::WriterClosing);
        }
        Ok(())
    }

    fn release_writer(&mut self) -> Result<(), PortError> {
        let mut script = self.script();
        if script.state.writable.is_none() {
            return Err(PortError::NoStream(StreamKind::Writable));
        }
        script.state.writable = Some(false);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PortError> {
        let mut script = self.script();
        script.close_attempts += 1;
        if script.fail_close {
            return Err(io_failure("close"));
        }
        if script.state.readable_locked() {
            return Err(PortError::Locked(StreamKind::Readable));
        }
        if script.state.writable_locked() {
            return Err(PortError::Locked(StreamKind::Writable));
        }
        if !script.state.is_open() {
            return Err(PortError::NotOpen);
        }
        script.state = StreamState::CLOSED;
        script.closes += 1;
        Ok(())
    }
}

/// Provider answering `request_port` from a queue.
#[derive(Debug)]
pub struct FakeProvider {
    supported: bool,
    responses: Mutex<VecDeque<Result<FakePort, SelectError>>>,
    known: Mutex<Vec<FakePort>>,
    requests: Mutex<Vec<Vec<UsbFilter>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            supported: true,
            responses: Mutex::new(VecDeque::new()),
            known: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn with_response(self, response: Result<FakePort, SelectError>) -> Self {
        self.push_response(response);
        self
    }

    pub fn with_known(self, port: FakePort) -> Self {
        guard(&self.known).push(port);
        self
    }

    pub fn push_response(&self, response: Result<FakePort, SelectError>) {
        guard(&self.responses).push_back(response);
    }

    pub fn requests(&self) -> Vec<Vec<UsbFilter>> {
        guard(&self.requests).clone()
    }
}

impl PortProvider for FakeProvider {
    type Port = FakePort;

    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn known_ports(&self) -> Result<Vec<FakePort>, PortError> {
        Ok(guard(&self.known).clone())
    }

    async fn request_port(&self, filters: &[UsbFilter]) -> Result<FakePort, SelectError> {
        guard(&self.requests).push(filters.to_vec());
        let response = guard(&self.responses)
            .pop_front()
            .unwrap_or(Err(SelectError::Cancelled));
        if let Ok(port) = &response {
            guard(&self.known).push(port.clone());
        }
        response
    }
}

/// Behaviour of every loader a [`FakeFactory`] attaches.
#[derive(Debug)]
pub struct LoaderScript {
    pub chip: Option<String>,
    pub fail_handshake: bool,
    pub fail_stub: bool,
    pub flash_id: Option<u32>,
    pub flash_size: Option<u64>,
    pub handshake_gate: Option<Arc<Notify>>,
    pub handshakes: usize,
    pub attached: Vec<u32>,
    pub fail_write: bool,
    pub progress_steps: Vec<(usize, usize, usize)>,
    pub write_gate: Option<Arc<Notify>>,
    pub writes: Vec<FlashConfiguration>,
    pub compressed: bool,
    pub hard_reset: bool,
    pub fail_reset: bool,
    pub resets: Vec<&'static str>,
}

impl Default for LoaderScript {
    fn default() -> Self {
        Self {
            chip: Some("ESP32-S3".to_string()),
            fail_handshake: false,
            fail_stub: false,
            flash_id: Some(0x0016_405E),
            flash_size: Some(8 * 1024 * 1024),
            handshake_gate: None,
            handshakes: 0,
            attached: Vec::new(),
            fail_write: false,
            progress_steps: Vec::new(),
            write_gate: None,
            writes: Vec::new(),
            compressed: false,
            hard_reset: true,
            fail_reset: false,
            resets: Vec::new(),
        }
    }
}

/// Factory of [`FakeLoader`]s. Clones share the script.
#[derive(Debug, Clone, Default)]
pub struct FakeFactory {
    script: Arc<Mutex<LoaderScript>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> MutexGuard<'_, LoaderScript> {
        guard(&self.script)
    }
}

impl LoaderFactory for FakeFactory {
    type Port = FakePort;
    type Loader = FakeLoader;

    fn attach(&self, port: FakePort, options: LoaderOptions) -> FakeLoader {
        self.script().attached.push(options.baud);
        FakeLoader {
            port,
            options,
            script: Arc::clone(&self.script),
        }
    }
}

#[derive(Debug)]
pub struct FakeLoader {
    port: FakePort,
    options: LoaderOptions,
    script: Arc<Mutex<LoaderScript>>,
}

impl FakeLoader {
    fn script(&self) -> MutexGuard<'_, LoaderScript> {
        guard(&self.script)
    }
}

impl Loader for FakeLoader {
    type Port = FakePort;

    fn port(&self) -> &FakePort {
        &self.port
    }

    fn port_mut(&mut self) -> &mut FakePort {
        &mut self.port
    }

    fn into_port(self) -> FakePort {
        self.port
    }

    async fn handshake(&mut self) -> Result<(), ProtocolError> {
        self.port.open(self.options.rom_baud).await?;
        let gate = {
            let mut script = self.script();
            script.handshakes += 1;
            script.handshake_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.script().fail_handshake {
            return Err(ProtocolError::Handshake("no sync reply".to_string()));
        }
        self.port.script().state.readable = Some(true);
        self.options
            .terminal
            .write_line(&format!("Changing baud rate to {}", self.options.baud));
        Ok(())
    }

    async fn run_stub(&mut self) -> Result<(), ProtocolError> {
        if self.script().fail_stub {
            return Err(ProtocolError::Timeout("stub did not answer".to_string()));
        }
        Ok(())
    }

    fn chip_name(&self) -> Option<String> {
        self.script().chip.clone()
    }

    async fn read_flash_id(&mut self) -> Result<u32, ProtocolError> {
        self.script()
            .flash_id
            .ok_or_else(|| ProtocolError::Protocol("flash id read returned nothing".to_string()))
    }

    async fn flash_size(&mut self) -> Result<u64, ProtocolError> {
        self.script()
            .flash_size
            .ok_or_else(|| ProtocolError::Protocol("unknown flash size".to_string()))
    }

    async fn write_flash(
        &mut self,
        config: &FlashConfiguration,
        compress: bool,
        progress: WriteProgress<'_>,
    ) -> Result<(), ProtocolError> {
        let gate = {
            let mut script = self.script();
            script.writes.push(config.clone());
            script.compressed = compress;
            script.write_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let (steps, fail) = {
            let script = self.script();
            (script.progress_steps.clone(), script.fail_write)
        };
        for (file, written, total) in steps {
            progress(file, written, total);
        }
        if fail {
            return Err(ProtocolError::Protocol("flash write rejected".to_string()));
        }
        Ok(())
    }

    fn has_hard_reset(&self) -> bool {
        self.script().hard_reset
    }

    async fn hard_reset(&mut self) -> Result<(), ProtocolError> {
        self.reset("hard")
    }

    async fn soft_reset(&mut self) -> Result<(), ProtocolError> {
        self.reset("soft")
    }
}

impl FakeLoader {
    fn reset(&self, kind: &'static str) -> Result<(), ProtocolError> {
        let mut script = self.script();
        if script.fail_reset {
            return Err(ProtocolError::Timeout(format!("{kind} reset")));
        }
        script.resets.push(kind);
        Ok(())
    }
}

/// In-memory fetcher. Unknown paths answer HTTP 404.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    files: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), data);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        guard(&self.requests).clone()
    }
}

impl Fetcher for FakeFetcher {
    fn location(&self, path: &str) -> String {
        format!("fake://{path}")
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        guard(&self.requests).push(path.to_string());
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                location: self.location(path),
                status: 404,
            })
    }
}

pub type FakeManager = DeviceManager<FakeProvider, FakeFactory>;

pub fn manager(provider: FakeProvider, factory: FakeFactory) -> FakeManager {
    let _ = env_logger::builder().is_test(true).try_init();
    DeviceManager::new(provider, factory, LogSink::new())
}

/// A manager already connected to `port`.
pub async fn connected_manager(port: FakePort) -> (FakeManager, FakeFactory) {
    let factory = FakeFactory::new();
    let manager = manager(FakeProvider::new().with_response(Ok(port)), factory.clone());
    manager.connect(None).await.unwrap();
    (manager, factory)
}

/// Poll `condition` on the paused clock until it holds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}
