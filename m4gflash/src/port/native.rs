//! Native serial port implementation using the `serialport` crate.
//!
//! `serialport` has no notion of stream locks, so [`NativePort`] layers
//! them on top: [`NativePort::reader`] and [`NativePort::writer`] hand out
//! leases on cloned OS handles. A lease stays valid until it is dropped or
//! revoked by [`SerialHandle::cancel_reader`] / [`SerialHandle::close_writer`];
//! after revocation every read/write through the stale lease fails with
//! [`std::io::ErrorKind::Interrupted`].

use {
    crate::{
        device::{self, DetectedPort},
        error::{PortError, SelectError},
        port::{PortInfo, PortProvider, SerialHandle, StreamKind, StreamState, UsbFilter, passes_filters},
    },
    log::{debug, trace},
    std::{
        io::{self, Read, Write},
        sync::{
            Arc, Mutex, MutexGuard, PoisonError,
            atomic::{AtomicU32, AtomicU64, Ordering},
        },
        time::Duration,
    },
};

const FREE: u64 = 0;
const REVOKED: u64 = u64::MAX;

/// Default read/write timeout for opened ports.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Lock word for one stream: `FREE`, `REVOKED` or the holder's lease id.
#[derive(Debug, Default)]
struct StreamLock {
    holder: AtomicU64,
    next_lease: AtomicU64,
}

impl StreamLock {
    fn acquire(&self) -> Option<u64> {
        let lease = self
            .next_lease
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        self.holder
            .compare_exchange(FREE, lease, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| lease)
    }

    fn is_locked(&self) -> bool {
        self.holder.load(Ordering::Acquire) != FREE
    }

    fn is_revoked(&self) -> bool {
        self.holder.load(Ordering::Acquire) == REVOKED
    }

    fn is_held_by(&self, lease: u64) -> bool {
        self.holder.load(Ordering::Acquire) == lease
    }

    fn revoke(&self) {
        if self.is_locked() {
            self.holder.store(REVOKED, Ordering::Release);
        }
    }

    fn release(&self) {
        self.holder.store(FREE, Ordering::Release);
    }

    fn release_lease(&self, lease: u64) {
        let _ = self
            .holder
            .compare_exchange(lease, FREE, Ordering::AcqRel, Ordering::Acquire);
    }
}

fn revoked(stream: StreamKind) -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, format!("{stream} lock was revoked"))
}

/// Leased reader on a [`NativePort`]. Dropping it releases the lock.
pub struct PortReader {
    port: Box<dyn serialport::SerialPort>,
    lock: Arc<StreamLock>,
    lease: u64,
}

impl Read for PortReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.lock.is_held_by(self.lease) {
            return Err(revoked(StreamKind::Readable));
        }
        self.port.read(buf)
    }
}

impl Drop for PortReader {
    fn drop(&mut self) {
        self.lock.release_lease(self.lease);
    }
}

/// Leased writer on a [`NativePort`]. Dropping it releases the lock.
pub struct PortWriter {
    port: Box<dyn serialport::SerialPort>,
    lock: Arc<StreamLock>,
    lease: u64,
}

impl Write for PortWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.lock.is_held_by(self.lease) {
            return Err(revoked(StreamKind::Writable));
        }
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.lock.is_held_by(self.lease) {
            return Err(revoked(StreamKind::Writable));
        }
        self.port.flush()
    }
}

impl Drop for PortWriter {
    fn drop(&mut self) {
        self.lock.release_lease(self.lease);
    }
}

/// OS handle and lock words shared by every view of one device.
#[derive(Default)]
struct PortShared {
    os: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    baud_rate: AtomicU32,
    reader_lock: Arc<StreamLock>,
    writer_lock: Arc<StreamLock>,
}

impl PortShared {
    fn os(&self) -> MutexGuard<'_, Option<Box<dyn serialport::SerialPort>>> {
        self.os
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Native serial port implementation.
///
/// Handles handed out by [`NativePortProvider`] for the same device are views
/// of one shared state, so a lock taken through one is visible through all.
pub struct NativePort {
    info: PortInfo,
    timeout: Duration,
    shared: Arc<PortShared>,
}

impl std::fmt::Debug for NativePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePort")
            .field("info", &self.info)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl NativePort {
    /// Create a closed handle for the given device.
    pub fn new(info: PortInfo) -> Self {
        Self {
            info,
            timeout: DEFAULT_TIMEOUT,
            shared: Arc::default(),
        }
    }

    /// Another handle on the same device state.
    fn view(&self) -> Self {
        Self {
            info: self.info.clone(),
            timeout: self.timeout,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Set the read/write timeout used when the port is opened.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Baud rate the port was last opened or switched to.
    pub fn baud_rate(&self) -> u32 {
        self.shared.baud_rate.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        self.shared.os().is_some()
    }

    /// Switch the baud rate of an open port.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        let mut os = self.shared.os();
        let port = os.as_mut().ok_or(PortError::NotOpen)?;
        port.set_baud_rate(baud_rate)?;
        self.shared
            .baud_rate
            .store(baud_rate, Ordering::Release);
        Ok(())
    }

    /// Lock the readable stream.
    pub fn reader(&self) -> Result<PortReader, PortError> {
        let lock = &self.shared.reader_lock;
        let (port, lease) = self.lease(StreamKind::Readable, lock)?;
        Ok(PortReader {
            port,
            lock: Arc::clone(lock),
            lease,
        })
    }

    /// Lock the writable stream.
    pub fn writer(&self) -> Result<PortWriter, PortError> {
        let lock = &self.shared.writer_lock;
        let (port, lease) = self.lease(StreamKind::Writable, lock)?;
        Ok(PortWriter {
            port,
            lock: Arc::clone(lock),
            lease,
        })
    }

    fn lease(
        &self,
        stream: StreamKind,
        lock: &StreamLock,
    ) -> Result<(Box<dyn serialport::SerialPort>, u64), PortError> {
        let os = self.shared.os();
        let port = os
            .as_ref()
            .ok_or(PortError::NoStream(stream))?;
        let lease = lock
            .acquire()
            .ok_or(PortError::Locked(stream))?;
        match port.try_clone() {
            Ok(clone) => Ok((clone, lease)),
            Err(e) => {
                lock.release_lease(lease);
                Err(e.into())
            },
        }
    }
}

impl SerialHandle for NativePort {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    fn stream_state(&self) -> StreamState {
        if !self.is_open() {
            return StreamState::CLOSED;
        }
        StreamState {
            readable: Some(self.shared.reader_lock.is_locked()),
            writable: Some(self.shared.writer_lock.is_locked()),
        }
    }

    async fn open(&mut self, baud_rate: u32) -> Result<(), PortError> {
        let mut os = self.shared.os();
        if os.is_some() {
            return Err(PortError::AlreadyOpen);
        }
        debug!("Opening {} at {baud_rate} baud", self.info.name);
        let port = serialport::new(&self.info.name, baud_rate)
            .timeout(self.timeout)
            .open()?;
        *os = Some(port);
        self.shared
            .baud_rate
            .store(baud_rate, Ordering::Release);
        Ok(())
    }

    async fn cancel_reader(&mut self) -> Result<(), PortError> {
        if !self.is_open() {
            return Err(PortError::NoStream(StreamKind::Readable));
        }
        trace!("Revoking reader lease on {}", self.info.name);
        self.shared.reader_lock.revoke();
        Ok(())
    }

    fn release_reader(&mut self) -> Result<(), PortError> {
        self.shared.reader_lock.release();
        Ok(())
    }

    async fn close_writer(&mut self) -> Result<(), PortError> {
        let mut os = self.shared.os();
        let port = os
            .as_mut()
            .ok_or(PortError::NoStream(StreamKind::Writable))?;
        let lock = &self.shared.writer_lock;
        if lock.is_revoked() {
            return Err(PortError::WriterClosing);
        }
        trace!("Revoking writer lease on {}", self.info.name);
        lock.revoke();
        port.flush()?;
        Ok(())
    }

    fn release_writer(&mut self) -> Result<(), PortError> {
        self.shared.writer_lock.release();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PortError> {
        let mut os = self.shared.os();
        if os.is_none() {
            return Err(PortError::NotOpen);
        }
        if self.shared.reader_lock.is_locked() {
            return Err(PortError::Locked(StreamKind::Readable));
        }
        if self.shared.writer_lock.is_locked() {
            return Err(PortError::Locked(StreamKind::Writable));
        }
        // Dropping the handle closes the OS port.
        os.take();
        debug!("Closed {}", self.info.name);
        Ok(())
    }
}

/// Picks one port out of the filtered candidates; `None` cancels.
pub type PortChooser = Box<dyn Fn(&[DetectedPort]) -> Option<usize> + Send + Sync>;

/// Native provider backed by `serialport` enumeration.
///
/// Remembers every port it handed out so the next connect can reclaim them.
/// Known ports and later grants of the same device share its state.
pub struct NativePortProvider {
    port_name: Option<String>,
    timeout: Duration,
    chooser: PortChooser,
    granted: Mutex<Vec<NativePort>>,
}

impl Default for NativePortProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NativePortProvider {
    /// Provider that auto-selects the most likely board.
    pub fn new() -> Self {
        Self {
            port_name: None,
            timeout: DEFAULT_TIMEOUT,
            chooser: Box::new(device::best_candidate),
            granted: Mutex::new(Vec::new()),
        }
    }

    /// Always hand out this port, bypassing filters and the chooser.
    #[must_use]
    pub fn with_port_name(mut self, name: impl Into<String>) -> Self {
        self.port_name = Some(name.into());
        self
    }

    /// Replace the chooser (e.g. with an interactive prompt).
    #[must_use]
    pub fn with_chooser(
        mut self,
        chooser: impl Fn(&[DetectedPort]) -> Option<usize> + Send + Sync + 'static,
    ) -> Self {
        self.chooser = Box::new(chooser);
        self
    }

    /// Timeout applied to handed-out ports.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn grant(&self, info: PortInfo) -> NativePort {
        let mut granted = self
            .granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = granted.iter().find(|g| g.info.name == info.name) {
            return known.view().with_timeout(self.timeout);
        }
        let port = NativePort::new(info).with_timeout(self.timeout);
        granted.push(port.view());
        port
    }
}

impl PortProvider for NativePortProvider {
    type Port = NativePort;

    async fn known_ports(&self) -> Result<Vec<NativePort>, PortError> {
        let granted = self
            .granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(granted
            .iter()
            .map(NativePort::view)
            .collect())
    }

    async fn request_port(&self, filters: &[UsbFilter]) -> Result<NativePort, SelectError> {
        let detected = device::detect_ports();

        if let Some(name) = &self.port_name {
            let info = detected
                .iter()
                .find(|p| &p.name == name)
                .map_or_else(
                    || PortInfo {
                        name: name.clone(),
                        ..PortInfo::default()
                    },
                    PortInfo::from,
                );
            return Ok(self.grant(info));
        }

        let candidates: Vec<DetectedPort> = detected
            .into_iter()
            .filter(|p| passes_filters(filters, p.vid, p.pid))
            .collect();
        if candidates.is_empty() {
            return Err(SelectError::NoCompatibleDevice);
        }

        let port = (self.chooser)(&candidates)
            .and_then(|index| candidates.get(index))
            .ok_or(SelectError::Cancelled)?;
        Ok(self.grant(PortInfo::from(port)))
    }
}
