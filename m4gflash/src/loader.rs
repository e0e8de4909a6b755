//! Bootloader protocol capability.
//!
//! The wire protocol lives outside this crate. The engine only needs an
//! object that owns a transport handle, performs the handshake and answers
//! a few inventory queries, then writes a [`FlashConfiguration`] and resets
//! the board. Optional operations have default bodies returning
//! [`ProtocolError::Unsupported`], so a minimal loader implements only
//! the handshake, the write and the port accessors.

use crate::error::ProtocolError;
use crate::firmware::FlashConfiguration;
use crate::port::SerialHandle;
use crate::trail::LogSink;

/// Progress callback: `(file_index, written, total)` for the file being written.
pub type WriteProgress<'a> = &'a mut dyn FnMut(usize, usize, usize);

/// A bootloader session bound to one transport handle.
#[allow(async_fn_in_trait)]
pub trait Loader {
    /// Transport handle type.
    type Port: SerialHandle;

    /// Borrow the transport handle.
    fn port(&self) -> &Self::Port;

    /// Mutably borrow the transport handle.
    fn port_mut(&mut self) -> &mut Self::Port;

    /// Give the transport handle back.
    fn into_port(self) -> Self::Port;

    /// Open the link at the ROM baud, sync with the bootloader and switch to
    /// the flashing baud.
    async fn handshake(&mut self) -> Result<(), ProtocolError>;

    /// Upload the RAM flasher stub.
    async fn run_stub(&mut self) -> Result<(), ProtocolError> {
        Err(ProtocolError::Unsupported("stub upload"))
    }

    /// Chip name detected during the handshake.
    fn chip_name(&self) -> Option<String>;

    /// JEDEC id of the attached flash chip.
    async fn read_flash_id(&mut self) -> Result<u32, ProtocolError> {
        Err(ProtocolError::Unsupported("flash id query"))
    }

    /// Size of the attached flash chip in bytes.
    async fn flash_size(&mut self) -> Result<u64, ProtocolError> {
        Err(ProtocolError::Unsupported("flash size query"))
    }

    /// Write every file of `config`, compressing when `compress` is set.
    async fn write_flash(
        &mut self,
        config: &FlashConfiguration,
        compress: bool,
        progress: WriteProgress<'_>,
    ) -> Result<(), ProtocolError>;

    /// Whether [`hard_reset`](Loader::hard_reset) is available.
    fn has_hard_reset(&self) -> bool {
        false
    }

    /// Reset the chip through the control lines.
    async fn hard_reset(&mut self) -> Result<(), ProtocolError> {
        Err(ProtocolError::Unsupported("hard reset"))
    }

    /// Ask the running bootloader to jump to the application.
    async fn soft_reset(&mut self) -> Result<(), ProtocolError> {
        Err(ProtocolError::Unsupported("soft reset"))
    }
}

/// Options for a new loader.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Flashing baud rate.
    pub baud: u32,
    /// ROM bootloader baud rate.
    pub rom_baud: u32,
    /// Where the loader prints its own chatter.
    pub terminal: LoaderTerminal,
}

/// Creates loaders bound to a transport handle.
pub trait LoaderFactory {
    /// Transport handle type.
    type Port: SerialHandle;
    /// Loader type produced.
    type Loader: Loader<Port = Self::Port>;

    /// Bind a new loader to `port`. Must not perform I/O.
    fn attach(&self, port: Self::Port, options: LoaderOptions) -> Self::Loader;
}

/// Text output of a loader, forwarded to the trail as trace entries.
#[derive(Debug, Clone)]
pub struct LoaderTerminal {
    sink: LogSink,
}

impl LoaderTerminal {
    /// Forward into `sink`.
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }

    /// Print one line.
    pub fn write_line(&self, line: &str) {
        self.sink.trace(line);
    }

    /// Print a fragment; blank fragments are dropped.
    pub fn write(&self, text: &str) {
        let text = text.trim_end();
        if !text.is_empty() {
            self.sink.trace(text);
        }
    }

    /// Clear request. The trail is never cleared on a loader's behalf.
    pub fn clean(&self) {
        self.sink
            .trace("[loader called terminal.clean() - ignoring to preserve debug logs]");
    }
}
