//! Connect sequence.

use tokio::time::sleep;

use crate::error::{ConnectError, SelectError};
use crate::loader::{Loader, LoaderFactory, LoaderOptions, LoaderTerminal};
use crate::manager::{ConnectionState, DeviceInfo, DeviceManager, Session};
use crate::port::{PortProvider, SerialHandle};

impl<P, F> DeviceManager<P, F>
where
    P: PortProvider,
    F: LoaderFactory<Port = P::Port>,
{
    /// Acquire a device and handshake with its bootloader.
    ///
    /// Reclaims every port the provider handed out before, asks for a device
    /// (vendor-filtered first, unfiltered if nothing matched), reclaims it,
    /// handshakes at `preferred_baud` (or the configured default) and queries
    /// the board. Stub upload and inventory queries may fail without failing
    /// the connect. Any other failure tears everything down to `idle`.
    ///
    /// Rejected with [`ConnectError::Busy`] while another connect or a flash
    /// is running. An existing session is torn down first.
    pub async fn connect(&self, preferred_baud: Option<u32>) -> Result<DeviceInfo, ConnectError> {
        if !self.provider.is_supported() {
            let err = ConnectError::Unsupported;
            self.sink.error(err.to_string());
            self.set_last_error(err.to_string());
            return Err(err);
        }
        let baud = preferred_baud.unwrap_or(self.config.default_baud);

        let (generation, previous) = {
            let mut inner = self.lock();
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Flashing
            ) {
                let state = inner.state;
                drop(inner);
                self.sink.trace(format!("Connect ignored while {state}"));
                return Err(ConnectError::Busy(state));
            }
            inner.generation += 1;
            inner.last_error = None;
            inner.progress = 0;
            inner.device_info = None;
            let previous = inner.session.take();
            self.set_state(&mut inner, ConnectionState::Connecting);
            (inner.generation, previous)
        };

        self.sink.info("==== NEW CONNECTION ATTEMPT ====");
        self.startup_check().await;
        self.sink.info("Requesting serial port access…");

        if let Some(previous) = previous {
            self.sink.trace("Cleaning up previous session…");
            self.release_loader(previous.loader, "previous session").await;
            sleep(self.config.supersede_delay).await;
        }

        let mut loader = match self.acquire(generation, baud).await {
            Ok(loader) => loader,
            Err(err) => return Err(self.fail_connect(generation, err)),
        };

        match self.inventory(generation, &mut loader).await {
            Ok(info) => {
                self.sink.success(format!("Connected to {}", info.chip_display()));
                let mut inner = self.lock();
                inner.session = Some(Session {
                    loader,
                    generation,
                    baud,
                });
                inner.device_info = Some(info.clone());
                self.set_state(&mut inner, ConnectionState::Connected);
                Ok(info)
            },
            Err(err) => {
                self.release_loader(loader, "failed attempt").await;
                Err(self.fail_connect(generation, err))
            },
        }
    }

    /// Census of known ports, logged before anything is touched.
    async fn startup_check(&self) {
        match self.provider.known_ports().await {
            Ok(ports) => {
                self.sink.info(format!(
                    "[STARTUP CHECK] Provider has {} port(s) in memory",
                    ports.len()
                ));
                for (idx, port) in ports.iter().enumerate() {
                    self.sink.info(format!(
                        "[STARTUP CHECK] Port {idx}: {} | {}",
                        port.describe(),
                        port.stream_state()
                    ));
                }
            },
            Err(e) => self.sink.trace(format!("[STARTUP CHECK] Failed: {e}")),
        }
    }

    /// Reclaim, select and attach. Owns the port until the loader does.
    async fn acquire(&self, generation: u64, baud: u32) -> Result<F::Loader, ConnectError> {
        self.reclaim_known_ports().await;
        self.ensure_current(generation)?;

        let mut port = self.select_port().await?;
        self.sink.trace(format!("User selected: {}", port.describe()));
        self.sink.trace(format!(
            "Immediately after selection state: {}",
            port.stream_state()
        ));

        if let Err(e) = self
            .reclaimer
            .reclaim(&mut port, "selected", &self.sink)
            .await
        {
            self.sink.error(format!(
                "Failed to close port before connecting. This may indicate an OS lock issue. Error: {e}"
            ));
        }

        if let Err(err) = self.ensure_current(generation) {
            if let Err(e) = self
                .reclaimer
                .reclaim(&mut port, "abandoned", &self.sink)
                .await
            {
                self.sink
                    .trace(format!("Failed to release abandoned port: {e}"));
            }
            return Err(err);
        }

        let options = LoaderOptions {
            baud,
            rom_baud: self.config.rom_baud,
            terminal: LoaderTerminal::new(self.sink.clone()),
        };
        self.sink.trace(format!(
            "Loader created for {}. Starting bootloader handshake ({} baud ROM, {baud} baud flashing)…",
            port.describe(),
            options.rom_baud
        ));
        Ok(self.factory.attach(port, options))
    }

    async fn reclaim_known_ports(&self) {
        self.sink.trace("Checking for previously opened ports…");
        let mut ports = match self.provider.known_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                self.sink.trace(format!("Unable to enumerate existing ports: {e}"));
                return;
            },
        };
        self.sink.trace(format!("Provider reported {} known port(s).", ports.len()));

        for port in &mut ports {
            self.sink.trace(format!("Inspecting known port {}…", port.describe()));
            if let Err(e) = self
                .reclaimer
                .reclaim(port, "previous", &self.sink)
                .await
            {
                self.sink.error(format!(
                    "Failed to close previous port {}: {e}. Will try to continue anyway.",
                    port.describe()
                ));
            }
        }
    }

    async fn select_port(&self) -> Result<P::Port, ConnectError> {
        let filters = &self.config.filters;
        self.sink.trace(format!(
            "Opening port selection with {} USB filter(s)…",
            filters.len()
        ));

        let selected = match self.provider.request_port(filters).await {
            Err(SelectError::NoCompatibleDevice) if !filters.is_empty() => {
                self.sink.trace(
                    "No devices matched the known USB IDs. Showing all serial ports as a fallback…",
                );
                self.provider.request_port(&[]).await
            },
            other => other,
        };

        selected.map_err(|e| match e {
            SelectError::Cancelled => {
                self.sink
                    .trace("Port selection was closed without choosing a device.");
                ConnectError::SelectionCancelled
            },
            other => ConnectError::Selection(other),
        })
    }

    /// Handshake, optional stub and inventory queries.
    async fn inventory(
        &self,
        generation: u64,
        loader: &mut F::Loader,
    ) -> Result<DeviceInfo, ConnectError> {
        let handshake = loader.handshake().await;
        self.ensure_current(generation)?;
        handshake.map_err(ConnectError::Handshake)?;
        self.sink.success("Bootloader handshake successful");

        match loader.run_stub().await {
            Ok(()) => self.sink.success("Flasher stub uploaded"),
            Err(e) => self.sink.trace(format!("Stub load skipped: {e}")),
        }
        self.ensure_current(generation)?;

        let chip = loader.chip_name();

        let flash_id = match loader.read_flash_id().await {
            Ok(id) => Some(format!("0x{id:06x}")),
            Err(e) => {
                self.sink.error(format!("Unable to read flash ID: {e}"));
                None
            },
        };
        self.ensure_current(generation)?;

        let flash_size_bytes = match loader.flash_size().await {
            Ok(size) => Some(size),
            Err(e) => {
                self.sink.trace(format!("Unable to determine flash size: {e}"));
                None
            },
        };
        self.ensure_current(generation)?;

        Ok(DeviceInfo {
            chip,
            flash_id,
            flash_size_bytes,
            port_info: Some(loader.port().info()),
        })
    }

    fn ensure_current(&self, generation: u64) -> Result<(), ConnectError> {
        if self.is_current(generation) {
            Ok(())
        } else {
            Err(ConnectError::Superseded)
        }
    }

    /// Log, surface and tear down. A superseded attempt leaves state alone.
    fn fail_connect(&self, generation: u64, err: ConnectError) -> ConnectError {
        if matches!(err, ConnectError::Superseded) {
            self.sink.trace(format!(
                "Connection attempt {generation} was superseded; discarding its result"
            ));
            return err;
        }

        let message = format!("Connection error: {err}");
        if matches!(err, ConnectError::SelectionCancelled) {
            self.sink.info(message);
        } else {
            self.sink.error(message);
        }

        let mut inner = self.lock();
        if inner.generation == generation {
            inner.last_error = Some(err.to_string());
            inner.session = None;
            inner.device_info = None;
            self.set_state(&mut inner, ConnectionState::Idle);
        }
        err
    }
}
