//! Flash sequence.

use serde::Serialize;

use crate::error::{Error, FlashError};
use crate::firmware::{
    Fetcher, FirmwareResolver, FirmwareSelection, FlashConfiguration, FlashSource, resolve,
};
use crate::loader::{Loader, LoaderFactory};
use crate::manager::{ConnectionState, DeviceManager, Session};
use crate::port::PortProvider;

/// One file of a finished flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlashedFile {
    /// Position in the configuration.
    pub index: usize,
    /// Flash address.
    pub address: u32,
    /// Size in bytes.
    pub size: usize,
}

/// How the post-write reset went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetOutcome {
    /// Reset through the control lines.
    Hard,
    /// Reset through the bootloader.
    Soft,
    /// Reset failed; the board needs a manual reset.
    Failed(String),
}

/// Result of a successful flash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashSummary {
    /// Chip name from the connect inventory.
    pub chip: Option<String>,
    /// Files written, in order.
    pub files: Vec<FlashedFile>,
    /// Post-write reset.
    pub reset: ResetOutcome,
}

/// Per-file percentage, floored. An empty file counts as complete.
pub(crate) fn percent(written: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let value = written.saturating_mul(100) / total;
    u8::try_from(value.min(100)).unwrap_or(100)
}

impl<P, F> DeviceManager<P, F>
where
    P: PortProvider,
    F: LoaderFactory<Port = P::Port>,
{
    /// Resolve `selection` and flash it.
    ///
    /// A selection that is not flashable is rejected before any I/O and
    /// without a state change.
    pub async fn flash_selection<Fe: Fetcher>(
        &self,
        selection: &FirmwareSelection,
        resolver: &FirmwareResolver<Fe>,
        on_progress: impl FnMut(u8),
    ) -> Result<FlashSummary, Error> {
        self.ensure_ready()?;
        let source = match resolve(selection) {
            Ok(source) => source,
            Err(e) => {
                self.sink.error(format!("Flash failed: {e}"));
                self.set_last_error(e.to_string());
                return Err(e.into());
            },
        };
        Ok(self
            .flash(&source, resolver, on_progress)
            .await?)
    }

    /// Write `source` to the connected board.
    ///
    /// Requires state `connected`. The state is `flashing` for the duration
    /// and returns to `connected` whether the write succeeds or fails.
    /// `on_progress` receives 0 first, then the floored percentage of the
    /// file currently being written (not a total across files), then 100 on
    /// success.
    ///
    /// A disconnect during the write does not cancel it; once it returns,
    /// its result is logged and dropped and the port is released.
    pub async fn flash<Fe: Fetcher>(
        &self,
        source: &FlashSource,
        resolver: &FirmwareResolver<Fe>,
        mut on_progress: impl FnMut(u8),
    ) -> Result<FlashSummary, FlashError> {
        self.ensure_ready()?;

        let (generation, mut session, chip) = {
            let mut inner = self.lock();
            let Some(session) = inner.session.take() else {
                let state = inner.state;
                drop(inner);
                return Err(self.reject_flash(state));
            };
            inner.last_error = None;
            inner.progress = 0;
            self.set_state(&mut inner, ConnectionState::Flashing);
            let chip = inner
                .device_info
                .as_ref()
                .and_then(|d| d.chip.clone());
            (inner.generation, session, chip)
        };
        on_progress(0);
        self.sink.info("Preparing firmware payload…");

        let outcome = self
            .write(generation, &mut session, source, resolver, chip, &mut on_progress)
            .await;

        let mut inner = self.lock();
        if inner.generation != generation {
            drop(inner);
            match &outcome {
                Ok(_) => self
                    .sink
                    .trace("Flash finished after the session was torn down; discarding result"),
                Err(e) => self.sink.trace(format!(
                    "Flash failed after the session was torn down; discarding result: {e}"
                )),
            }
            self.release_loader(session.loader, "abandoned flash").await;
            return Err(FlashError::Superseded);
        }

        inner.session = Some(session);
        match outcome {
            Ok(summary) => {
                inner.progress = 100;
                self.set_state(&mut inner, ConnectionState::Connected);
                drop(inner);
                on_progress(100);
                Ok(summary)
            },
            Err(err) => {
                self.sink.error(format!("Flash failed: {err}"));
                inner.last_error = Some(err.to_string());
                self.set_state(&mut inner, ConnectionState::Connected);
                Err(err)
            },
        }
    }

    async fn write<Fe: Fetcher>(
        &self,
        generation: u64,
        session: &mut Session<F::Loader>,
        source: &FlashSource,
        resolver: &FirmwareResolver<Fe>,
        chip: Option<String>,
        on_progress: &mut impl FnMut(u8),
    ) -> Result<FlashSummary, FlashError> {
        let config = resolver
            .materialize(source, &self.sink)
            .await?;
        if !self.is_current(generation) {
            return Err(FlashError::Superseded);
        }

        self.sink.info("Writing firmware to flash…");
        let mut report = |_file: usize, written: usize, total: usize| {
            let value = percent(written, total);
            let mut inner = self.lock();
            if inner.generation == generation {
                inner.progress = value;
                drop(inner);
                on_progress(value);
            }
        };
        session
            .loader
            .write_flash(&config, true, &mut report)
            .await
            .map_err(FlashError::Write)?;
        if !self.is_current(generation) {
            return Err(FlashError::Superseded);
        }

        self.sink.success("Firmware written successfully");
        let files = self.log_summary(chip.as_deref(), &config);
        let reset = self.reset(&mut session.loader).await;
        Ok(FlashSummary { chip, files, reset })
    }

    fn log_summary(&self, chip: Option<&str>, config: &FlashConfiguration) -> Vec<FlashedFile> {
        self.sink.info("--- Flash Summary ---");
        self.sink.info(format!("Chip: {}", chip.unwrap_or("Unknown")));
        self.sink.info(format!("Files written: {}", config.files.len()));
        let files: Vec<FlashedFile> = config
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| FlashedFile {
                index,
                address: file.address,
                size: file.data.len(),
            })
            .collect();
        for file in &files {
            self.sink.info(format!(
                "  [{}] 0x{:X} ({} bytes)",
                file.index, file.address, file.size
            ));
        }
        self.sink.info("--------------------");
        files
    }

    /// Best effort: a failed reset is advisory and never fails the flash.
    async fn reset(&self, loader: &mut F::Loader) -> ResetOutcome {
        let (kind, result) = if loader.has_hard_reset() {
            ("hard", loader.hard_reset().await)
        } else {
            ("soft", loader.soft_reset().await)
        };
        match result {
            Ok(()) => {
                self.sink.success(format!(
                    "Device {kind}-reset issued - board should reboot now"
                ));
                if kind == "hard" {
                    ResetOutcome::Hard
                } else {
                    ResetOutcome::Soft
                }
            },
            Err(e) => {
                self.sink.trace(format!(
                    "Reset failed: {e}. Manually press the RESET button on your board."
                ));
                ResetOutcome::Failed(e.to_string())
            },
        }
    }

    fn ensure_ready(&self) -> Result<(), FlashError> {
        let state = self.state();
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(self.reject_flash(state))
        }
    }

    fn reject_flash(&self, state: ConnectionState) -> FlashError {
        let err = FlashError::NotConnected(state);
        self.sink.error(err.to_string());
        self.set_last_error(err.to_string());
        err
    }
}
