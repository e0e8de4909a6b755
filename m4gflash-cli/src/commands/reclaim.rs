//! Port reclaim command implementation.
//!
//! Selects a port the way a connect would (allow-listed vendors first, every
//! port as a fallback), opens it to prove no other process holds it, then
//! runs the reclaimer. The trail reaches the terminal through the `log`
//! mirror; `-vv` shows every lock and close step.

use {
    crate::{
        config::Config,
        serial::{self, SerialOptions},
    },
    anyhow::{Context, Result, anyhow},
    m4gflash::{
        EngineConfig, LogSink, NativePort, NativePortProvider, PortProvider, Reclaimer,
        SelectError, SerialHandle,
    },
};

async fn select(
    provider: &NativePortProvider,
    engine: &EngineConfig,
    options: &SerialOptions,
) -> Result<NativePort> {
    let selected = match provider.request_port(&engine.filters).await {
        Err(SelectError::NoCompatibleDevice) => provider.request_port(&[]).await,
        other => other,
    };
    selected.map_err(|e| serial::selection_error(e, options))
}

/// Reclaim command implementation.
pub(crate) async fn cmd_reclaim(config: &Config, options: &SerialOptions) -> Result<()> {
    let engine = EngineConfig::new().with_extra_vendors(&config.ports.extra_vendors);
    let provider = serial::provider(options);
    let reclaimer = Reclaimer::from_config(&engine);
    let sink = LogSink::new();

    let mut port = select(&provider, &engine, options).await?;
    sink.info(format!("Selected {} ({})", port.name(), port.describe()));

    if let Err(e) = port.open(engine.rom_baud).await {
        sink.error(format!(
            "Unable to open {}: {e}. Another program may still hold it.",
            port.name()
        ));
        return Err(anyhow!("{} is busy or unavailable", port.name()));
    }
    sink.trace(format!("Opened at {} baud", port.baud_rate()));

    reclaimer
        .reclaim(&mut port, "selected", &sink)
        .await
        .with_context(|| format!("Failed to release {}", port.name()))?;
    sink.success(format!("{} is free", port.name()));
    Ok(())
}
