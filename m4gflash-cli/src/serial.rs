//! Interactive serial port selection.
//!
//! The engine's native provider filters the detected ports and hands the
//! candidates to a chooser. This module supplies that chooser:
//! - A `dialoguer` prompt when stdin and stderr are terminals
//! - A deterministic pick in non-interactive mode (exactly one candidate)

use {
    crate::CliError,
    console::style,
    dialoguer::{Select, theme::ColorfulTheme},
    log::{debug, info},
    m4gflash::{DetectedPort, NativePortProvider, SelectError},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port from the CLI, environment or config file.
    pub port: Option<String>,
    /// Non-interactive mode (never prompt).
    pub non_interactive: bool,
}

impl SerialOptions {
    fn can_prompt(&self) -> bool {
        !self.non_interactive && std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
    }
}

/// Native provider honouring `options`.
pub fn provider(options: &SerialOptions) -> NativePortProvider {
    if let Some(name) = &options.port {
        debug!("Using explicit port {name}");
        return NativePortProvider::new().with_port_name(name.clone());
    }
    if options.can_prompt() {
        NativePortProvider::new().with_chooser(prompt_for_port)
    } else {
        NativePortProvider::new().with_chooser(pick_single_port)
    }
}

/// Turn a selection failure into a CLI error with the right exit code.
pub fn selection_error(err: SelectError, options: &SerialOptions) -> anyhow::Error {
    match err {
        SelectError::NoCompatibleDevice => {
            CliError::Usage("No serial ports found. Connect a board or pass --port.".to_string())
                .into()
        },
        SelectError::Cancelled if !options.can_prompt() => CliError::Usage(
            "Multiple serial ports found; pass --port to choose one in non-interactive mode."
                .to_string(),
        )
        .into(),
        SelectError::Cancelled => CliError::Cancelled("Port selection cancelled.".to_string()).into(),
        other => anyhow::Error::new(other),
    }
}

/// Non-interactive pick: only an unambiguous candidate is accepted.
fn pick_single_port(ports: &[DetectedPort]) -> Option<usize> {
    if ports.len() == 1 {
        info!("Auto-selected port: {}", ports[0].name);
        Some(0)
    } else {
        None
    }
}

fn port_label(port: &DetectedPort) -> String {
    let name = if port.device.is_known() {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn prompt_for_port(ports: &[DetectedPort]) -> Option<usize> {
    let labels: Vec<String> = ports.iter().map(port_label).collect();

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = labels
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let default = m4gflash::best_candidate(ports).unwrap_or(0);
    Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of your board")
        .items(&labels)
        .default(default)
        .interact_opt()
        .ok()
        .flatten()
}
