//! Port listing command implementation.

use {
    crate::config::Config,
    anyhow::Result,
    console::style,
    m4gflash::{DetectedPort, best_candidate, detect_ports},
};

/// Whether a port is on the built-in allow-list or a configured vendor.
fn is_known(port: &DetectedPort, config: &Config) -> bool {
    port.is_allowlisted()
        || port
            .vid
            .is_some_and(|vid| config.ports.extra_vendors.contains(&vid))
}

/// Ports to show: known boards first; everything when asked or when nothing is known.
fn visible_ports(detected: Vec<DetectedPort>, config: &Config, all: bool) -> Vec<DetectedPort> {
    if all || !detected.iter().any(|p| is_known(p, config)) {
        return detected;
    }
    detected
        .into_iter()
        .filter(|p| is_known(p, config))
        .collect()
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool, all: bool) -> Result<()> {
    let ports = visible_ports(detect_ports(), config, all);

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "device": p.device.name(),
                    "known": is_known(p, config),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": entries,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            device_type,
            vid_pid,
            product
        );
    }

    if let Some(best) = best_candidate(&ports).and_then(|i| ports.get(i)) {
        eprintln!(
            "\n{} Most likely board: {}",
            style("→").green().bold(),
            style(&best.name).cyan().bold()
        );
    }

    Ok(())
}
