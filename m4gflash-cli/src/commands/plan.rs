//! Flash planning command implementation.
//!
//! Resolves a selection and fetches its images exactly as a flash would,
//! then prints what would be written. No device is touched.

use {
    super::catalog::load_catalog,
    crate::{CliError, PlanArgs},
    anyhow::{Context, Result},
    console::style,
    m4gflash::{
        BaseFetcher, CustomSelection, FirmwareResolver, FirmwareSelection, FlashConfiguration,
        FlashParams, FlashSource, LogSink, resolve,
    },
};

async fn selection(base: &str, args: &PlanArgs) -> Result<FirmwareSelection> {
    if let Some(id) = &args.package {
        let (_, catalog) = load_catalog(base).await?;
        if let Some(warning) = catalog.warning() {
            return Err(CliError::Usage(warning.to_string()).into());
        }
        let package = catalog.find(id).cloned().ok_or_else(|| {
            CliError::Usage(format!(
                "Unknown package '{id}'. Run `m4gflash catalog` to list packages."
            ))
        })?;
        return Ok(FirmwareSelection::Catalog(Some(package)));
    }

    let mut custom = CustomSelection::default()
        .with_address(args.address.clone())
        .with_params(FlashParams {
            flash_size: args.flash_size.clone(),
            flash_mode: args.flash_mode.clone(),
            flash_freq: args.flash_freq.clone(),
            erase_all: args.erase_all,
        });
    custom.file.clone_from(&args.file);
    Ok(FirmwareSelection::Custom(custom))
}

fn plan_json(source: &FlashSource, config: &FlashConfiguration) -> serde_json::Value {
    let files: Vec<serde_json::Value> = config
        .files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            serde_json::json!({
                "index": index,
                "address": format!("0x{:X}", file.address),
                "size": file.data.len(),
            })
        })
        .collect();
    serde_json::json!({
        "ok": true,
        "data": {
            "source": source.label(),
            "params": config.params,
            "totalBytes": config.total_bytes(),
            "files": files,
        }
    })
}

/// Plan command implementation.
pub(crate) async fn cmd_plan(base: &str, args: &PlanArgs, quiet: bool) -> Result<()> {
    let selection = selection(base, args).await?;
    let source = resolve(&selection).map_err(|e| CliError::Usage(e.to_string()))?;

    let fetcher = BaseFetcher::from_base(base)
        .with_context(|| format!("Invalid catalog base '{base}'"))?;
    let sink = LogSink::new();
    let config = FirmwareResolver::new(fetcher)
        .materialize(&source, &sink)
        .await
        .context("Failed to prepare firmware payload")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&source, &config))?);
        return Ok(());
    }

    if !quiet {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            style(source.label()).bold()
        );
    }
    let params = &config.params;
    eprintln!(
        "  flash size: {}, mode: {}, freq: {}, erase all: {}",
        params.flash_size,
        params.flash_mode,
        params.flash_freq,
        if params.erase_all { "yes" } else { "no" }
    );
    for (index, file) in config.files.iter().enumerate() {
        eprintln!(
            "  [{index}] 0x{:08X} ({} bytes)",
            file.address,
            file.data.len()
        );
    }
    eprintln!(
        "{} {} file(s), {} bytes total",
        style("✓").green(),
        config.files.len(),
        config.total_bytes()
    );

    Ok(())
}
