//! Catalog listing command implementation.

use {
    anyhow::{Context, Result},
    console::style,
    m4gflash::{BaseFetcher, Catalog, FirmwarePackage},
};

/// Load the catalog behind `base`.
pub(crate) async fn load_catalog(base: &str) -> Result<(BaseFetcher, Catalog)> {
    let fetcher = BaseFetcher::from_base(base)
        .with_context(|| format!("Invalid catalog base '{base}'"))?;
    let catalog = Catalog::load(&fetcher).await;
    Ok((fetcher, catalog))
}

fn package_json(package: &FirmwarePackage, is_default: bool) -> serde_json::Value {
    serde_json::json!({
        "id": package.id,
        "name": package.name,
        "description": package.description,
        "chipFamily": package.chip_family,
        "default": is_default,
        "images": package.images,
    })
}

/// Catalog command implementation. A missing manifest is reported, not fatal.
pub(crate) async fn cmd_catalog(base: &str, json: bool) -> Result<()> {
    let (_, catalog) = load_catalog(base).await?;
    let default_id = catalog.default_package().map(|p| p.id.clone());

    if json {
        let packages: Vec<serde_json::Value> = catalog
            .packages()
            .iter()
            .map(|p| package_json(p, default_id.as_deref() == Some(p.id.as_str())))
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "defaultBaud": catalog.default_baud(),
                "packages": packages,
                "warning": catalog.warning(),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if let Some(warning) = catalog.warning() {
        eprintln!("{} {warning}", style("⚠").yellow());
        return Ok(());
    }

    eprintln!("{}", style("Firmware catalog:").bold().underlined());
    if catalog.packages().is_empty() {
        eprintln!("  {}", style("The manifest lists no packages").dim());
    }
    for package in catalog.packages() {
        let marker = if default_id.as_deref() == Some(package.id.as_str()) {
            style(" (default)").green().to_string()
        } else {
            String::new()
        };
        eprintln!(
            "  {} {} - {}{marker}",
            style("•").green(),
            style(&package.id).cyan().bold(),
            package.name
        );
        if let Some(description) = &package.description {
            eprintln!("      {}", style(description).dim());
        }
        for image in &package.images {
            eprintln!("      {} @ {}", image.path, image.address);
        }
    }
    if let Some(baud) = catalog.default_baud() {
        eprintln!("\n  Default baud: {baud}");
    }

    Ok(())
}
