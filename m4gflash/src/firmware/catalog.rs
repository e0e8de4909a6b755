//! Firmware catalog (`firmware/manifest.json`).

use std::io;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::firmware::FirmwarePackage;
use crate::firmware::fetch::Fetcher;

/// Manifest location relative to the catalog base.
pub const MANIFEST_PATH: &str = "firmware/manifest.json";

/// Catalog file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareManifest {
    /// Baud rate the catalog recommends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_baud: Option<u32>,
    /// Flashable packages.
    #[serde(default)]
    pub packages: Vec<FirmwarePackage>,
}

impl FirmwareManifest {
    /// Parse manifest JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FetchError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn unavailable_warning(err: &FetchError, location: &str) -> String {
    let missing = match err {
        FetchError::Status { status, .. } => *status == 404,
        FetchError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
        _ => false,
    };
    if missing {
        format!(
            "Firmware manifest was not found. Prebuilt options will be hidden until you add {location}."
        )
    } else if let FetchError::Manifest(e) = err {
        format!(
            "Firmware manifest at {location} is invalid ({e}). Prebuilt options will be hidden until it is fixed."
        )
    } else {
        format!("Firmware manifest could not be loaded: {err}. Prebuilt options will be hidden.")
    }
}

/// A loaded catalog, or the warning explaining why there is none.
///
/// A missing catalog is not an error: custom files can still be flashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    manifest: Option<FirmwareManifest>,
    warning: Option<String>,
}

impl Catalog {
    /// Fetch and parse the manifest through `fetcher`.
    pub async fn load<F: Fetcher>(fetcher: &F) -> Self {
        match Self::try_load(fetcher).await {
            Ok(manifest) => Self::from_manifest(manifest),
            Err(e) => {
                let location = fetcher.location(MANIFEST_PATH);
                warn!("Failed to load firmware manifest from {location}: {e}");
                Self {
                    manifest: None,
                    warning: Some(unavailable_warning(&e, &location)),
                }
            },
        }
    }

    async fn try_load<F: Fetcher>(fetcher: &F) -> Result<FirmwareManifest, FetchError> {
        let bytes = fetcher
            .fetch(MANIFEST_PATH)
            .await?;
        FirmwareManifest::from_slice(&bytes)
    }

    /// Wrap an already parsed manifest.
    pub fn from_manifest(manifest: FirmwareManifest) -> Self {
        Self {
            manifest: Some(manifest),
            warning: None,
        }
    }

    /// The manifest, if it loaded.
    pub fn manifest(&self) -> Option<&FirmwareManifest> {
        self.manifest.as_ref()
    }

    /// Why the catalog is unavailable.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Packages, empty when the catalog is unavailable.
    pub fn packages(&self) -> &[FirmwarePackage] {
        self.manifest
            .as_ref()
            .map(|m| m.packages.as_slice())
            .unwrap_or_default()
    }

    /// Recommended baud rate.
    pub fn default_baud(&self) -> Option<u32> {
        self.manifest
            .as_ref()
            .and_then(|m| m.default_baud)
    }

    /// Initial selection: the first package.
    pub fn default_package(&self) -> Option<&FirmwarePackage> {
        self.packages().first()
    }

    /// Look up a package by id.
    pub fn find(&self, id: &str) -> Option<&FirmwarePackage> {
        self.packages()
            .iter()
            .find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::DirFetcher;

    const MANIFEST: &str = r#"{
        "defaultBaud": 460800,
        "packages": [
            { "id": "blink", "name": "Blink", "images": [{ "path": "firmware/blink.bin", "address": "0x0" }] },
            { "id": "wifi", "name": "Wi-Fi demo", "images": [] }
        ]
    }"#;

    fn catalog_dir(manifest: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("firmware")).unwrap();
        std::fs::write(dir.path().join(MANIFEST_PATH), manifest).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_exposes_packages_and_defaults() {
        let dir = catalog_dir(MANIFEST);
        let catalog = Catalog::load(&DirFetcher::new(dir.path())).await;

        assert!(catalog.warning().is_none());
        assert_eq!(catalog.packages().len(), 2);
        assert_eq!(catalog.default_baud(), Some(460_800));
        assert_eq!(catalog.default_package().unwrap().id, "blink");
        assert_eq!(catalog.find("wifi").unwrap().name, "Wi-Fi demo");
        assert!(catalog.find("nope").is_none());
    }

    #[tokio::test]
    async fn test_missing_manifest_degrades_to_warning() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(&DirFetcher::new(dir.path())).await;

        assert!(catalog.manifest().is_none());
        assert!(catalog.packages().is_empty());
        assert!(catalog.default_package().is_none());
        let warning = catalog.warning().unwrap();
        assert!(warning.starts_with("Firmware manifest was not found."));
        assert!(warning.contains("manifest.json"));
    }

    #[tokio::test]
    async fn test_malformed_manifest_degrades_to_warning() {
        let dir = catalog_dir("{ not json");
        let catalog = Catalog::load(&DirFetcher::new(dir.path())).await;
        let warning = catalog.warning().unwrap();
        assert!(warning.contains("is invalid"));
        assert!(!warning.contains("not found"));
    }

    #[test]
    fn test_empty_manifest_object() {
        let manifest = FirmwareManifest::from_slice(b"{}").unwrap();
        assert!(manifest.packages.is_empty());
        assert_eq!(manifest.default_baud, None);
    }
}
