//! Turning a firmware selection into a flash configuration.

use std::path::PathBuf;

use crate::error::{FetchError, ValidationError};
use crate::firmware::fetch::{Fetcher, read_local};
use crate::firmware::{FirmwarePackage, FlashConfiguration, FlashFile, FlashParams, parse_address};
use crate::trail::LogSink;

/// What the operator picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSelection {
    /// Catalog tab; `None` when nothing is selected.
    Catalog(Option<FirmwarePackage>),
    /// Ad-hoc file tab.
    Custom(CustomSelection),
}

/// Ad-hoc file together with where and how to flash it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSelection {
    /// Chosen file, if any.
    pub file: Option<PathBuf>,
    /// Address literal as typed.
    pub address: String,
    /// Flash parameters.
    pub params: FlashParams,
}

impl Default for CustomSelection {
    fn default() -> Self {
        Self {
            file: None,
            address: "0x0000".to_string(),
            params: FlashParams::default(),
        }
    }
}

impl CustomSelection {
    /// Select `file` at address 0 with `keep` parameters.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::default()
        }
    }

    /// Set the address literal.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the flash parameters.
    #[must_use]
    pub fn with_params(mut self, params: FlashParams) -> Self {
        self.params = params;
        self
    }
}

/// Catalog image with its address already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Manifest path.
    pub path: String,
    /// Flash address.
    pub address: u32,
}

/// A validated selection. Nothing has been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashSource {
    /// Catalog package.
    Catalog {
        /// The package as listed.
        package: FirmwarePackage,
        /// Images in declared order.
        images: Vec<ResolvedImage>,
        /// Parameters declared by the package.
        params: FlashParams,
    },
    /// Local file.
    Custom {
        /// File to read.
        file: PathBuf,
        /// Flash address.
        address: u32,
        /// Operator-chosen parameters.
        params: FlashParams,
    },
}

impl FlashSource {
    /// Flash parameters of either variant.
    pub fn params(&self) -> &FlashParams {
        match self {
            Self::Catalog { params, .. } | Self::Custom { params, .. } => params,
        }
    }

    /// Short name for log lines.
    pub fn label(&self) -> String {
        match self {
            Self::Catalog { package, .. } => package.name.clone(),
            Self::Custom { file, .. } => file.display().to_string(),
        }
    }
}

/// Validate a selection. Performs no I/O.
pub fn resolve(selection: &FirmwareSelection) -> Result<FlashSource, ValidationError> {
    match selection {
        FirmwareSelection::Catalog(None) => Err(ValidationError::NoPackageSelected),
        FirmwareSelection::Catalog(Some(package)) => {
            if package.images.is_empty() {
                return Err(ValidationError::NoImages(package.name.clone()));
            }
            let images = package
                .images
                .iter()
                .map(|image| {
                    Ok(ResolvedImage {
                        path: image.path.clone(),
                        address: parse_address(&image.address)?,
                    })
                })
                .collect::<Result<Vec<_>, ValidationError>>()?;
            Ok(FlashSource::Catalog {
                package: package.clone(),
                images,
                params: FlashParams::from_package(package),
            })
        },
        FirmwareSelection::Custom(custom) => {
            let file = custom
                .file
                .clone()
                .ok_or(ValidationError::NoFileChosen)?;
            custom.params.check_choices()?;
            Ok(FlashSource::Custom {
                file,
                address: parse_address(&custom.address)?,
                params: custom.params.clone(),
            })
        },
    }
}

/// Loads the bytes behind a [`FlashSource`].
#[derive(Debug, Clone)]
pub struct FirmwareResolver<F> {
    fetcher: F,
}

impl<F: Fetcher> FirmwareResolver<F> {
    /// Resolve catalog paths through `fetcher`.
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch every image in declared order.
    ///
    /// All or nothing: the first failing image aborts and nothing fetched
    /// so far is returned.
    pub async fn materialize(
        &self,
        source: &FlashSource,
        sink: &LogSink,
    ) -> Result<FlashConfiguration, FetchError> {
        match source {
            FlashSource::Catalog { images, params, .. } => {
                let mut files = Vec::with_capacity(images.len());
                for image in images {
                    sink.trace(format!("Fetching {}…", self.fetcher.location(&image.path)));
                    let data = self
                        .fetcher
                        .fetch(&image.path)
                        .await?;
                    files.push(FlashFile {
                        data,
                        address: image.address,
                    });
                }
                Ok(FlashConfiguration {
                    files,
                    params: params.clone(),
                })
            },
            FlashSource::Custom {
                file,
                address,
                params,
            } => {
                sink.trace(format!("Reading {}…", file.display()));
                let data = read_local(file).await?;
                Ok(FlashConfiguration {
                    files: vec![FlashFile {
                        data,
                        address: *address,
                    }],
                    params: params.clone(),
                })
            },
        }
    }
}
