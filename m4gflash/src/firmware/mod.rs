//! Firmware payload model.
//!
//! A payload comes from one of two places: a package listed in the firmware
//! catalog (one or more images at fixed addresses), or a single local file
//! the operator picked together with its address and flash parameters.
//! [`resolve`] validates the choice without any I/O, and
//! [`FirmwareResolver::materialize`] turns it into the bytes handed to the
//! loader.

pub mod address;
pub mod catalog;
pub mod fetch;
pub mod resolve;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub use address::parse_address;
pub use catalog::{Catalog, FirmwareManifest, MANIFEST_PATH};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{BaseFetcher, DirFetcher, Fetcher};
pub use resolve::{
    CustomSelection, FirmwareResolver, FirmwareSelection, FlashSource, ResolvedImage, resolve,
};

/// One image of a catalog package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareImage {
    /// Path relative to the catalog base, or an absolute http(s) URL.
    pub path: String,
    /// Flash address literal (`0x` hex or decimal).
    pub address: String,
}

/// A flashable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwarePackage {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Chip family the package targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip_family: Option<String>,
    /// Flash size override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_size: Option<String>,
    /// Flash mode override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_mode: Option<String>,
    /// Flash frequency override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_freq: Option<String>,
    /// Erase the whole chip before writing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erase_all: Option<bool>,
    /// Images in write order.
    #[serde(default)]
    pub images: Vec<FirmwareImage>,
}

macro_rules! flash_param {
    (
        $(#[$meta:meta])*
        $name:ident, $param:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub enum $name {
            /// Leave the value in the image header untouched.
            #[default]
            #[serde(rename = "keep")]
            Keep,
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
            /// Catalog value outside the operator choices, passed on as written.
            #[serde(untagged)]
            Other(String),
        }

        impl $name {
            /// Every value an operator may choose, `keep` first.
            pub const ALL: &'static [Self] = &[Self::Keep, $(Self::$variant),+];

            /// Wire/manifest spelling.
            pub fn as_str(&self) -> &str {
                match self {
                    Self::Keep => "keep",
                    $(Self::$variant => $text,)+
                    Self::Other(value) => value,
                }
            }

            /// Value as a catalog manifest spells it. Known spellings map to
            /// their variant, anything else is kept verbatim.
            pub fn from_manifest(value: &str) -> Self {
                value
                    .parse()
                    .unwrap_or_else(|_| Self::Other(value.trim().to_string()))
            }

            /// Fails for values an operator could not have picked.
            pub fn check_choice(&self) -> Result<(), ValidationError> {
                match self {
                    Self::Other(value) => Err(ValidationError::InvalidFlashParam {
                        param: $param,
                        value: value.clone(),
                    }),
                    _ => Ok(()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .cloned()
                    .ok_or_else(|| ValidationError::InvalidFlashParam {
                        param: $param,
                        value: s.to_string(),
                    })
            }
        }
    };
}

flash_param! {
    /// Flash chip size.
    FlashSize, "flash size" {
        /// 2 MiB.
        Mb2 => "2MB",
        /// 4 MiB.
        Mb4 => "4MB",
        /// 8 MiB.
        Mb8 => "8MB",
        /// 16 MiB.
        Mb16 => "16MB",
        /// 32 MiB.
        Mb32 => "32MB",
    }
}

flash_param! {
    /// SPI flash access mode.
    FlashMode, "flash mode" {
        /// Quad I/O.
        Qio => "qio",
        /// Quad output.
        Qout => "qout",
        /// Dual I/O.
        Dio => "dio",
        /// Dual output.
        Dout => "dout",
    }
}

flash_param! {
    /// SPI flash clock.
    FlashFreq, "flash frequency" {
        /// 40 MHz.
        Mhz40 => "40m",
        /// 80 MHz.
        Mhz80 => "80m",
    }
}

/// Flash parameters passed along with the images.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashParams {
    /// Flash size.
    pub flash_size: FlashSize,
    /// Flash mode.
    pub flash_mode: FlashMode,
    /// Flash frequency.
    pub flash_freq: FlashFreq,
    /// Erase the whole chip first.
    pub erase_all: bool,
}

impl FlashParams {
    /// Parameters declared by a catalog package. Missing fields fall back to
    /// `keep`; unfamiliar spellings are kept as written.
    pub fn from_package(package: &FirmwarePackage) -> Self {
        fn manifest<T: Default>(value: Option<&String>, parse: fn(&str) -> T) -> T {
            value.map_or_else(T::default, |v| parse(v))
        }

        Self {
            flash_size: manifest(package.flash_size.as_ref(), FlashSize::from_manifest),
            flash_mode: manifest(package.flash_mode.as_ref(), FlashMode::from_manifest),
            flash_freq: manifest(package.flash_freq.as_ref(), FlashFreq::from_manifest),
            erase_all: package.erase_all.unwrap_or(false),
        }
    }

    /// Fails unless every value is one of the operator choices.
    pub fn check_choices(&self) -> Result<(), ValidationError> {
        self.flash_size.check_choice()?;
        self.flash_mode.check_choice()?;
        self.flash_freq.check_choice()
    }
}

/// One binary placed at a flash address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashFile {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Target flash address.
    pub address: u32,
}

/// A resolved, source-agnostic payload ready for the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashConfiguration {
    /// Files in write order.
    pub files: Vec<FlashFile>,
    /// Flash parameters.
    pub params: FlashParams,
}

impl FlashConfiguration {
    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> usize {
        self.files
            .iter()
            .map(|f| f.data.len())
            .sum()
    }
}
