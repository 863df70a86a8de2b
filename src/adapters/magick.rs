//! ImageMagick rasterizer contract.
//!
//! `<pdf>[<page>] -fuzz <n>% -fill white -opaque white -flatten <png>` selects
//! one page, treats near-white pixels as background, flattens transparency
//! onto opaque white and writes a raster image.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ExternalTool;

pub const TOOL_NAME: &str = "imagemagick";

/// Build the rasterizer tool from a binary path
pub fn rasterizer(binary: impl Into<PathBuf>, timeout: Duration) -> ExternalTool {
    ExternalTool::new(TOOL_NAME, binary, timeout)
}

/// Rasterization knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RasterOptions {
    /// Zero-based page to extract (default: 0)
    #[serde(default)]
    pub page: u32,

    /// Fuzz tolerance for matching white, in percent (default: 25)
    #[serde(default = "default_fuzz_percent")]
    pub fuzz_percent: u8,
}

fn default_fuzz_percent() -> u8 {
    25
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            page: 0,
            fuzz_percent: default_fuzz_percent(),
        }
    }
}

/// Arguments for rasterizing `pdf` into `image`
pub fn raster_args(pdf: &Path, image: &Path, options: &RasterOptions) -> Vec<OsString> {
    let mut page_selector = pdf.as_os_str().to_owned();
    page_selector.push(format!("[{}]", options.page));

    vec![
        page_selector,
        OsString::from("-fuzz"),
        OsString::from(format!("{}%", options.fuzz_percent)),
        OsString::from("-fill"),
        OsString::from("white"),
        OsString::from("-opaque"),
        OsString::from("white"),
        OsString::from("-flatten"),
        image.as_os_str().to_owned(),
    ]
}
