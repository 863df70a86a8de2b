//! Typst compiler contract.
//!
//! `typst compile <source>` writes `<source-stem>.pdf` next to the source and
//! exits 0, or prints diagnostics to stderr and exits non-zero.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ExternalTool;

pub const TOOL_NAME: &str = "typst";

/// Build the compiler tool from a binary path
pub fn compiler(binary: impl Into<PathBuf>, timeout: Duration) -> ExternalTool {
    ExternalTool::new(TOOL_NAME, binary, timeout)
}

/// Arguments for compiling `source`
pub fn compile_args(source: &Path) -> Vec<OsString> {
    vec![OsString::from("compile"), source.as_os_str().to_owned()]
}

/// Where the compiler writes its PDF for `source`
pub fn compiled_output_path(source: &Path) -> PathBuf {
    source.with_extension("pdf")
}
