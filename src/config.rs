//! Configuration for pagesmith.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PAGESMITH_WORK_DIR, PAGESMITH_TEMPLATE,
//!    PAGESMITH_TYPST, PAGESMITH_MAGICK, PAGESMITH_CONCURRENCY,
//!    PAGESMITH_TOOL_TIMEOUT, PAGESMITH_ESCAPE_MARKUP)
//! 2. Config file (an explicit path, else .pagesmith/config.yaml found in the
//!    current directory or a parent)
//! 3. Defaults
//!
//! Paths in the config file are relative to the directory containing
//! `.pagesmith/`. The resolved [`Config`] is built once at startup and passed
//! to the orchestrator; nothing here is global.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::magick::RasterOptions;
use crate::core::gate::DEFAULT_CONCURRENCY_LIMIT;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub raster: Option<RasterOptions>,
    #[serde(default)]
    pub rendering: RenderingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Directory holding per-request directories
    pub work_dir: Option<String>,
    /// Custom Typst template with a `{{ text }}` slot
    pub template: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    pub typst: Option<String>,
    pub magick: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    pub concurrency: Option<usize>,
    pub stale_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderingConfig {
    /// Typeset the input literally instead of as Typst markup
    pub escape_markup: Option<bool>,
}

/// Resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Absolute path of the work directory
    pub work_dir: PathBuf,
    /// Template file (built-in template if None)
    pub template_path: Option<PathBuf>,
    /// Typst compiler binary
    pub typst_path: PathBuf,
    /// ImageMagick binary
    pub magick_path: PathBuf,
    /// Maximum simultaneous pipelines
    pub concurrency_limit: usize,
    /// Per tool invocation timeout in seconds
    pub tool_timeout_seconds: u64,
    /// Request directories older than this are swept at startup
    pub stale_after_seconds: u64,
    /// Page selection and fuzz for the preview
    pub raster: RasterOptions,
    /// Escape Typst markup in the input (off: input is inserted verbatim)
    pub escape_markup: bool,
    /// Path to config file (if one was used)
    pub config_file: Option<PathBuf>,
}

const DEFAULT_TYPST: &str = "typst";
const DEFAULT_MAGICK: &str = "convert";
const DEFAULT_TOOL_TIMEOUT: u64 = 60;
const DEFAULT_STALE_AFTER: u64 = 3600;

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pagesmith")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            template_path: None,
            typst_path: PathBuf::from(DEFAULT_TYPST),
            magick_path: PathBuf::from(DEFAULT_MAGICK),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            tool_timeout_seconds: DEFAULT_TOOL_TIMEOUT,
            stale_after_seconds: DEFAULT_STALE_AFTER,
            raster: RasterOptions::default(),
            escape_markup: false,
            config_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// `explicit` names a config file that must exist; otherwise the
    /// `.pagesmith/config.yaml` search applies.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let file = match config_path {
            Some(path) => {
                let parsed = load_config_file(&path)?;
                Some((path, parsed))
            }
            None => None,
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file and environment lookups over the defaults
    pub fn resolve(
        file: Option<(PathBuf, ConfigFile)>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Config::default();

        if let Some((path, file)) = file {
            let base_dir = config_base_dir(&path);

            if let Some(ref dir) = file.paths.work_dir {
                config.work_dir = resolve_path(&base_dir, dir);
            }
            if let Some(ref template) = file.paths.template {
                config.template_path = Some(resolve_path(&base_dir, template));
            }
            if let Some(ref typst) = file.tools.typst {
                config.typst_path = resolve_tool(&base_dir, typst);
            }
            if let Some(ref magick) = file.tools.magick {
                config.magick_path = resolve_tool(&base_dir, magick);
            }
            if let Some(secs) = file.tools.timeout_seconds {
                config.tool_timeout_seconds = secs;
            }
            if let Some(limit) = file.limits.concurrency {
                config.concurrency_limit = limit;
            }
            if let Some(secs) = file.limits.stale_after_seconds {
                config.stale_after_seconds = secs;
            }
            if let Some(raster) = file.raster {
                config.raster = raster;
            }
            if let Some(escape) = file.rendering.escape_markup {
                config.escape_markup = escape;
            }
            config.config_file = Some(path);
        }

        if let Some(dir) = env("PAGESMITH_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(template) = env("PAGESMITH_TEMPLATE") {
            config.template_path = Some(PathBuf::from(template));
        }
        if let Some(typst) = env("PAGESMITH_TYPST") {
            config.typst_path = PathBuf::from(typst);
        }
        if let Some(magick) = env("PAGESMITH_MAGICK") {
            config.magick_path = PathBuf::from(magick);
        }
        if let Some(limit) = env("PAGESMITH_CONCURRENCY") {
            config.concurrency_limit = limit
                .trim()
                .parse()
                .with_context(|| format!("Invalid PAGESMITH_CONCURRENCY: {}", limit))?;
        }
        if let Some(secs) = env("PAGESMITH_TOOL_TIMEOUT") {
            config.tool_timeout_seconds = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid PAGESMITH_TOOL_TIMEOUT: {}", secs))?;
        }

        if let Some(escape) = env("PAGESMITH_ESCAPE_MARKUP") {
            config.escape_markup = escape
                .trim()
                .parse()
                .with_context(|| format!("Invalid PAGESMITH_ESCAPE_MARKUP: {}", escape))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            anyhow::bail!("Concurrency limit must be at least 1");
        }
        if self.tool_timeout_seconds == 0 {
            anyhow::bail!("Tool timeout must be at least 1 second");
        }
        if self.raster.fuzz_percent > 100 {
            anyhow::bail!(
                "Fuzz tolerance must be 0-100%, got {}%",
                self.raster.fuzz_percent
            );
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".pagesmith").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Directory that relative paths in `config_path` resolve against.
///
/// For `<root>/.pagesmith/config.yaml` that is `<root>`; for any other file
/// it is the file's own directory.
fn config_base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().map(|n| n == ".pagesmith").unwrap_or(false) {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Resolve a path that may be relative to the config file's base
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Tool names without a separator are looked up on PATH, not the base dir
fn resolve_tool(base: &Path, tool: &str) -> PathBuf {
    if tool.contains(std::path::MAIN_SEPARATOR) || tool.contains('/') {
        resolve_path(base, tool)
    } else {
        PathBuf::from(tool)
    }
}
