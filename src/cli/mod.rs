//! Command-line interface for pagesmith.
//!
//! Stands in for an interactive front-end: reads text, submits it to the
//! pipeline, reports progress and writes the PDF and preview image.

use std::collections::HashSet;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::Config;
use crate::core::{Orchestrator, ProgressSink};
use crate::domain::{PipelineResult, PipelineStage};

/// pagesmith - Typst document generation pipeline
#[derive(Parser, Debug)]
#[command(name = "pagesmith")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .pagesmith/config.yaml in this or a parent directory)
    #[arg(long, global = true, env = "PAGESMITH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a PDF and a first-page preview from text
    Generate {
        /// Text to typeset (reads --input or stdin if omitted)
        text: Option<String>,

        /// Input file
        #[arg(short, long, conflicts_with = "text")]
        input: Option<PathBuf>,

        /// Read input from stdin
        #[arg(long)]
        stdin: bool,

        /// Where to write the PDF (kept in the work directory if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Where to write the preview image
        #[arg(short, long)]
        preview: Option<PathBuf>,
    },

    /// Generate documents for several input files concurrently
    Batch {
        /// Input text files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for <name>.pdf and <name>.png outputs
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Check that the compiler and rasterizer are reachable
    Probe,

    /// Show resolved configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every request directory from the work directory
    Clean,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match self.command {
            Commands::Generate {
                text,
                input,
                stdin,
                output,
                preview,
            } => {
                let text = read_text(text, input, stdin)?;
                generate(&config, text, output, preview).await
            }
            Commands::Batch { inputs, out_dir } => batch(&config, inputs, &out_dir).await,
            Commands::Probe => probe(&config).await,
            Commands::Config { json } => show_config(&config, json),
            Commands::Clean => clean(&config).await,
        }
    }
}

/// Prints stage transitions to stderr
struct CliProgress {
    /// Prefix lines with the request id (useful when requests interleave)
    tagged: bool,
}

impl ProgressSink for CliProgress {
    fn on_stage(&self, request_id: Uuid, stage: PipelineStage) {
        if matches!(stage, PipelineStage::Idle | PipelineStage::Cleaning) {
            return;
        }
        if self.tagged {
            eprintln!("[{}] {}", short_id(request_id), stage);
        } else {
            eprintln!("  {}...", stage);
        }
    }

    fn on_notice(&self, request_id: Uuid, message: &str) {
        if self.tagged {
            eprintln!("[{}] {}", short_id(request_id), message);
        } else {
            eprintln!("{}", message);
        }
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Resolve text from the positional argument, a file, or stdin
fn read_text(text: Option<String>, input_file: Option<PathBuf>, use_stdin: bool) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = input_file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }
    if use_stdin || !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        return Ok(buffer);
    }
    anyhow::bail!("No input provided. Pass TEXT, use --input <file> or pipe to stdin")
}

/// Build the orchestrator and run the startup probes
async fn start(config: &Config) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::from_config(config).context("Invalid configuration")?;
    orchestrator
        .startup()
        .await
        .context("Startup checks failed")?;
    Ok(orchestrator)
}

async fn generate(
    config: &Config,
    text: String,
    output: Option<PathBuf>,
    preview: Option<PathBuf>,
) -> Result<()> {
    let orchestrator = start(config).await?;

    let result = match orchestrator.submit(text, &CliProgress { tagged: false }).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("\n{}", e.user_message());
            std::process::exit(1);
        }
    };

    let (pdf, preview) = deliver(result, output, preview).await?;
    if let Some(preview) = preview {
        eprintln!("Preview: {}", preview.display());
    }
    println!("{}", pdf.display());
    Ok(())
}

/// Write the preview (if asked) and move or keep the PDF
async fn deliver(
    result: PipelineResult,
    pdf_dest: Option<PathBuf>,
    preview_dest: Option<PathBuf>,
) -> Result<(PathBuf, Option<PathBuf>)> {
    let PipelineResult { image, output, .. } = result;

    let preview = match preview_dest {
        Some(path) => Some(save_preview(image, path).await?),
        None => None,
    };

    let pdf = match pdf_dest {
        Some(dest) => output
            .persist_to(&dest)
            .await
            .with_context(|| format!("Failed to write PDF: {}", dest.display()))?,
        None => output.path().to_path_buf(),
    };

    Ok((pdf, preview))
}

async fn save_preview(image: DynamicImage, path: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || {
        image
            .save(&path)
            .with_context(|| format!("Failed to write preview: {}", path.display()))?;
        Ok::<_, anyhow::Error>(path)
    })
    .await
    .context("Preview writer task failed")?
}

async fn batch(config: &Config, inputs: Vec<PathBuf>, out_dir: &Path) -> Result<()> {
    let orchestrator = Arc::new(start(config).await?);
    let progress = Arc::new(CliProgress { tagged: true });
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    eprintln!(
        "Submitting {} inputs (at most {} at a time)",
        inputs.len(),
        orchestrator.gate().limit()
    );

    let stems = output_stems(&inputs);
    let mut tasks = JoinSet::new();
    for (input, stem) in inputs.into_iter().zip(stems) {
        let orchestrator = Arc::clone(&orchestrator);
        let progress = Arc::clone(&progress);
        let out_dir = out_dir.to_path_buf();

        tasks.spawn(async move {
            let outcome: Result<PathBuf, String> = async {
                let text = std::fs::read_to_string(&input)
                    .map_err(|e| format!("cannot read input: {}", e))?;
                let result = orchestrator
                    .submit(text, progress.as_ref())
                    .await
                    .map_err(|e| e.user_message())?;

                let (pdf, _) = deliver(
                    result,
                    Some(out_dir.join(format!("{}.pdf", stem))),
                    Some(out_dir.join(format!("{}.png", stem))),
                )
                .await
                .map_err(|e| format!("{:#}", e))?;
                Ok(pdf)
            }
            .await;
            (input, outcome)
        });
    }

    let mut failures = 0;
    let mut rows = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (input, outcome) = joined.context("Batch task panicked")?;
        if outcome.is_err() {
            failures += 1;
        }
        rows.push((input, outcome));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    println!("{:<40} {:<8} {}", "INPUT", "STATUS", "RESULT");
    println!("{}", "-".repeat(80));
    for (input, outcome) in rows {
        match outcome {
            Ok(pdf) => println!("{:<40} {:<8} {}", input.display(), "ok", pdf.display()),
            Err(message) => {
                let first_line = message.lines().next().unwrap_or_default();
                println!("{:<40} {:<8} {}", input.display(), "failed", first_line)
            }
        }
    }

    if failures > 0 {
        eprintln!("\n{} input(s) failed", failures);
        std::process::exit(1);
    }
    Ok(())
}

/// Output file stems for batch inputs, unique within the batch.
///
/// Inputs sharing a stem (`a/notes.txt`, `b/notes.txt`, or one file listed
/// twice) get `-2`, `-3`, ... suffixes in input order.
fn output_stems(inputs: &[PathBuf]) -> Vec<String> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let base = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            let mut stem = base.clone();
            let mut suffix = 2;
            while !taken.insert(stem.clone()) {
                stem = format!("{}-{}", base, suffix);
                suffix += 1;
            }
            stem
        })
        .collect()
}

async fn probe(config: &Config) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config).context("Invalid configuration")?;
    let versions = orchestrator.startup().await.context("Startup checks failed")?;

    println!("Typst:       {}", versions.compiler);
    println!("  binary:    {}", config.typst_path.display());
    println!("ImageMagick: {}", versions.rasterizer);
    println!("  binary:    {}", config.magick_path.display());
    Ok(())
}

fn show_config(config: &Config, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(config).context("Failed to serialize config")?
        );
        return Ok(());
    }

    println!("pagesmith configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Work directory: {}", config.work_dir.display());
    println!(
        "  Template:       {}",
        config
            .template_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in)".to_string())
    );
    println!(
        "  Input:          {}",
        if config.escape_markup { "escaped" } else { "Typst markup" }
    );
    println!();
    println!("Tools:");
    println!("  Typst:       {}", config.typst_path.display());
    println!("  ImageMagick: {}", config.magick_path.display());
    println!("  Timeout:     {}s", config.tool_timeout_seconds);
    println!();
    println!("Limits:");
    println!("  Concurrency:  {}", config.concurrency_limit);
    println!("  Stale after:  {}s", config.stale_after_seconds);
    println!();
    println!("Preview:");
    println!("  Page:  {}", config.raster.page);
    println!("  Fuzz:  {}%", config.raster.fuzz_percent);

    Ok(())
}

async fn clean(config: &Config) -> Result<()> {
    let store = crate::core::ArtifactStore::new(&config.work_dir);
    let removed = store
        .sweep_stale(std::time::Duration::ZERO)
        .await
        .with_context(|| format!("Failed to clean {}", config.work_dir.display()))?;
    println!("Removed {} request director{}", removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}
