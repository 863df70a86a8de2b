//! Main orchestrator for request execution.
//!
//! Coordinates admission, template rendering, the two tool invocations,
//! preview loading and artifact cleanup for each request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::magick::{self, RasterOptions};
use crate::adapters::{typst, ExternalTool, ProcessRunner, ToolInvocation, ToolRunner};
use crate::config::Config;
use crate::domain::{
    ArtifactKind, ConversionRequest, PipelineResult, PipelineStage, StageMachine,
};
use crate::error::{InvocationError, PipelineError, StartupError};

use super::artifacts::{ArtifactScope, ArtifactStore};
use super::gate::ConcurrencyGate;
use super::progress::ProgressSink;
use super::template::Template;

/// Versions reported by the tools' `--version` probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersions {
    pub compiler: String,
    pub rasterizer: String,
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    template: Template,
    runner: Arc<dyn ToolRunner>,
    compiler: ExternalTool,
    rasterizer: ExternalTool,
    raster_options: RasterOptions,
    store: ArtifactStore,
    gate: ConcurrencyGate,
    stale_after: std::time::Duration,
}

impl Orchestrator {
    /// Build an orchestrator that runs real processes
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let template = match &config.template_path {
            Some(path) => Template::from_file(path)?,
            None => Template::builtin()?,
        }
        .with_markup_escaping(config.escape_markup);
        Ok(Self::with_runner(config, template, Arc::new(ProcessRunner::new())))
    }

    /// Build an orchestrator around any tool runner
    pub fn with_runner(config: &Config, template: Template, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            template,
            runner,
            compiler: typst::compiler(&config.typst_path, config.tool_timeout()),
            rasterizer: magick::rasterizer(&config.magick_path, config.tool_timeout()),
            raster_options: config.raster.clone(),
            store: ArtifactStore::new(&config.work_dir),
            gate: ConcurrencyGate::new(config.concurrency_limit),
            stale_after: config.stale_after(),
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Probe both tools and prepare the work directory.
    ///
    /// Must succeed before requests are accepted.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<ToolVersions, StartupError> {
        let compiler = self.compiler.probe_version(self.runner.as_ref()).await?;
        info!(version = %compiler, binary = %self.compiler.binary.display(), "Compiler available");

        let rasterizer = self.rasterizer.probe_version(self.runner.as_ref()).await?;
        info!(version = %rasterizer, binary = %self.rasterizer.binary.display(), "Rasterizer available");

        self.store
            .prepare()
            .await
            .map_err(|source| StartupError::WorkDir {
                path: self.store.root().to_path_buf(),
                source,
            })?;

        match self.store.sweep_stale(self.stale_after).await {
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to sweep stale request directories"),
        }

        Ok(ToolVersions {
            compiler,
            rasterizer,
        })
    }

    /// Convert `text`, waiting for a permit first
    pub async fn submit(
        &self,
        text: impl Into<String>,
        progress: &dyn ProgressSink,
    ) -> Result<PipelineResult, PipelineError> {
        self.submit_with_cancel(text, progress, &CancellationToken::new())
            .await
    }

    /// Convert `text`, giving up early if `cancel` fires
    #[instrument(skip_all)]
    pub async fn submit_with_cancel(
        &self,
        text: impl Into<String>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let request = ConversionRequest::new(text);

        let permit = tokio::select! {
            permit = self.gate.admit() => permit?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        debug!(request_id = %request.id, waited_ms = permit.waited().as_millis() as u64, "Request admitted");

        let result = self.run(request, progress, cancel).await;
        self.gate.release(permit);
        result
    }

    /// Execute the pipeline for one request. Does not touch the gate.
    #[instrument(skip(self, request, progress, cancel), fields(request_id = %request.id))]
    pub async fn run(
        &self,
        request: ConversionRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        let mut stages = StageMachine::new();
        info!(chars = request.raw_text.chars().count(), "Starting conversion");

        self.enter(&mut stages, &request, progress, PipelineStage::Validating);
        if let Err(e) = request.validate() {
            // Nothing has been written yet
            self.enter(&mut stages, &request, progress, PipelineStage::Cleaning);
            return self.fail(&mut stages, &request, progress, e);
        }

        let mut scope = match self.store.open_scope(request.id).await {
            Ok(scope) => scope,
            Err(e) => {
                self.enter(&mut stages, &request, progress, PipelineStage::Cleaning);
                return self.fail(&mut stages, &request, progress, e);
            }
        };

        match self
            .execute(&request, &mut scope, &mut stages, progress, cancel)
            .await
        {
            Ok((image, pdf)) => {
                self.enter(&mut stages, &request, progress, PipelineStage::Cleaning);
                let output = scope.retain(pdf);
                scope.release().await;
                self.enter(&mut stages, &request, progress, PipelineStage::Done);

                let elapsed = started.elapsed();
                info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    output = %output.path().display(),
                    "Conversion finished"
                );
                progress.on_notice(request.id, "Finished!");

                Ok(PipelineResult {
                    request_id: request.id,
                    image,
                    output,
                    elapsed,
                })
            }
            Err(e) => {
                self.enter(&mut stages, &request, progress, PipelineStage::Cleaning);
                scope.release().await;
                self.fail(&mut stages, &request, progress, e)
            }
        }
    }

    /// Rendering through loading. Any error leaves cleanup to the caller.
    async fn execute(
        &self,
        request: &ConversionRequest,
        scope: &mut ArtifactScope,
        stages: &mut StageMachine,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(DynamicImage, crate::domain::TemporaryArtifact), PipelineError> {
        check_cancelled(cancel)?;
        self.enter(stages, request, progress, PipelineStage::Rendering);
        progress.on_notice(request.id, "Generating the PDF document");

        let document = self.template.render(request)?;
        let source = scope.create(ArtifactKind::SourceDoc).await?;
        tokio::fs::write(&source.path, document.source_text())
            .await
            .map_err(|e| PipelineError::artifact(&source.path, e))?;
        debug!(bytes = document.len(), path = %source.path.display(), "Wrote document source");

        check_cancelled(cancel)?;
        self.enter(stages, request, progress, PipelineStage::Compiling);
        // Registered before the compiler runs so a partial PDF is cleaned up too
        let pdf = scope.register(
            ArtifactKind::CompiledPdf,
            typst::compiled_output_path(&source.path),
        );
        let compiled = self
            .invoke(&self.compiler, typst::compile_args(&source.path), cancel)
            .await?;
        if !compiled.success() {
            return Err(PipelineError::Compile {
                exit_code: compiled.exit_code,
                diagnostics: compiled.diagnostics().to_string(),
            });
        }

        check_cancelled(cancel)?;
        self.enter(stages, request, progress, PipelineStage::Rasterizing);
        let raster = scope.create(ArtifactKind::RasterImage).await?;
        let rasterized = self
            .invoke(
                &self.rasterizer,
                magick::raster_args(&pdf.path, &raster.path, &self.raster_options),
                cancel,
            )
            .await?;
        if !rasterized.success() {
            debug!(diagnostics = %rasterized.diagnostics(), "Rasterizer output");
            return Err(PipelineError::Raster {
                exit_code: rasterized.exit_code,
            });
        }

        check_cancelled(cancel)?;
        self.enter(stages, request, progress, PipelineStage::Loading);
        let image = load_image(raster.path.clone()).await?;
        debug!(width = image.width(), height = image.height(), "Loaded preview");

        // The preview now lives in memory and the source is no longer needed
        scope.discard(&raster).await?;
        scope.discard(&source).await?;

        Ok((image, pdf))
    }

    /// Run a tool, killing it if the request is cancelled meanwhile
    async fn invoke(
        &self,
        tool: &ExternalTool,
        arguments: Vec<std::ffi::OsString>,
        cancel: &CancellationToken,
    ) -> Result<ToolInvocation, PipelineError> {
        tokio::select! {
            result = tool.run(self.runner.as_ref(), arguments) => {
                let invocation = result.map_err(|e: InvocationError| {
                    error!(tool = tool.name, error = %e, "Tool invocation failed");
                    PipelineError::from(e)
                })?;
                debug!(
                    tool = tool.name,
                    exit_code = invocation.exit_code,
                    elapsed_ms = invocation.elapsed.as_millis() as u64,
                    "Tool finished"
                );
                Ok(invocation)
            }
            // Dropping the invocation future kills the child
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    fn enter(
        &self,
        stages: &mut StageMachine,
        request: &ConversionRequest,
        progress: &dyn ProgressSink,
        stage: PipelineStage,
    ) {
        let previous = stages.advance(stage);
        debug!(from = ?previous, to = ?stage, "Stage transition");
        progress.on_stage(request.id, stage);
    }

    fn fail(
        &self,
        stages: &mut StageMachine,
        request: &ConversionRequest,
        progress: &dyn ProgressSink,
        error: PipelineError,
    ) -> Result<PipelineResult, PipelineError> {
        self.enter(stages, request, progress, PipelineStage::Failed);
        if error.is_user_correctable() {
            warn!(error = %error, "Conversion rejected");
        } else {
            error!(error = %error, "Conversion failed");
        }
        progress.on_notice(request.id, &error.user_message());
        Err(error)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Decode the preview on the blocking pool
async fn load_image(path: PathBuf) -> Result<DynamicImage, PipelineError> {
    tokio::task::spawn_blocking(move || {
        image::open(&path).map_err(|source| PipelineError::Image { path, source })
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("preview decoding task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::NoopProgress;
    use async_trait::async_trait;
    use std::ffi::OsString;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-process stand-in for typst and ImageMagick
    struct FakeTools {
        compile_exit: i32,
        raster_exit: i32,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTools {
        fn new(compile_exit: i32, raster_exit: i32) -> Arc<Self> {
            Arc::new(Self {
                compile_exit,
                raster_exit,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolRunner for FakeTools {
        async fn invoke(
            &self,
            binary: &Path,
            arguments: &[OsString],
            _timeout: Duration,
        ) -> Result<ToolInvocation, InvocationError> {
            let name = binary.display().to_string();
            self.calls.lock().unwrap().push(name.clone());
            let args: Vec<String> = arguments
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();

            let exit_code = if args.first().map(String::as_str) == Some("--version") {
                0
            } else if name == "typst" {
                let source = Path::new(&args[1]);
                std::fs::write(source.with_extension("pdf"), b"%PDF-1.7").unwrap();
                self.compile_exit
            } else {
                if self.raster_exit == 0 {
                    let out = Path::new(args.last().unwrap());
                    image::RgbImage::new(4, 6).save(out).unwrap();
                }
                self.raster_exit
            };

            Ok(ToolInvocation {
                binary: binary.to_path_buf(),
                arguments: arguments.to_vec(),
                stdout: format!("{} 1.0\n", name),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "error: unexpected token".to_string()
                },
                exit_code,
                elapsed: Duration::ZERO,
            })
        }
    }

    fn orchestrator(temp: &TempDir, tools: Arc<FakeTools>) -> Orchestrator {
        let config = Config {
            work_dir: temp.path().to_path_buf(),
            typst_path: PathBuf::from("typst"),
            magick_path: PathBuf::from("convert"),
            ..Default::default()
        };
        Orchestrator::with_runner(&config, Template::builtin().unwrap(), tools)
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_success_retains_only_pdf() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, FakeTools::new(0, 0));

        let result = orch.submit("Hello", &NoopProgress).await.unwrap();
        assert_eq!(result.image_dimensions(), (4, 6));
        assert!(result.output_document_path().exists());

        let request_dir = orch.store().request_dir(result.request_id);
        assert_eq!(entries(&request_dir), 1);
        assert_eq!(orch.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_compile_failure_cleans_up() {
        let temp = TempDir::new().unwrap();
        let tools = FakeTools::new(1, 0);
        let orch = orchestrator(&temp, tools.clone());

        let err = orch.submit("Hello", &NoopProgress).await.unwrap_err();
        match err {
            PipelineError::Compile {
                exit_code,
                diagnostics,
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(diagnostics, "error: unexpected token");
            }
            other => panic!("expected compile error, got {other:?}"),
        }
        assert_eq!(entries(temp.path()), 0);
        // Rasterizer never ran
        assert_eq!(*tools.calls.lock().unwrap(), vec!["typst".to_string()]);
    }

    #[tokio::test]
    async fn test_validation_runs_no_tools() {
        let temp = TempDir::new().unwrap();
        let tools = FakeTools::new(0, 0);
        let orch = orchestrator(&temp, tools.clone());

        let err = orch.submit("   ", &NoopProgress).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        assert!(tools.calls.lock().unwrap().is_empty());
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let tools = FakeTools::new(0, 0);
        let orch = orchestrator(&temp, tools.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch
            .run(ConversionRequest::new("Hello"), &NoopProgress, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(tools.calls.lock().unwrap().is_empty());
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_startup_reports_versions() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, FakeTools::new(0, 0));

        let versions = orch.startup().await.unwrap();
        assert_eq!(versions.compiler, "typst 1.0");
        assert_eq!(versions.rasterizer, "convert 1.0");
    }
}
