//! Default command: build the targets of a build file.

use anyhow::{Context, Result};
use parabuild_config::load_build_file;
use parabuild_core::{Event, RunId};
use parabuild_executor::{ProcessLauncher, WorkerContext};
use parabuild_scheduler::{BuildOrchestrator, EventBus, Progress, RunSummary};
use std::io::IsTerminal;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

use crate::reporter::{self, ReporterKind};

pub struct BuildOptions {
    pub file: PathBuf,
    pub targets: Vec<String>,
    pub concurrency: Option<NonZeroUsize>,
    pub reporters: Vec<ReporterKind>,
}

/// Run a build, report it, and map the outcome to an exit code.
pub async fn run(options: BuildOptions) -> ExitCode {
    let bus = Arc::new(EventBus::new());
    let progress = Progress::new();
    bus.subscribe(progress.clone());

    let kinds = if options.reporters.is_empty() {
        vec![ReporterKind::detect()]
    } else {
        options.reporters.clone()
    };
    reporter::install(&bus, &kinds, &progress);

    match build(&options, bus.clone()).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                built = summary.built,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "Run finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            let event = fatal_event(&err);
            debug!(error = ?err, "Run failed");
            bus.publish(event);
            ExitCode::from(super::exit_code(&err))
        }
    }
}

async fn build(options: &BuildOptions, bus: Arc<EventBus>) -> Result<RunSummary> {
    let build_file = load_build_file(&options.file)
        .with_context(|| format!("Failed to load build file {}", options.file.display()))?;
    let tasks = build_file.tasks().context("Failed to prepare targets")?;

    let concurrency = options
        .concurrency
        .map(NonZeroUsize::get)
        .or(build_file.concurrency)
        .unwrap_or_else(default_concurrency);

    let run_id = RunId::new();
    let context = WorkerContext {
        run_id,
        base_dir: base_dir(&options.file)?,
    };
    let launcher = ProcessLauncher::current_exe(context)
        .context("Failed to locate the parabuild executable")?
        .with_force_color(std::io::stdout().is_terminal());

    let orchestrator = BuildOrchestrator::new(Arc::new(launcher), bus)
        .with_run_id(run_id)
        .with_concurrency(concurrency)
        .with_filter(options.targets.clone());

    Ok(orchestrator.run(tasks).await?)
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Directory containing the build file; target directories are relative to it.
fn base_dir(file: &Path) -> Result<PathBuf> {
    let parent = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    parent
        .canonicalize()
        .with_context(|| format!("Failed to resolve directory of {}", file.display()))
}

fn fatal_event(err: &anyhow::Error) -> Event {
    match err.downcast_ref::<parabuild_core::Error>() {
        Some(e) => Event::fatal(e),
        None => Event::Fatal {
            message: format!("{:#}", err),
            target: None,
            exit_code: super::exit_code(err),
        },
    }
}
