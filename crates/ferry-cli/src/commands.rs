//! Subcommands and their handlers.
//!
//! Every handler returns the process exit code; unexpected failures bubble
//! up as `anyhow` errors and exit with 1.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use ferry_core::app::{
    CleanupPolicy, EngineBuilder, FailurePolicy, PromotionRequest, RoutePolicy, RunReport,
};
use ferry_core::config::EngineConfig;
use ferry_core::domain::{
    AppName, EnvironmentName, PipelineError, PipelineSpec, RevisionId, TaskRunState,
};
use ferry_core::identity::RevisionResolver;
use ferry_core::impls::{ClusterState, DirectorySource, InMemoryPlatform, InMemoryRegistry};
use ferry_core::ports::DeploymentPlatform;
use tracing::info;

use crate::state::StateFile;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_DEFINITION: u8 = 2;
pub const EXIT_PRECONDITION: u8 = 3;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline definition
    Run {
        /// Path to the pipeline definition (JSON)
        pipeline: PathBuf,

        /// Pipeline parameters as key=value pairs
        #[arg(short, long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Source tree hashed by resolve-revision tasks
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Maximum number of task bodies running at once
        #[arg(long, env = "FERRY_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// What happens after a task failed (stop, continue)
        #[arg(long, env = "FERRY_FAILURE_POLICY")]
        failure_policy: Option<FailurePolicy>,

        /// Fail tasks running longer than this many seconds
        #[arg(long, env = "FERRY_TASK_TIMEOUT_SECS")]
        timeout: Option<u64>,

        /// Print the run report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Promote a built revision from one environment to another
    Promote {
        #[arg(long)]
        app: AppName,

        #[arg(long)]
        revision: RevisionId,

        /// Source environment
        #[arg(long = "from")]
        source: EnvironmentName,

        /// Target environment
        #[arg(long = "to")]
        target: EnvironmentName,

        /// Handling of failed cleanup (strict, best-effort)
        #[arg(long, env = "FERRY_CLEANUP_POLICY")]
        cleanup: Option<CleanupPolicy>,

        /// Handling of the existing route (preserve, recreate)
        #[arg(long, env = "FERRY_ROUTE_POLICY")]
        route: Option<RoutePolicy>,
    },
    /// Print the inferred task graph as a Mermaid flowchart
    Graph {
        /// Path to the pipeline definition (JSON)
        pipeline: PathBuf,
    },
    /// Print the revision id of a source tree
    Revision {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Show live deployments
    Status {
        /// Only this environment
        #[arg(long)]
        env: Option<EnvironmentName>,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

pub async fn handle_command(
    command: Commands,
    state: &StateFile,
    mut config: EngineConfig,
    out: &mut impl Write,
) -> Result<u8> {
    match command {
        Commands::Run {
            pipeline,
            params,
            source,
            max_parallel,
            failure_policy,
            timeout,
            json,
        } => {
            if let Some(max_parallel) = max_parallel {
                config.max_parallel = Some(max_parallel);
            }
            if let Some(failure_policy) = failure_policy {
                config.failure_policy = failure_policy;
            }
            if let Some(secs) = timeout {
                config.task_timeout = Some(Duration::from_secs(secs));
            }
            config.validate()?;
            let params = params.into_iter().collect();
            run(&pipeline, &params, &source, state, config, json, out).await
        }
        Commands::Promote {
            app,
            revision,
            source,
            target,
            cleanup,
            route,
        } => {
            if let Some(cleanup) = cleanup {
                config.cleanup_policy = cleanup;
            }
            if let Some(route) = route {
                config.route_policy = route;
            }
            let request = PromotionRequest {
                app,
                revision,
                source,
                target,
            };
            promote(request, state, config, out).await
        }
        Commands::Graph { pipeline } => graph(&pipeline, config, out),
        Commands::Revision { dir } => revision(&dir, state, &config, out).await,
        Commands::Status { env } => status(state, env.as_ref(), out).await,
    }
}

fn load_pipeline(path: &Path) -> Result<PipelineSpec> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading pipeline {}", path.display()))?;
    PipelineSpec::from_json(&json).with_context(|| format!("parsing pipeline {}", path.display()))
}

fn source_for(dir: &Path, state: &StateFile, config: &EngineConfig) -> DirectorySource {
    DirectorySource::new(dir)
        .ignoring(config.ignored_dirs.iter().cloned())
        .excluding(state.files())
}

async fn run(
    pipeline: &Path,
    params: &BTreeMap<String, String>,
    source: &Path,
    state: &StateFile,
    config: EngineConfig,
    json: bool,
    out: &mut impl Write,
) -> Result<u8> {
    let spec = load_pipeline(pipeline)?;
    let lock = state.lock()?;
    let (registry, platform) = state.load()?.into_parts();
    let registry = Arc::new(registry);
    let platform = Arc::new(platform);

    let engine = EngineBuilder::new(config.clone())
        .with_source(Arc::new(source_for(source, state, &config)))
        .with_images(registry.clone(), registry.clone())
        .with_platform(platform.clone())
        .build()?;

    let result = engine.runner().run(&spec, params).await;
    state.save(&ClusterState::capture(&registry, &platform), &lock)?;

    let report = match result {
        Ok(report) => report,
        Err(PipelineError::Definition(e)) => {
            writeln!(out, "invalid pipeline: {e}")?;
            return Ok(EXIT_DEFINITION);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        print_report(&report, out)?;
    }

    Ok(if report.succeeded() { EXIT_OK } else { EXIT_FAILED })
}

fn print_report(report: &RunReport, out: &mut impl Write) -> Result<()> {
    writeln!(out, "run {} of {}", report.run_id, report.pipeline)?;
    for record in &report.tasks {
        let suffix = if record.finally { " (finally)" } else { "" };
        match (&record.state, &record.skip_reason, &record.error) {
            (TaskRunState::Skipped, Some(reason), _) => {
                writeln!(out, "  {:<24} skipped: {reason}{suffix}", record.task)?
            }
            (TaskRunState::Failed, _, Some(error)) => {
                writeln!(out, "  {:<24} failed: {error}{suffix}", record.task)?
            }
            (state, _, _) => writeln!(out, "  {:<24} {state}{suffix}", record.task)?,
        }
        for line in &record.log {
            writeln!(out, "      {line}")?;
        }
    }
    for (task, revision) in report.revisions() {
        writeln!(out, "revision {revision} (from {task})")?;
    }
    match &report.failed_task {
        Some(task) => writeln!(out, "FAILED: task '{task}' failed")?,
        None => writeln!(out, "SUCCEEDED")?,
    }
    Ok(())
}

async fn promote(
    request: PromotionRequest,
    state: &StateFile,
    config: EngineConfig,
    out: &mut impl Write,
) -> Result<u8> {
    let lock = state.lock()?;
    let (registry, platform) = state.load()?.into_parts();
    let registry = Arc::new(registry);
    let platform = Arc::new(platform);

    let engine = EngineBuilder::new(config)
        .with_images(registry.clone(), registry.clone())
        .with_platform(platform.clone())
        .build()?;
    let promoter = engine
        .promoter()
        .ok_or_else(|| anyhow!("promotion needs a registry and a platform"))?;

    let result = promoter.promote(request).await;
    // partial cleanup must not be forgotten
    state.save(&ClusterState::capture(&registry, &platform), &lock)?;

    match result {
        Ok(report) => {
            writeln!(out, "promoted {} ({})", report.image, report.id)?;
            if let Some(previous) = &report.replaced {
                writeln!(out, "  replaced revision {previous}")?;
            }
            if report.route_created {
                writeln!(out, "  route created")?;
            }
            for warning in &report.cleanup_warnings {
                writeln!(out, "  warning: {warning}")?;
            }
            Ok(EXIT_OK)
        }
        Err(e) if e.is_precondition() => {
            writeln!(out, "precondition failed: {e}")?;
            Ok(EXIT_PRECONDITION)
        }
        Err(e) => {
            writeln!(out, "promotion failed: {e}")?;
            Ok(EXIT_FAILED)
        }
    }
}

fn graph(pipeline: &Path, config: EngineConfig, out: &mut impl Write) -> Result<u8> {
    let spec = load_pipeline(pipeline)?;
    // every built-in kind must be known for validation; nothing runs
    let registry = Arc::new(InMemoryRegistry::new());
    let engine = EngineBuilder::new(config)
        .with_source(Arc::new(DirectorySource::new(".")))
        .with_images(registry.clone(), registry)
        .with_platform(Arc::new(InMemoryPlatform::new()))
        .build()?;

    match engine.runner().graph(&spec) {
        Ok(graph) => {
            write!(out, "{graph}")?;
            Ok(EXIT_OK)
        }
        Err(e) => {
            writeln!(out, "invalid pipeline: {e}")?;
            Ok(EXIT_DEFINITION)
        }
    }
}

async fn revision(
    dir: &Path,
    state: &StateFile,
    config: &EngineConfig,
    out: &mut impl Write,
) -> Result<u8> {
    let resolver = RevisionResolver::new(config.revision_length);
    let revision = resolver
        .resolve(&source_for(dir, state, config))
        .await
        .with_context(|| format!("resolving revision of {}", dir.display()))?;
    info!(%revision, dir = %dir.display(), "resolved");
    writeln!(out, "{revision}")?;
    Ok(EXIT_OK)
}

async fn status(state: &StateFile, env: Option<&EnvironmentName>, out: &mut impl Write) -> Result<u8> {
    let (registry, platform) = state.load()?.into_parts();
    let slots = platform.slots(env).await?;
    if slots.is_empty() {
        writeln!(out, "no deployments")?;
    }
    for slot in slots {
        let live = match &slot.deployment {
            Some(deployment) if deployment.rolled_out => deployment.image.to_string(),
            Some(deployment) => format!("{} (not rolled out)", deployment.image),
            None => "-".to_string(),
        };
        let route = slot
            .route
            .as_ref()
            .map(|route| route.host.clone())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{:<16} {:<12} {:<40} {route}",
            slot.app, slot.environment, live
        )?;
    }
    writeln!(out, "{} image(s) in registry", registry.images().len())?;
    Ok(EXIT_OK)
}
