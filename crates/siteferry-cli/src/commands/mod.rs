pub mod cleanup;
pub mod deploy;
pub mod extract;
pub mod migrate;
pub mod resume;
pub mod validate;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};

use siteferry_engine::cache::ContentCache;
use siteferry_engine::config::types::MigrationConfig;
use siteferry_engine::config::{parser, validator};
use siteferry_engine::coordinator::{Coordinator, CoordinatorOptions};
use siteferry_engine::execution::{CancelToken, ExecutionOptions};
use siteferry_engine::report::MigrationReport;
use siteferry_engine::runner::RetryPolicy;
use siteferry_state::{FileJobStore, JobStore};
use siteferry_types::job::{JobId, JobState, JobStatus, StageName};

/// Validation failures (exit 2) are distinct from pipeline failures.
pub const EXIT_VALIDATION_FAILED: u8 = 2;
/// The pipeline failed but the job can be resumed after a fix.
pub const EXIT_PIPELINE_RESUMABLE: u8 = 3;
/// The pipeline failed fatally (credentials, quota, or an internal bug).
pub const EXIT_PIPELINE_FATAL: u8 = 4;

/// Everything a command needs: parsed config, job store, coordinator.
pub struct Env {
    pub config: MigrationConfig,
    pub store: Arc<FileJobStore>,
    pub coordinator: Coordinator,
}

/// Where job checkpoints live under the state directory.
fn jobs_dir(config: &MigrationConfig) -> PathBuf {
    Path::new(&config.state.dir).join("jobs")
}

/// Load config, validate it, and wire the coordinator.
pub fn build_env(config_path: &Path) -> Result<Env> {
    let config = parser::parse_config(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    validator::validate_config(&config)?;

    let store = Arc::new(
        FileJobStore::open(&jobs_dir(&config)).context("Failed to open job store")?,
    );
    let cache = Arc::new(
        ContentCache::open(&Path::new(&config.state.dir).join("cache"))
            .context("Failed to open content cache")?,
    );
    let gateways = siteferry_gateways::build_gateways(&config)
        .map_err(|e| anyhow::anyhow!("Failed to build gateways: {e}"))?;

    let coordinator = Coordinator::new(
        store.clone() as Arc<dyn JobStore>,
        cache,
        gateways,
        CoordinatorOptions {
            policy: RetryPolicy::with_max_attempts(config.resources.max_attempts),
            fetch_concurrency: config.resources.fetch_concurrency,
            command_timeout: std::time::Duration::from_secs(
                config.resources.command_timeout_seconds,
            ),
        },
    );

    Ok(Env {
        config,
        store,
        coordinator,
    })
}

/// Execution options with Ctrl-C wired to cooperative cancellation.
pub fn execution_options(run_until: Option<StageName>) -> ExecutionOptions {
    let cancel = CancelToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing the in-flight step, then stopping");
            cancel_for_signal.cancel();
        }
    });
    ExecutionOptions { run_until, cancel }
}

/// Print the run summary and map the job outcome to an exit code.
pub fn finish(job: &JobState, duration_secs: f64) -> ExitCode {
    let report = MigrationReport::from_job(job, duration_secs);

    println!("Job {} — {}", report.job_id, report.status);
    for stage in &report.stages {
        let attempts = if stage.attempts > 1 {
            format!(" ({} attempts)", stage.attempts)
        } else {
            String::new()
        };
        match &stage.error {
            Some(error) => println!("  {:<14} {}{}: {}", stage.name, stage.status, attempts, error),
            None => println!("  {:<14} {}{}", stage.name, stage.status, attempts),
        }
    }
    println!("  Assets:        {}", report.assets);
    println!("  Bundle files:  {}", report.bundle_files);
    for resource in &report.resources {
        println!("  {:<14} {} ({})", resource.kind.to_string(), resource.endpoint, resource.external_id);
    }
    if let Some(url) = &report.site_url {
        println!("  Site:          {url}");
    }
    println!("  Duration:      {duration_secs:.2}s");

    // Machine-readable summary for wrapping tooling.
    if let Ok(json) = serde_json::to_string(&report) {
        println!("@@REPORT_JSON@@{json}");
    }

    match exit_code_for(job) {
        0 => ExitCode::SUCCESS,
        EXIT_PIPELINE_FATAL => {
            eprintln!("failed fatally; fix the underlying condition before retrying");
            ExitCode::from(EXIT_PIPELINE_FATAL)
        }
        code => {
            eprintln!("resume with: siteferry resume {}", report.job_id);
            ExitCode::from(code)
        }
    }
}

/// Map a finished job to the process exit code.
///
/// 0 = success (including a deliberate early stop), 3 = failed or cancelled
/// but resumable, 4 = failed fatally (credentials, quota, internal bug).
pub fn exit_code_for(job: &JobState) -> u8 {
    match job.status {
        JobStatus::Succeeded | JobStatus::Running => 0,
        JobStatus::Cancelled => EXIT_PIPELINE_RESUMABLE,
        JobStatus::Failed => {
            if job.stages.iter().any(|s| s.fatal) {
                EXIT_PIPELINE_FATAL
            } else {
                EXIT_PIPELINE_RESUMABLE
            }
        }
    }
}

/// Most recent stored job for the given plan name.
pub fn latest_job_for(store: &dyn JobStore, plan_name: &str) -> Result<Option<JobId>> {
    let prefix = format!("{plan_name}-");
    let ids = store.list().context("Failed to list jobs")?;
    Ok(ids
        .into_iter()
        .filter(|id| id.as_str().starts_with(&prefix))
        .next_back())
}
