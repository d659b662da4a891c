use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;

use super::{build_env, execution_options, finish, EXIT_VALIDATION_FAILED};
use siteferry_types::job::StageName;

/// Execute the `extract` command: run the pipeline up to and including
/// extraction, leaving a resumable checkpoint for a later `deploy`.
pub async fn execute(config_path: &Path, dry_run: bool) -> Result<ExitCode> {
    let env = match build_env(config_path) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(ExitCode::from(EXIT_VALIDATION_FAILED));
        }
    };
    let plan = env.config.to_plan(dry_run);

    let start = Instant::now();
    let exec = execution_options(Some(StageName::Extract));
    let job = env
        .coordinator
        .run(plan, &exec)
        .await
        .map_err(|e| anyhow::anyhow!("extraction run failed: {e}"))?;

    tracing::info!(
        job = job.job_id.as_str(),
        assets = job.assets.len(),
        "Extraction finished; continue with: siteferry deploy"
    );
    Ok(finish(&job, start.elapsed().as_secs_f64()))
}
