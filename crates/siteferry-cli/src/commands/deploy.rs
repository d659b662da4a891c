use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Result};

use super::{build_env, execution_options, finish, latest_job_for, EXIT_VALIDATION_FAILED};
use siteferry_types::job::JobId;

/// Execute the `deploy` command: continue a previously extracted job
/// through transformation, provisioning, configuration, and finalization.
pub async fn execute(config_path: &Path, job: Option<&str>) -> Result<ExitCode> {
    let env = match build_env(config_path) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(ExitCode::from(EXIT_VALIDATION_FAILED));
        }
    };

    let job_id = match job {
        Some(id) => JobId::new(id),
        None => match latest_job_for(env.store.as_ref(), &env.config.name)? {
            Some(id) => id,
            None => bail!(
                "no stored job for plan '{}'; run `siteferry extract` or `siteferry migrate` first",
                env.config.name
            ),
        },
    };

    tracing::info!(job = job_id.as_str(), "Continuing stored job");
    let start = Instant::now();
    let exec = execution_options(None);
    let job = env
        .coordinator
        .resume(&job_id, &exec)
        .await
        .map_err(|e| anyhow::anyhow!("deploy failed: {e}"))?;
    Ok(finish(&job, start.elapsed().as_secs_f64()))
}
