use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;

use super::{build_env, execution_options, finish};
use siteferry_types::job::JobId;

/// Execute the `resume` command: retry a failed or cancelled job from its
/// first incomplete stage.
pub async fn execute(config_path: &Path, job: &str) -> Result<ExitCode> {
    let env = build_env(config_path)?;
    let job_id = JobId::new(job);

    let start = Instant::now();
    let exec = execution_options(None);
    let job = env
        .coordinator
        .resume(&job_id, &exec)
        .await
        .map_err(|e| anyhow::anyhow!("resume failed: {e}"))?;
    Ok(finish(&job, start.elapsed().as_secs_f64()))
}
