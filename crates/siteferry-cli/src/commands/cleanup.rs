use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use super::build_env;
use siteferry_state::JobStore;
use siteferry_types::job::JobId;

/// Execute the `cleanup` command: delete a stored job checkpoint. This is
/// the only operation that removes job state; the pipeline itself never
/// does.
pub async fn execute(config_path: &Path, job: &str) -> Result<ExitCode> {
    let env = build_env(config_path)?;
    let job_id = JobId::new(job);

    let existed = env
        .store
        .delete(&job_id)
        .context("Failed to delete job checkpoint")?;
    if existed {
        println!("deleted job {job}");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("no stored job named '{job}'");
        Ok(ExitCode::FAILURE)
    }
}
