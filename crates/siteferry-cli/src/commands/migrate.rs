use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;

use super::{build_env, execution_options, finish, EXIT_VALIDATION_FAILED};

/// Execute the `migrate` command: the full pipeline, end to end.
pub async fn execute(config_path: &Path, dry_run: bool) -> Result<ExitCode> {
    let env = match build_env(config_path) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(ExitCode::from(EXIT_VALIDATION_FAILED));
        }
    };
    let plan = env.config.to_plan(dry_run);

    tracing::info!(
        plan = plan.name,
        source = plan.source.base_url,
        dry_run,
        "Migration starting"
    );

    let start = Instant::now();
    let exec = execution_options(None);
    let job = env
        .coordinator
        .run(plan, &exec)
        .await
        .map_err(|e| anyhow::anyhow!("migration run failed: {e}"))?;
    Ok(finish(&job, start.elapsed().as_secs_f64()))
}
