use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use super::EXIT_VALIDATION_FAILED;
use siteferry_engine::config::{parser, validator};

/// Execute the `validate` command: semantic config validation plus, unless
/// `dry_run`, connectivity checks against the content and cloud gateways.
pub async fn execute(config_path: &Path, dry_run: bool) -> Result<ExitCode> {
    let config = match parser::parse_config(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration invalid: {e:#}");
            return Ok(ExitCode::from(EXIT_VALIDATION_FAILED));
        }
    };

    if let Err(e) = validator::validate_config(&config) {
        eprintln!("configuration invalid: {e}");
        return Ok(ExitCode::from(EXIT_VALIDATION_FAILED));
    }
    println!("configuration ok: {}", config.name);

    if dry_run {
        println!("connectivity checks skipped (dry run)");
        return Ok(ExitCode::SUCCESS);
    }

    let gateways = match siteferry_gateways::build_gateways(&config) {
        Ok(gateways) => gateways,
        Err(e) => {
            eprintln!("gateway setup failed: {e}");
            return Ok(ExitCode::from(EXIT_VALIDATION_FAILED));
        }
    };

    let mut failed = false;
    let content = gateways.content.clone();
    match tokio::task::spawn_blocking(move || content.check()).await {
        Ok(Ok(())) => println!("source reachable: {}", config.source.base_url),
        Ok(Err(e)) => {
            eprintln!("source check failed: {e}");
            failed = true;
        }
        Err(e) => anyhow::bail!("source check panicked: {e}"),
    }

    let cloud = gateways.cloud.clone();
    match tokio::task::spawn_blocking(move || cloud.check()).await {
        Ok(Ok(())) => println!("cloud credentials ok: {}", config.cloud.project_id),
        Ok(Err(e)) => {
            eprintln!("cloud check failed: {e}");
            failed = true;
        }
        Err(e) => anyhow::bail!("cloud check panicked: {e}"),
    }

    Ok(if failed {
        ExitCode::from(EXIT_VALIDATION_FAILED)
    } else {
        ExitCode::SUCCESS
    })
}
