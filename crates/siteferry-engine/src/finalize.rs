//! Finalization stage: synthetic reachability checks against the deployed
//! endpoints.
//!
//! Connection-level probe failures retry per policy (the service may still
//! be settling); an unhealthy response, or retry exhaustion, is a permanent
//! health-check failure reported distinctly from earlier stages so an
//! operator knows the infrastructure exists but is not serving.

use std::sync::Arc;

use crate::error::MigrationError;
use crate::gateway::HealthProbe;
use crate::runner::{gateway_call, with_retry, RetryPolicy};
use siteferry_types::error::GatewayError;
use siteferry_types::plan::MigrationPlan;
use siteferry_types::resource::ResourceHandle;

/// Result of the finalization pass.
pub struct FinalizeOutcome {
    /// URL the migrated site answers on.
    pub site_url: String,
    pub form_url: String,
    pub max_attempts_used: u32,
    pub first_error: Option<MigrationError>,
}

/// Public URL for the deployed site: the DNS name when one is configured,
/// the compute endpoint otherwise.
#[must_use]
pub fn site_url(plan: &MigrationPlan, compute: &ResourceHandle) -> String {
    match &plan.dns {
        Some(dns) => format!("https://{}", dns.domain),
        None => format!("http://{}", compute.endpoint),
    }
}

async fn probe_healthy(
    probe: &Arc<dyn HealthProbe>,
    policy: RetryPolicy,
    what: &str,
    url: &str,
) -> Result<u32, (MigrationError, u32)> {
    let op = format!("probe {what}");
    let probe_for_call = probe.clone();
    let url_owned = url.to_string();
    let (status, attempts) = with_retry(&policy, &op, move || {
        let probe = probe_for_call.clone();
        let url = url_owned.clone();
        async move { gateway_call(move || probe.probe(&url)).await }
    })
    .await?;

    if (200..400).contains(&status) {
        tracing::info!(url, status, "Health check passed");
        Ok(attempts)
    } else {
        Err((
            MigrationError::Gateway(GatewayError::health_check(
                "UNHEALTHY_STATUS",
                format!("{what} at {url} answered HTTP {status}"),
            )),
            attempts,
        ))
    }
}

/// Probe the site endpoint and the form endpoint.
pub async fn run_finalize(
    plan: &MigrationPlan,
    compute: &ResourceHandle,
    probe: &Arc<dyn HealthProbe>,
    policy: RetryPolicy,
) -> FinalizeOutcome {
    let site = site_url(plan, compute);
    let form = format!(
        "{}{}",
        site.trim_end_matches('/'),
        plan.forms.endpoint_path
    );
    let mut outcome = FinalizeOutcome {
        site_url: site.clone(),
        form_url: form.clone(),
        max_attempts_used: 0,
        first_error: None,
    };

    match probe_healthy(probe, policy, "site endpoint", &site).await {
        Ok(attempts) => outcome.max_attempts_used = outcome.max_attempts_used.max(attempts),
        Err((err, attempts)) => {
            outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
            outcome.first_error = Some(err);
            return outcome;
        }
    }

    match probe_healthy(probe, policy, "form endpoint", &form).await {
        Ok(attempts) => outcome.max_attempts_used = outcome.max_attempts_used.max(attempts),
        Err((err, attempts)) => {
            outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
            outcome.first_error = Some(err);
        }
    }

    outcome
}
