//! Form-handler deployment stage: ensure the serverless relay function.
//!
//! Structurally the same ensure-resource discipline as provisioning: reuse a
//! recorded handle that still resolves, otherwise create and record the
//! handle before the stage may succeed.

use std::sync::Arc;

use crate::error::MigrationError;
use crate::gateway::CloudGateway;
use crate::runner::{gateway_call, with_retry, RetryPolicy};
use siteferry_types::plan::MigrationPlan;
use siteferry_types::resource::{ResourceHandle, ResourceKind};

/// Result of one form-handler deployment pass.
pub struct DeployFormsOutcome {
    pub handle: Option<ResourceHandle>,
    pub max_attempts_used: u32,
    pub first_error: Option<MigrationError>,
}

/// Ensure the form relay function exists and is wired to the plan's
/// endpoint and notification address.
pub async fn run_deploy_forms(
    plan: &MigrationPlan,
    existing: &[ResourceHandle],
    cloud: &Arc<dyn CloudGateway>,
    policy: RetryPolicy,
) -> DeployFormsOutcome {
    if let Some(handle) = existing.iter().find(|r| r.kind == ResourceKind::Function) {
        let cloud_for_check = cloud.clone();
        let handle_for_check = handle.clone();
        let check = with_retry(&policy, "resolve function", move || {
            let cloud = cloud_for_check.clone();
            let handle = handle_for_check.clone();
            async move { gateway_call(move || cloud.resolve(&handle)).await }
        })
        .await;
        match check {
            Ok((true, attempts)) => {
                tracing::info!(
                    external_id = handle.external_id,
                    "Reusing recorded form handler function"
                );
                return DeployFormsOutcome {
                    handle: Some(handle.clone()),
                    max_attempts_used: attempts,
                    first_error: None,
                };
            }
            Ok((false, _)) => {
                tracing::warn!(
                    external_id = handle.external_id,
                    "Recorded function no longer resolves, re-ensuring"
                );
            }
            Err((err, attempts)) => {
                return DeployFormsOutcome {
                    handle: None,
                    max_attempts_used: attempts,
                    first_error: Some(err),
                };
            }
        }
    }

    let spec = plan.function.clone();
    let routing = plan.forms.clone();
    let cloud_for_ensure = cloud.clone();
    let result = with_retry(&policy, "ensure function", move || {
        let cloud = cloud_for_ensure.clone();
        let spec = spec.clone();
        let routing = routing.clone();
        async move { gateway_call(move || cloud.ensure_function(&spec, &routing)).await }
    })
    .await;

    match result {
        Ok((handle, attempts)) => {
            tracing::info!(
                external_id = handle.external_id,
                endpoint = handle.endpoint,
                "Form handler function deployed"
            );
            DeployFormsOutcome {
                handle: Some(handle),
                max_attempts_used: attempts,
                first_error: None,
            }
        }
        Err((err, attempts)) => DeployFormsOutcome {
            handle: None,
            max_attempts_used: attempts,
            first_error: Some(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SimulatedCloudGateway;
    use siteferry_types::plan::{
        ComputeSpec, FormRouting, FunctionSpec, ProcessingOptions, SourceRef, StorageSpec,
        TargetImage,
    };

    fn plan() -> MigrationPlan {
        MigrationPlan {
            name: "demo".into(),
            source: SourceRef {
                base_url: "https://demo.example".into(),
                project_id: None,
            },
            compute: ComputeSpec {
                name: "w".into(),
                machine_type: "e2-small".into(),
                disk_gb: 10,
                image: TargetImage::DebianFamily,
            },
            storage: StorageSpec {
                bucket: "b".into(),
                location: "us".into(),
            },
            dns: None,
            function: FunctionSpec {
                name: "demo-forms".into(),
                runtime: "python312".into(),
                region: "us-central1".into(),
            },
            forms: FormRouting {
                endpoint_path: "/api/forms".into(),
                notify_email: "x@demo.example".into(),
            },
            processing: ProcessingOptions::default(),
            host: siteferry_types::plan::HostOptions::default(),
            tls_email: None,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn deploys_function_handle() {
        let cloud: Arc<dyn CloudGateway> = Arc::new(SimulatedCloudGateway);
        let outcome = run_deploy_forms(&plan(), &[], &cloud, RetryPolicy::default()).await;
        let handle = outcome.handle.unwrap();
        assert_eq!(handle.kind, ResourceKind::Function);
        assert!(outcome.first_error.is_none());
    }

    #[tokio::test]
    async fn reuses_existing_function_handle() {
        let cloud: Arc<dyn CloudGateway> = Arc::new(SimulatedCloudGateway);
        let existing = ResourceHandle {
            kind: ResourceKind::Function,
            external_id: "fn-1".into(),
            endpoint: "https://fn.invalid".into(),
            created_at: "2026-08-01T00:00:00Z".into(),
        };
        let outcome =
            run_deploy_forms(&plan(), &[existing.clone()], &cloud, RetryPolicy::default()).await;
        assert_eq!(outcome.handle.unwrap(), existing);
    }
}
