//! Provisioning stage: idempotent ensure-resource against the cloud gateway.

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::MigrationError;
use crate::execution::CancelToken;
use crate::gateway::{CloudGateway, ObjectUpload};
use crate::runner::{gateway_call, with_retry, RetryPolicy};
use siteferry_types::plan::MigrationPlan;
use siteferry_types::resource::{ResourceHandle, ResourceKind};

/// Result of one provisioning pass.
///
/// Handles for resources that did get created (or were found to exist) are
/// always returned, even when a sibling failed: the coordinator persists
/// them before failing the stage, so the next attempt reuses instead of
/// recreating.
pub struct ProvisionOutcome {
    pub handles: Vec<ResourceHandle>,
    pub uploaded_objects: u64,
    /// Highest attempt count any single operation consumed.
    pub max_attempts_used: u32,
    pub first_error: Option<MigrationError>,
    /// A cancellation checkpoint fired before all sub-steps ran.
    pub interrupted: bool,
}

/// Ensure one resource: reuse a still-resolving recorded handle, otherwise
/// call the gateway's idempotent ensure operation under retry.
///
/// Returns the handle and the attempts consumed.
async fn ensure_resource<F>(
    kind: ResourceKind,
    existing: Option<ResourceHandle>,
    cloud: Arc<dyn CloudGateway>,
    policy: RetryPolicy,
    ensure: F,
) -> Result<(ResourceHandle, u32), (MigrationError, u32)>
where
    F: Fn(Arc<dyn CloudGateway>) -> Result<ResourceHandle, siteferry_types::error::GatewayError>
        + Clone
        + Send
        + Sync
        + 'static,
{
    if let Some(handle) = existing {
        let cloud_for_check = cloud.clone();
        let handle_for_check = handle.clone();
        let op = format!("resolve {kind}");
        let check = with_retry(&policy, &op, move || {
            let cloud = cloud_for_check.clone();
            let handle = handle_for_check.clone();
            async move { gateway_call(move || cloud.resolve(&handle)).await }
        })
        .await;
        match check {
            Ok((true, attempts)) => {
                tracing::info!(kind = %kind, external_id = handle.external_id, "Reusing recorded resource");
                return Ok((handle, attempts));
            }
            Ok((false, _)) => {
                tracing::warn!(kind = %kind, external_id = handle.external_id, "Recorded resource no longer resolves, re-ensuring");
            }
            Err((err, attempts)) => return Err((err, attempts)),
        }
    }

    let op = format!("ensure {kind}");
    with_retry(&policy, &op, move || {
        let cloud = cloud.clone();
        let ensure = ensure.clone();
        async move { gateway_call(move || ensure(cloud)).await }
    })
    .await
}

/// Run the provisioning stage: compute and storage concurrently, then the
/// DNS record (it points at the compute endpoint), then the bundle upload
/// into the bucket.
pub async fn run_provision(
    plan: &MigrationPlan,
    existing: &[ResourceHandle],
    objects: Vec<ObjectUpload>,
    cloud: &Arc<dyn CloudGateway>,
    policy: RetryPolicy,
    cancel: &CancelToken,
) -> ProvisionOutcome {
    let mut outcome = ProvisionOutcome {
        handles: Vec::new(),
        uploaded_objects: 0,
        max_attempts_used: 0,
        first_error: None,
        interrupted: false,
    };

    let existing_of = |kind: ResourceKind| existing.iter().find(|r| r.kind == kind).cloned();

    // Compute and storage are independent; provision them concurrently.
    let mut join_set: JoinSet<Result<(ResourceHandle, u32), (MigrationError, u32)>> =
        JoinSet::new();

    let compute_spec = plan.compute.clone();
    join_set.spawn(ensure_resource(
        ResourceKind::Compute,
        existing_of(ResourceKind::Compute),
        cloud.clone(),
        policy,
        move |cloud| cloud.ensure_compute(&compute_spec),
    ));

    let storage_spec = plan.storage.clone();
    join_set.spawn(ensure_resource(
        ResourceKind::Storage,
        existing_of(ResourceKind::Storage),
        cloud.clone(),
        policy,
        move |cloud| cloud.ensure_storage(&storage_spec),
    ));

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok((handle, attempts))) => {
                outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                outcome.handles.push(handle);
            }
            Ok(Err((err, attempts))) => {
                outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                tracing::error!("Resource provisioning failed: {err}");
                if outcome.first_error.is_none() {
                    outcome.first_error = Some(err);
                }
            }
            Err(join_err) => {
                if outcome.first_error.is_none() {
                    outcome.first_error = Some(MigrationError::Infrastructure(anyhow::anyhow!(
                        "Provisioning task panicked: {join_err}"
                    )));
                }
            }
        }
    }

    let compute = outcome
        .handles
        .iter()
        .find(|h| h.kind == ResourceKind::Compute)
        .cloned();
    let storage = outcome
        .handles
        .iter()
        .find(|h| h.kind == ResourceKind::Storage)
        .cloned();

    // DNS needs the compute endpoint to point at.
    if let (Some(dns_spec), Some(compute)) = (plan.dns.clone(), compute) {
        if cancel.is_cancelled() {
            tracing::warn!("Cancellation requested, skipping DNS provisioning");
            outcome.interrupted = true;
        } else {
            let endpoint = compute.endpoint.clone();
            let result = ensure_resource(
                ResourceKind::Dns,
                existing_of(ResourceKind::Dns),
                cloud.clone(),
                policy,
                move |cloud| cloud.ensure_dns(&dns_spec, &endpoint),
            )
            .await;
            match result {
                Ok((handle, attempts)) => {
                    outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                    outcome.handles.push(handle);
                }
                Err((err, attempts)) => {
                    outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                    tracing::error!("DNS provisioning failed: {err}");
                    if outcome.first_error.is_none() {
                        outcome.first_error = Some(err);
                    }
                }
            }
        }
    }

    // Bundle upload into the bucket, so the configure stage can sync from it.
    if let Some(storage) = storage {
        if cancel.is_cancelled() {
            tracing::warn!("Cancellation requested, skipping bundle upload");
            outcome.interrupted = true;
        } else if !objects.is_empty() {
            let count = objects.len();
            let cloud_for_upload = cloud.clone();
            let objects = Arc::new(objects);
            let storage_for_upload = storage.clone();
            let result = with_retry(&policy, "upload bundle objects", move || {
                let cloud = cloud_for_upload.clone();
                let storage = storage_for_upload.clone();
                let objects = objects.clone();
                async move { gateway_call(move || cloud.put_objects(&storage, &objects)).await }
            })
            .await;
            match result {
                Ok((uploaded, attempts)) => {
                    outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                    outcome.uploaded_objects = uploaded;
                    tracing::info!(uploaded, bucket = storage.external_id, "Bundle uploaded");
                }
                Err((err, attempts)) => {
                    outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                    tracing::error!(count, "Bundle upload failed: {err}");
                    if outcome.first_error.is_none() {
                        outcome.first_error = Some(err);
                    }
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteferry_types::error::GatewayError;
    use siteferry_types::plan::{
        ComputeSpec, DnsSpec, FormRouting, FunctionSpec, ProcessingOptions, SourceRef, StorageSpec,
        TargetImage,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn plan() -> MigrationPlan {
        MigrationPlan {
            name: "demo".into(),
            source: SourceRef {
                base_url: "https://demo.example".into(),
                project_id: None,
            },
            compute: ComputeSpec {
                name: "demo-web".into(),
                machine_type: "e2-small".into(),
                disk_gb: 10,
                image: TargetImage::DebianFamily,
            },
            storage: StorageSpec {
                bucket: "demo-content".into(),
                location: "us-central1".into(),
            },
            dns: Some(DnsSpec {
                zone: "demo-zone".into(),
                domain: "demo.example".into(),
            }),
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

    #[derive(Default)]
    struct CountingCloud {
        creates: AtomicU32,
        resolves: AtomicU32,
        uploads: AtomicU32,
        fail_storage: bool,
    }

    impl CountingCloud {
        fn handle(kind: ResourceKind, id: &str, endpoint: &str) -> ResourceHandle {
            ResourceHandle {
                kind,
                external_id: id.into(),
                endpoint: endpoint.into(),
                created_at: "2026-08-01T00:00:00Z".into(),
            }
        }
    }

    impl CloudGateway for CountingCloud {
        fn check(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        fn ensure_compute(&self, spec: &ComputeSpec) -> Result<ResourceHandle, GatewayError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(Self::handle(ResourceKind::Compute, &spec.name, "203.0.113.9"))
        }

        fn ensure_storage(&self, spec: &StorageSpec) -> Result<ResourceHandle, GatewayError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_storage {
                return Err(GatewayError::quota("QUOTA", "bucket quota exceeded"));
            }
            Ok(Self::handle(
                ResourceKind::Storage,
                &spec.bucket,
                &format!("gs://{}", spec.bucket),
            ))
        }

        fn ensure_dns(
            &self,
            spec: &DnsSpec,
            target: &str,
        ) -> Result<ResourceHandle, GatewayError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            assert!(!target.is_empty());
            Ok(Self::handle(ResourceKind::Dns, &spec.zone, &spec.domain))
        }

        fn ensure_function(
            &self,
            spec: &FunctionSpec,
            _routing: &FormRouting,
        ) -> Result<ResourceHandle, GatewayError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(Self::handle(ResourceKind::Function, &spec.name, "https://fn.invalid"))
        }

        fn resolve(&self, _handle: &ResourceHandle) -> Result<bool, GatewayError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn put_objects(
            &self,
            _storage: &ResourceHandle,
            objects: &[ObjectUpload],
        ) -> Result<u64, GatewayError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(objects.len() as u64)
        }
    }

    fn objects() -> Vec<ObjectUpload> {
        vec![ObjectUpload {
            path: "index.html".into(),
            bytes: b"<html></html>".to_vec(),
        }]
    }

    #[tokio::test]
    async fn provisions_compute_storage_dns_and_uploads() {
        let cloud_impl = Arc::new(CountingCloud::default());
        let cloud: Arc<dyn CloudGateway> = cloud_impl.clone();

        let outcome = run_provision(
            &plan(),
            &[],
            objects(),
            &cloud,
            RetryPolicy::default(),
            &CancelToken::new(),
        )
        .await;

        assert!(outcome.first_error.is_none());
        assert_eq!(outcome.handles.len(), 3);
        assert_eq!(outcome.uploaded_objects, 1);
        assert_eq!(cloud_impl.creates.load(Ordering::SeqCst), 3);
        assert_eq!(cloud_impl.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_pass_reuses_recorded_handles() {
        let cloud_impl = Arc::new(CountingCloud::default());
        let cloud: Arc<dyn CloudGateway> = cloud_impl.clone();
        let plan = plan();

        let first = run_provision(
            &plan,
            &[],
            objects(),
            &cloud,
            RetryPolicy::default(),
            &CancelToken::new(),
        )
        .await;
        assert_eq!(cloud_impl.creates.load(Ordering::SeqCst), 3);

        let second = run_provision(
            &plan,
            &first.handles,
            objects(),
            &cloud,
            RetryPolicy::default(),
            &CancelToken::new(),
        )
        .await;

        // Only existence checks on the second pass, one per recorded kind.
        assert!(second.first_error.is_none());
        assert_eq!(cloud_impl.creates.load(Ordering::SeqCst), 3);
        assert_eq!(cloud_impl.resolves.load(Ordering::SeqCst), 3);
        assert_eq!(second.handles.len(), 3);
    }

    #[tokio::test]
    async fn storage_failure_keeps_sibling_handles() {
        let cloud_impl = Arc::new(CountingCloud {
            fail_storage: true,
            ..CountingCloud::default()
        });
        let cloud: Arc<dyn CloudGateway> = cloud_impl.clone();

        let outcome = run_provision(
            &plan(),
            &[],
            objects(),
            &cloud,
            RetryPolicy::default(),
            &CancelToken::new(),
        )
        .await;

        let err = outcome.first_error.unwrap();
        assert!(err.is_fatal());
        // Compute succeeded and its handle survives for the resume.
        assert!(outcome
            .handles
            .iter()
            .any(|h| h.kind == ResourceKind::Compute));
        // No upload without a bucket.
        assert_eq!(cloud_impl.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.uploaded_objects, 0);
    }
}
