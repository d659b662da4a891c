//! Pipeline coordinator: sequences stages, checkpoints job state, and
//! exposes run/resume.
//!
//! Stages execute in fixed declared order; a stage whose dependencies are
//! not all Succeeded or Skipped never starts, and a failed stage halts the
//! pipeline with the failure recorded in the checkpoint. Job state persists
//! after every status change, which is the resumability contract: a crash
//! between two stages loses at most the in-flight stage's partial attempt
//! count, never committed progress.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::ContentCache;
use crate::configure::run_configure;
use crate::error::MigrationError;
use crate::execution::ExecutionOptions;
use crate::extract::run_extract;
use crate::finalize::run_finalize;
use crate::forms::run_deploy_forms;
use crate::gateway::{Gateways, ObjectUpload};
use crate::provision::run_provision;
use crate::runner::RetryPolicy;
use crate::transform::{transform, LoadedAsset};
use siteferry_state::JobStore;
use siteferry_types::job::{JobId, JobState, JobStatus, StageName, StageStatus};
use siteferry_types::plan::MigrationPlan;
use siteferry_types::resource::ResourceKind;

/// Tuning knobs the coordinator carries for the stage implementations.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub policy: RetryPolicy,
    /// Bounded concurrency for asset fetches.
    pub fetch_concurrency: usize,
    /// Per-command timeout for remote configuration.
    pub command_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            fetch_concurrency: 6,
            command_timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of one stage body.
struct StageOutcome {
    attempts: u32,
    failure: Option<MigrationError>,
    /// The stage stopped at a cooperative cancellation checkpoint before
    /// finishing its work.
    interrupted: bool,
}

impl StageOutcome {
    fn done(attempts: u32) -> Self {
        Self {
            attempts,
            failure: None,
            interrupted: false,
        }
    }

    fn failed(attempts: u32, err: MigrationError) -> Self {
        Self {
            attempts,
            failure: Some(err),
            interrupted: false,
        }
    }
}

/// Drives migration jobs against a job store, a content cache, and the
/// gateway set.
pub struct Coordinator {
    store: Arc<dyn JobStore>,
    cache: Arc<ContentCache>,
    gateways: Gateways,
    options: CoordinatorOptions,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<ContentCache>,
        gateways: Gateways,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            store,
            cache,
            gateways,
            options,
        }
    }

    /// Start a new job for `plan` and drive it to completion, failure, or
    /// cancellation. The returned job state carries the outcome; `Err` is
    /// reserved for infrastructure problems (persistence, panics).
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Infrastructure`] when checkpointing fails.
    pub async fn run(
        &self,
        plan: MigrationPlan,
        exec: &ExecutionOptions,
    ) -> Result<JobState, MigrationError> {
        let now = chrono::Utc::now();
        let job_id = JobId::derive(&plan.name, &now.format("%Y%m%dT%H%M%SZ").to_string());
        tracing::info!(
            job = job_id.as_str(),
            plan = plan.name,
            dry_run = plan.dry_run,
            "Starting migration job"
        );
        let job = JobState::new(job_id, plan, now.to_rfc3339());
        self.persist(&job).await?;
        self.drive(job, exec).await
    }

    /// Load an existing job and continue from the first stage not yet
    /// Succeeded or Skipped. A Failed stage re-enters Running through the
    /// explicit retry-from-failure transition; completed stages never
    /// re-run.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Infrastructure`] when the job does not
    /// exist or checkpointing fails.
    pub async fn resume(
        &self,
        job_id: &JobId,
        exec: &ExecutionOptions,
    ) -> Result<JobState, MigrationError> {
        let store = self.store.clone();
        let id = job_id.clone();
        let job = tokio::task::spawn_blocking(move || store.load(&id))
            .await
            .map_err(|e| {
                MigrationError::Infrastructure(anyhow::anyhow!("load task panicked: {e}"))
            })?
            .map_err(|e| MigrationError::Infrastructure(e.into()))?
            .ok_or_else(|| {
                MigrationError::Infrastructure(anyhow::anyhow!(
                    "no job state found for '{}'",
                    job_id.as_str()
                ))
            })?;

        if job.status == JobStatus::Succeeded {
            tracing::info!(job = job_id.as_str(), "Job already succeeded, nothing to resume");
            return Ok(job);
        }

        tracing::info!(
            job = job_id.as_str(),
            next = job.next_stage().map(|s| s.to_string()),
            "Resuming migration job"
        );
        self.drive(job, exec).await
    }

    async fn drive(
        &self,
        mut job: JobState,
        exec: &ExecutionOptions,
    ) -> Result<JobState, MigrationError> {
        // Dry runs swap every collaborator for a no-op simulation; the
        // pipeline and retry machinery still execute in full.
        let gateways = if job.plan.dry_run {
            Gateways::simulated()
        } else {
            self.gateways.clone()
        };

        job.status = JobStatus::Running;
        self.persist(&job).await?;
        let started = Instant::now();

        for name in StageName::ordered() {
            let current = job.stage(name).status;
            if current.satisfies_dependency() {
                continue;
            }

            if exec.cancel.is_cancelled() {
                tracing::warn!(
                    job = job.job_id.as_str(),
                    stage = %name,
                    "Cancellation requested, not scheduling further stages"
                );
                job.status = JobStatus::Cancelled;
                self.persist(&job).await?;
                return Ok(job);
            }

            if !job.dependencies_satisfied(name) {
                // A dependency is unsatisfied; halt rather than run out of
                // order.
                break;
            }

            let via_retry = current == StageStatus::Failed;
            {
                let stage = job.stage_mut(name);
                stage
                    .transition(StageStatus::Running, via_retry)
                    .map_err(|e| MigrationError::Infrastructure(e.into()))?;
                stage.started_at = Some(chrono::Utc::now().to_rfc3339());
                stage.last_error = None;
                stage.fatal = false;
            }
            self.persist(&job).await?;
            tracing::info!(job = job.job_id.as_str(), stage = %name, "Stage running");

            let outcome = self.execute_stage(name, &mut job, &gateways, exec).await?;
            let finished_at = chrono::Utc::now().to_rfc3339();

            if let Some(err) = outcome.failure {
                let message = err.to_string();
                let fatal = err.is_fatal();
                {
                    let stage = job.stage_mut(name);
                    stage
                        .transition(StageStatus::Failed, false)
                        .map_err(|e| MigrationError::Infrastructure(e.into()))?;
                    stage.attempts = outcome.attempts;
                    stage.last_error = Some(message.clone());
                    stage.fatal = fatal;
                    stage.finished_at = Some(finished_at);
                }
                job.status = if exec.cancel.is_cancelled() {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Failed
                };
                self.persist(&job).await?;
                tracing::error!(
                    job = job.job_id.as_str(),
                    stage = %name,
                    attempts = outcome.attempts,
                    fatal,
                    "Stage failed: {message}"
                );
                return Ok(job);
            }

            if outcome.interrupted {
                // The stage stopped early at a cooperative checkpoint; its
                // partial work is cached, but the stage is not done and a
                // resume must re-enter it.
                {
                    let stage = job.stage_mut(name);
                    stage
                        .transition(StageStatus::Failed, false)
                        .map_err(|e| MigrationError::Infrastructure(e.into()))?;
                    stage.attempts = outcome.attempts;
                    stage.last_error = Some("cancelled before completion".to_string());
                    stage.finished_at = Some(finished_at);
                }
                job.status = JobStatus::Cancelled;
                self.persist(&job).await?;
                tracing::warn!(
                    job = job.job_id.as_str(),
                    stage = %name,
                    "Stage interrupted by cancellation"
                );
                return Ok(job);
            }

            {
                // Dry-run stages record as skipped-simulated; the edge still
                // satisfies dependents.
                let to = if job.plan.dry_run {
                    StageStatus::Skipped
                } else {
                    StageStatus::Succeeded
                };
                let stage = job.stage_mut(name);
                stage
                    .transition(to, false)
                    .map_err(|e| MigrationError::Infrastructure(e.into()))?;
                stage.attempts = outcome.attempts;
                stage.finished_at = Some(finished_at);
            }
            self.persist(&job).await?;
            tracing::info!(
                job = job.job_id.as_str(),
                stage = %name,
                attempts = outcome.attempts,
                "Stage complete"
            );

            if exec.run_until == Some(name) {
                tracing::info!(
                    job = job.job_id.as_str(),
                    stage = %name,
                    "Stopping after requested stage"
                );
                return Ok(job);
            }
        }

        if job.stages.iter().all(|s| s.status.satisfies_dependency()) {
            job.status = JobStatus::Succeeded;
        }
        self.persist(&job).await?;
        tracing::info!(
            job = job.job_id.as_str(),
            status = %job.status,
            duration_secs = started.elapsed().as_secs_f64(),
            "Migration run finished"
        );
        Ok(job)
    }

    async fn execute_stage(
        &self,
        name: StageName,
        job: &mut JobState,
        gateways: &Gateways,
        exec: &ExecutionOptions,
    ) -> Result<StageOutcome, MigrationError> {
        let policy = self.options.policy;
        match name {
            StageName::Extract => {
                let existing = job.assets.clone();
                let outcome = run_extract(
                    &job.plan,
                    &existing,
                    &self.cache,
                    &gateways.content,
                    policy,
                    self.options.fetch_concurrency,
                    &exec.cancel,
                )
                .await;
                job.assets = outcome.assets;
                Ok(StageOutcome {
                    attempts: outcome.max_attempts_used.max(1),
                    failure: outcome.first_error,
                    interrupted: outcome.interrupted,
                })
            }

            StageName::Transform => {
                let loaded = match self.load_assets(job) {
                    Ok(loaded) => loaded,
                    Err(err) => return Ok(StageOutcome::failed(1, err)),
                };
                let built = match transform(&job.plan, &loaded) {
                    Ok(built) => built,
                    Err(err) => return Ok(StageOutcome::failed(1, err)),
                };
                // A rebuilt bundle over the same asset set must reproduce
                // exactly; drift means a bug, not bad input.
                if let Some(previous) = &job.bundle {
                    if previous.source_hash_set() == built.bundle.source_hash_set()
                        && previous.bundle_hash != built.bundle.bundle_hash
                    {
                        return Ok(StageOutcome::failed(
                            1,
                            MigrationError::Determinism(format!(
                                "bundle hash {} does not reproduce previous {}",
                                built.bundle.bundle_hash, previous.bundle_hash
                            )),
                        ));
                    }
                }
                for file in &built.files {
                    if let Err(e) = self.cache.put(&file.file.content_hash, &file.bytes) {
                        return Ok(StageOutcome::failed(1, MigrationError::Infrastructure(e)));
                    }
                }
                tracing::info!(
                    files = built.bundle.files.len(),
                    bundle_hash = built.bundle.bundle_hash,
                    "Bundle built"
                );
                job.bundle = Some(built.bundle);
                Ok(StageOutcome::done(1))
            }

            StageName::Provision => {
                let objects = match self.load_bundle_objects(job) {
                    Ok(objects) => objects,
                    Err(err) => return Ok(StageOutcome::failed(1, err)),
                };
                let existing = job.resources.clone();
                let outcome = run_provision(
                    &job.plan,
                    &existing,
                    objects,
                    &gateways.cloud,
                    policy,
                    &exec.cancel,
                )
                .await;
                // Handles are recorded (and persisted by the caller) even
                // when a sibling failed, so the next pass reuses them
                // instead of creating duplicates.
                for handle in outcome.handles {
                    job.record_handle(handle);
                }
                Ok(StageOutcome {
                    attempts: outcome.max_attempts_used.max(1),
                    failure: outcome.first_error,
                    interrupted: outcome.interrupted,
                })
            }

            StageName::Configure => {
                let Some(compute) = job.handle_of(ResourceKind::Compute).cloned() else {
                    return Ok(StageOutcome::failed(
                        1,
                        MigrationError::Infrastructure(anyhow::anyhow!(
                            "no compute handle recorded before configuration"
                        )),
                    ));
                };
                let storage_endpoint = job
                    .handle_of(ResourceKind::Storage)
                    .map(|h| h.endpoint.clone())
                    .unwrap_or_default();
                let outcome = run_configure(
                    &job.plan,
                    &compute,
                    &storage_endpoint,
                    &gateways.commands,
                    policy,
                    self.options.command_timeout,
                    &exec.cancel,
                )
                .await;
                Ok(StageOutcome {
                    attempts: outcome.max_attempts_used.max(1),
                    failure: outcome.first_error,
                    interrupted: outcome.interrupted,
                })
            }

            StageName::DeployForms => {
                let existing = job.resources.clone();
                let outcome =
                    run_deploy_forms(&job.plan, &existing, &gateways.cloud, policy).await;
                if let Some(handle) = outcome.handle {
                    job.record_handle(handle);
                }
                Ok(StageOutcome {
                    attempts: outcome.max_attempts_used.max(1),
                    failure: outcome.first_error,
                    interrupted: false,
                })
            }

            StageName::Finalize => {
                let Some(compute) = job.handle_of(ResourceKind::Compute).cloned() else {
                    return Ok(StageOutcome::failed(
                        1,
                        MigrationError::Infrastructure(anyhow::anyhow!(
                            "no compute handle recorded before finalization"
                        )),
                    ));
                };
                let outcome = run_finalize(&job.plan, &compute, &gateways.probe, policy).await;
                Ok(StageOutcome {
                    attempts: outcome.max_attempts_used.max(1),
                    failure: outcome.first_error,
                    interrupted: false,
                })
            }
        }
    }

    /// Load every indexed asset's payload from the content cache.
    fn load_assets(&self, job: &JobState) -> Result<Vec<LoadedAsset>, MigrationError> {
        let mut loaded = Vec::with_capacity(job.assets.len());
        for asset in &job.assets {
            let bytes = self.cache.get(&asset.content_hash)?.ok_or_else(|| {
                MigrationError::Infrastructure(anyhow::anyhow!(
                    "cache entry missing for asset '{}' ({})",
                    asset.source_path,
                    asset.content_hash
                ))
            })?;
            loaded.push(LoadedAsset {
                asset: asset.clone(),
                bytes,
            });
        }
        Ok(loaded)
    }

    /// Load the built bundle's file bytes for upload.
    fn load_bundle_objects(&self, job: &JobState) -> Result<Vec<ObjectUpload>, MigrationError> {
        let Some(bundle) = &job.bundle else {
            return Err(MigrationError::Infrastructure(anyhow::anyhow!(
                "no bundle recorded before provisioning"
            )));
        };
        let mut objects = Vec::with_capacity(bundle.files.len());
        for file in &bundle.files {
            let bytes = self.cache.get(&file.content_hash)?.ok_or_else(|| {
                MigrationError::Infrastructure(anyhow::anyhow!(
                    "cache entry missing for bundle file '{}' ({})",
                    file.path,
                    file.content_hash
                ))
            })?;
            objects.push(ObjectUpload {
                path: file.path.clone(),
                bytes,
            });
        }
        Ok(objects)
    }

    async fn persist(&self, job: &JobState) -> Result<(), MigrationError> {
        let store = self.store.clone();
        let mut job = job.clone();
        job.updated_at = chrono::Utc::now().to_rfc3339();
        tokio::task::spawn_blocking(move || store.save(&job))
            .await
            .map_err(|e| {
                MigrationError::Infrastructure(anyhow::anyhow!("persist task panicked: {e}"))
            })?
            .map_err(|e| {
                MigrationError::Infrastructure(anyhow::anyhow!("failed to persist job state: {e}"))
            })
    }
}
