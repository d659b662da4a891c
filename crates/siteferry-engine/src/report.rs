//! Operator-facing summary of a migration run.

use serde::Serialize;

use siteferry_types::job::{JobState, JobStatus, StageStatus};
use siteferry_types::resource::ResourceHandle;

/// One stage's outcome for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fatal: bool,
}

/// Summary of a whole run, printable and machine-readable.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub job_id: String,
    pub status: JobStatus,
    pub dry_run: bool,
    pub stages: Vec<StageReport>,
    pub assets: usize,
    pub bundle_files: usize,
    pub resources: Vec<ResourceHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    pub duration_secs: f64,
}

impl MigrationReport {
    /// Build a report from the final job state.
    #[must_use]
    pub fn from_job(job: &JobState, duration_secs: f64) -> Self {
        let compute = job.handle_of(siteferry_types::resource::ResourceKind::Compute);
        let site_url = compute.map(|c| crate::finalize::site_url(&job.plan, c));
        Self {
            job_id: job.job_id.as_str().to_string(),
            status: job.status,
            dry_run: job.plan.dry_run,
            stages: job
                .stages
                .iter()
                .map(|s| StageReport {
                    name: s.name.to_string(),
                    status: s.status,
                    attempts: s.attempts,
                    error: s.last_error.clone(),
                    fatal: s.fatal,
                })
                .collect(),
            assets: job.assets.len(),
            bundle_files: job.bundle.as_ref().map_or(0, |b| b.files.len()),
            resources: job.resources.clone(),
            site_url,
            duration_secs,
        }
    }

    /// The stage that failed, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}
