//! Durable job state: stages, statuses, and the persisted aggregate.

use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::bundle::Bundle;
use crate::plan::MigrationPlan;
use crate::resource::{ResourceHandle, ResourceKind};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a new job identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a plan name and an RFC 3339-ish UTC timestamp.
    #[must_use]
    pub fn derive(plan_name: &str, timestamp: &str) -> Self {
        // Timestamps carry ':' which is awkward in filenames.
        let compact: String = timestamp
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        Self(format!("{plan_name}-{compact}"))
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Pipeline stages in fixed declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Extract,
    Transform,
    Provision,
    Configure,
    DeployForms,
    Finalize,
}

impl StageName {
    /// All stages, in execution order.
    #[must_use]
    pub fn ordered() -> [StageName; 6] {
        [
            Self::Extract,
            Self::Transform,
            Self::Provision,
            Self::Configure,
            Self::DeployForms,
            Self::Finalize,
        ]
    }

    /// Stages that must be Succeeded or Skipped before this one may run.
    #[must_use]
    pub fn depends_on(self) -> &'static [StageName] {
        match self {
            Self::Extract => &[],
            Self::Transform => &[Self::Extract],
            Self::Provision => &[Self::Transform],
            Self::Configure => &[Self::Provision],
            Self::DeployForms => &[Self::Configure],
            Self::Finalize => &[Self::DeployForms],
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Provision => "provision",
            Self::Configure => "configure",
            Self::DeployForms => "deploy_forms",
            Self::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

/// Status of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Terminal statuses that satisfy a dependency edge.
    #[must_use]
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Attempted stage transition that the monotonicity rules reject.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage transition {from} -> {to} for stage '{stage}'")]
pub struct InvalidTransition {
    pub stage: StageName,
    pub from: StageStatus,
    pub to: StageStatus,
}

/// One named unit of pipeline work and its checkpointed progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: StageName,
    pub depends_on: Vec<StageName>,
    pub status: StageStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// The recorded failure needs operator intervention (credentials,
    /// quota) or signals a bug; a plain resume will not fix it.
    #[serde(default)]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl Stage {
    /// Fresh Pending stage with its declared dependencies.
    #[must_use]
    pub fn pending(name: StageName) -> Self {
        Self {
            name,
            depends_on: name.depends_on().to_vec(),
            status: StageStatus::Pending,
            attempts: 0,
            last_error: None,
            fatal: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply a status transition, enforcing monotonicity.
    ///
    /// Allowed: Pending->Running, Running->{Succeeded, Failed, Skipped},
    /// and Failed->Running only when `via_retry` is set (an explicit
    /// retry-from-failure, i.e. resume). Everything else is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the rules reject the move.
    pub fn transition(&mut self, to: StageStatus, via_retry: bool) -> Result<(), InvalidTransition> {
        let allowed = matches!(
            (self.status, to),
            (StageStatus::Pending, StageStatus::Running)
                | (
                    StageStatus::Running,
                    StageStatus::Succeeded | StageStatus::Failed | StageStatus::Skipped
                )
        ) || (self.status == StageStatus::Failed && to == StageStatus::Running && via_retry);

        if !allowed {
            return Err(InvalidTransition {
                stage: self.name,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// Overall status of a migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    /// Stopped by an external cancellation signal; distinct from Failed.
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The single persisted aggregate describing one migration run.
///
/// Written to durable storage after every stage transition; a crash between
/// two stages loses at most the in-flight stage's partial attempt count.
/// Deleted only by the explicit cleanup operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub plan: MigrationPlan,
    pub status: JobStatus,
    pub stages: Vec<Stage>,
    pub resources: Vec<ResourceHandle>,
    /// Cache index: payload bytes live in the content cache by hash.
    pub assets: Vec<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobState {
    /// Fresh job with every stage Pending.
    #[must_use]
    pub fn new(job_id: JobId, plan: MigrationPlan, now: String) -> Self {
        Self {
            job_id,
            plan,
            status: JobStatus::Running,
            stages: StageName::ordered().iter().map(|n| Stage::pending(*n)).collect(),
            resources: Vec::new(),
            assets: Vec::new(),
            bundle: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Borrow a stage record.
    ///
    /// # Panics
    ///
    /// Panics if `name` is missing, which would mean the stage list was
    /// constructed outside [`JobState::new`].
    #[must_use]
    pub fn stage(&self, name: StageName) -> &Stage {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("stage '{name}' missing from job state"))
    }

    /// Mutably borrow a stage record.
    ///
    /// # Panics
    ///
    /// Panics if `name` is missing (see [`JobState::stage`]).
    pub fn stage_mut(&mut self, name: StageName) -> &mut Stage {
        self.stages
            .iter_mut()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("stage '{name}' missing from job state"))
    }

    /// First stage not yet in a dependency-satisfying terminal status, in
    /// declared order. `None` when the whole pipeline is done.
    #[must_use]
    pub fn next_stage(&self) -> Option<StageName> {
        StageName::ordered()
            .into_iter()
            .find(|n| !self.stage(*n).status.satisfies_dependency())
    }

    /// Whether every dependency of `name` is Succeeded or Skipped.
    #[must_use]
    pub fn dependencies_satisfied(&self, name: StageName) -> bool {
        self.stage(name)
            .depends_on
            .iter()
            .all(|dep| self.stage(*dep).status.satisfies_dependency())
    }

    /// Handle of the given kind, if one has been recorded.
    #[must_use]
    pub fn handle_of(&self, kind: ResourceKind) -> Option<&ResourceHandle> {
        self.resources.iter().find(|r| r.kind == kind)
    }

    /// Record a handle, replacing any existing handle of the same kind so
    /// the at-most-once-per-kind invariant holds.
    pub fn record_handle(&mut self, handle: ResourceHandle) {
        if let Some(existing) = self.resources.iter_mut().find(|r| r.kind == handle.kind) {
            *existing = handle;
        } else {
            self.resources.push(handle);
        }
    }

    /// Asset with the given identity, if present in the index.
    #[must_use]
    pub fn asset(&self, kind: crate::asset::AssetKind, source_path: &str) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|a| a.kind == kind && a.source_path == source_path)
    }

    /// Record an asset, superseding any existing record with the same
    /// identity.
    pub fn record_asset(&mut self, asset: Asset) {
        if let Some(existing) = self
            .assets
            .iter_mut()
            .find(|a| a.identity() == asset.identity())
        {
            *existing = asset;
        } else {
            self.assets.push(asset);
        }
    }
}
