//! Configuration file schema and conversion into the immutable plan.

use serde::{Deserialize, Serialize};

use siteferry_types::plan::{
    ComputeSpec, DnsSpec, FormRouting, FunctionSpec, HostOptions, MigrationPlan,
    ProcessingOptions, SourceRef, StorageSpec, TargetImage,
};

fn default_version() -> String {
    "1.0".to_string()
}

fn default_endpoint_path() -> String {
    "/api/forms".to_string()
}

fn default_fetch_concurrency() -> usize {
    6
}

fn default_max_attempts() -> u32 {
    4
}

fn default_command_timeout_seconds() -> u64 {
    300
}

fn default_state_dir() -> String {
    ".siteferry".to_string()
}

fn default_true() -> bool {
    true
}

/// Source platform section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Public base URL of the site to migrate.
    pub base_url: String,
    /// Builder-platform project id, when the export API is used.
    #[serde(default)]
    pub project_id: Option<String>,
    /// API key for the export API. Usually `${...}`-substituted.
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret for the export API.
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl SourceConfig {
    /// Whether enough credentials are present for API-based extraction.
    #[must_use]
    pub fn uses_api(&self) -> bool {
        self.api_key.is_some() && self.secret_key.is_some() && self.project_id.is_some()
    }
}

/// Cloud provider section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub project_id: String,
    pub region: String,
    pub zone: String,
    /// Path to the provider credentials file.
    pub credentials_file: String,
    pub compute: ComputeConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
    pub function: FunctionConfig,
    /// Email used for TLS certificate issuance.
    #[serde(default)]
    pub tls_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub name: String,
    pub machine_type: String,
    pub disk_gb: u32,
    #[serde(default)]
    pub image: TargetImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    pub zone: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    pub runtime: String,
    pub region: String,
}

/// Form relay section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormsConfig {
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
    pub notify_email: String,
}

/// Content-processing toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_true")]
    pub minify_css: bool,
    #[serde(default = "default_true")]
    pub minify_js: bool,
    #[serde(default = "default_true")]
    pub optimize_images: bool,
    /// Marker substrings identifying builder-platform artifacts to strip.
    #[serde(default)]
    pub strip_markers: Vec<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            minify_css: true,
            minify_js: true,
            optimize_images: true,
            strip_markers: Vec::new(),
        }
    }
}

/// Optional host-level extras installed during remote configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default)]
    pub auto_backup: bool,
}

/// Worker-pool and retry knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Bounded concurrency for asset fetches.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Retry attempt bound for remote operations (including the first try).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-command timeout for remote configuration.
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            max_attempts: default_max_attempts(),
            command_timeout_seconds: default_command_timeout_seconds(),
        }
    }
}

/// Where checkpoints and the content cache live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

/// Root of the migration YAML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_version")]
    pub version: String,
    /// Migration name; job ids derive from it.
    pub name: String,
    pub source: SourceConfig,
    pub cloud: CloudConfig,
    pub forms: FormsConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl MigrationConfig {
    /// Derive the immutable plan. Called once at process start; the plan is
    /// what gets embedded in job state.
    #[must_use]
    pub fn to_plan(&self, dry_run: bool) -> MigrationPlan {
        MigrationPlan {
            name: self.name.clone(),
            source: SourceRef {
                base_url: self.source.base_url.clone(),
                project_id: self.source.project_id.clone(),
            },
            compute: ComputeSpec {
                name: self.cloud.compute.name.clone(),
                machine_type: self.cloud.compute.machine_type.clone(),
                disk_gb: self.cloud.compute.disk_gb,
                image: self.cloud.compute.image,
            },
            storage: StorageSpec {
                bucket: self.cloud.storage.bucket.clone(),
                location: self.cloud.storage.location.clone(),
            },
            dns: self.cloud.dns.as_ref().map(|d| DnsSpec {
                zone: d.zone.clone(),
                domain: d.domain.clone(),
            }),
            function: FunctionSpec {
                name: self.cloud.function.name.clone(),
                runtime: self.cloud.function.runtime.clone(),
                region: self.cloud.function.region.clone(),
            },
            forms: FormRouting {
                endpoint_path: self.forms.endpoint_path.clone(),
                notify_email: self.forms.notify_email.clone(),
            },
            processing: ProcessingOptions {
                minify_css: self.processing.minify_css,
                minify_js: self.processing.minify_js,
                optimize_images: self.processing.optimize_images,
                strip_markers: self.processing.strip_markers.clone(),
            },
            host: HostOptions {
                monitoring: self.deployment.monitoring,
                auto_backup: self.deployment.auto_backup,
            },
            tls_email: self.cloud.tls_email.clone(),
            dry_run,
        }
    }
}
