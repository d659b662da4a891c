//! The migration plan: immutable resource and source specifications.
//!
//! A [`MigrationPlan`] is derived once from configuration at process start
//! and never mutated afterwards. It is embedded whole in the persisted job
//! state so a resumed run needs nothing but the checkpoint file.

use serde::{Deserialize, Serialize};

/// Reference to the source site on the hosted builder platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Public base URL of the site (e.g. `"https://mysite.example"`).
    pub base_url: String,
    /// Builder-platform project identifier, when the export API is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// Target operating-system image for the compute instance.
///
/// Keys the ordered remote command plan in the configuration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetImage {
    #[default]
    DebianFamily,
    RhelFamily,
}

/// Compute instance specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub name: String,
    pub machine_type: String,
    pub disk_gb: u32,
    #[serde(default)]
    pub image: TargetImage,
}

/// Storage bucket specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpec {
    pub bucket: String,
    pub location: String,
}

/// DNS record specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSpec {
    pub zone: String,
    pub domain: String,
}

/// Serverless function specification for the form relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: String,
    pub region: String,
}

/// Form wiring: where submissions land and where notifications go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRouting {
    /// Path the rewritten pages post to (e.g. `"/api/forms"`).
    pub endpoint_path: String,
    /// Address form submissions are relayed to.
    pub notify_email: String,
}

/// Content-processing toggles applied during transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub minify_css: bool,
    pub minify_js: bool,
    pub optimize_images: bool,
    /// Marker substrings identifying builder-platform artifacts to strip.
    pub strip_markers: Vec<String>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            minify_css: true,
            minify_js: true,
            optimize_images: true,
            strip_markers: Vec::new(),
        }
    }
}

/// Optional host-level extras applied during remote configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HostOptions {
    /// Install basic monitoring tooling on the host.
    #[serde(default)]
    pub monitoring: bool,
    /// Install a daily archive-to-disk backup of the web root.
    #[serde(default)]
    pub auto_backup: bool,
}

/// Immutable description of one migration: where the site comes from and
/// what must exist in the target cloud when the job is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Plan name; job ids derive from it.
    pub name: String,
    pub source: SourceRef,
    pub compute: ComputeSpec,
    pub storage: StorageSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSpec>,
    pub function: FunctionSpec,
    pub forms: FormRouting,
    #[serde(default)]
    pub processing: ProcessingOptions,
    #[serde(default)]
    pub host: HostOptions,
    /// Email used for TLS certificate issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_email: Option<String>,
    /// Simulate every gateway call instead of performing it.
    #[serde(default)]
    pub dry_run: bool,
}
