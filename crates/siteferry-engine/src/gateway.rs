//! Core-facing gateway traits and their dry-run simulations.
//!
//! Gateways are synchronous `Send + Sync` traits driven through
//! `spawn_blocking` by the stage runner; concrete adapters live outside the
//! engine crate. The simulated implementations here answer every call with a
//! synthetic success and never touch the network, which is what a dry run
//! swaps in.

use std::sync::Arc;
use std::time::Duration;

use siteferry_types::asset::{content_hash, AssetKind};
use siteferry_types::error::GatewayError;
use siteferry_types::plan::{ComputeSpec, DnsSpec, FormRouting, FunctionSpec, SourceRef, StorageSpec};
use siteferry_types::resource::{ResourceHandle, ResourceKind};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One item the content gateway reports during listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub path: String,
    pub kind: AssetKind,
    /// Source-side content fingerprint (etag or revision hash) when the
    /// platform exposes one. Lets extraction skip unchanged items without
    /// fetching.
    pub fingerprint: Option<String>,
}

/// Fetched payload plus its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedItem {
    pub bytes: Vec<u8>,
    pub content_hash: String,
}

/// One file to upload to the storage bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpload {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Result of one remote command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command reported success.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Fetches pages, static resources, and form definitions from the source
/// platform.
pub trait ContentGateway: Send + Sync {
    /// Cheap connectivity/credential check.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn check(&self) -> Result<(), GatewayError>;

    /// Enumerate the items the source site consists of.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn list_items(&self, source: &SourceRef) -> Result<Vec<ItemRef>, GatewayError>;

    /// Fetch one item's payload and digest.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn fetch(&self, path: &str) -> Result<FetchedItem, GatewayError>;
}

/// Creates and inspects cloud resources with idempotent "ensure" semantics:
/// an ensure call against an already-existing resource resolves to its
/// handle instead of failing or duplicating.
pub trait CloudGateway: Send + Sync {
    /// Cheap connectivity/credential check.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn check(&self) -> Result<(), GatewayError>;

    /// Ensure the compute instance exists.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn ensure_compute(&self, spec: &ComputeSpec) -> Result<ResourceHandle, GatewayError>;

    /// Ensure the storage bucket exists.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn ensure_storage(&self, spec: &StorageSpec) -> Result<ResourceHandle, GatewayError>;

    /// Ensure the DNS record exists, pointing at `target_endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn ensure_dns(
        &self,
        spec: &DnsSpec,
        target_endpoint: &str,
    ) -> Result<ResourceHandle, GatewayError>;

    /// Ensure the form-relay serverless function exists.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn ensure_function(
        &self,
        spec: &FunctionSpec,
        routing: &FormRouting,
    ) -> Result<ResourceHandle, GatewayError>;

    /// Cheap existence check for a previously recorded handle.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn resolve(&self, handle: &ResourceHandle) -> Result<bool, GatewayError>;

    /// Upload bundle files into the storage bucket. Returns the number of
    /// objects written.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on failure.
    fn put_objects(
        &self,
        storage: &ResourceHandle,
        objects: &[ObjectUpload],
    ) -> Result<u64, GatewayError>;
}

/// Executes one shell-level command on a provisioned host.
pub trait CommandChannel: Send + Sync {
    /// Run `command` on `target`, waiting up to `timeout`.
    ///
    /// A completed command returns its exit status and output even when the
    /// exit code is non-zero; transport failures (connection, timeout)
    /// surface as classified errors instead.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on transport failure.
    fn exec(
        &self,
        target: &ResourceHandle,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, GatewayError>;
}

/// Synthetic reachability check against a deployed endpoint.
pub trait HealthProbe: Send + Sync {
    /// Issue the probe and return the HTTP status code.
    ///
    /// # Errors
    ///
    /// Returns a classified [`GatewayError`] on connection failure.
    fn probe(&self, url: &str) -> Result<u16, GatewayError>;
}

/// The full set of external collaborators a migration run talks to.
#[derive(Clone)]
pub struct Gateways {
    pub content: Arc<dyn ContentGateway>,
    pub cloud: Arc<dyn CloudGateway>,
    pub commands: Arc<dyn CommandChannel>,
    pub probe: Arc<dyn HealthProbe>,
}

impl Gateways {
    /// Gateways that simulate every call. Used by dry runs: the pipeline,
    /// dependency graph, and retry machinery all execute, but nothing
    /// external is touched.
    #[must_use]
    pub fn simulated() -> Self {
        Self {
            content: Arc::new(SimulatedContentGateway),
            cloud: Arc::new(SimulatedCloudGateway),
            commands: Arc::new(SimulatedCommandChannel),
            probe: Arc::new(SimulatedHealthProbe),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulations
// ---------------------------------------------------------------------------

/// Content gateway that reports a small synthetic site.
pub struct SimulatedContentGateway;

const SIMULATED_PAGE: &str = "<html><head><title>simulated</title></head>\
<body><form action=\"/form\"><input name=\"email\"></form></body></html>";
const SIMULATED_STYLE: &str = "body { margin: 0; }";
const SIMULATED_FORM: &str = r#"{"name":"contact","fields":[{"name":"email","type":"email","required":true}]}"#;

fn simulated_payload(path: &str) -> &'static str {
    if path.ends_with(".css") {
        SIMULATED_STYLE
    } else if path.starts_with("/forms/") {
        SIMULATED_FORM
    } else {
        SIMULATED_PAGE
    }
}

impl ContentGateway for SimulatedContentGateway {
    fn check(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn list_items(&self, _source: &SourceRef) -> Result<Vec<ItemRef>, GatewayError> {
        Ok(vec![
            ItemRef {
                path: "/".into(),
                kind: AssetKind::Page,
                fingerprint: None,
            },
            ItemRef {
                path: "/style.css".into(),
                kind: AssetKind::StaticResource,
                fingerprint: None,
            },
            ItemRef {
                path: "/forms/contact".into(),
                kind: AssetKind::FormDefinition,
                fingerprint: None,
            },
        ])
    }

    fn fetch(&self, path: &str) -> Result<FetchedItem, GatewayError> {
        let bytes = simulated_payload(path).as_bytes().to_vec();
        let content_hash = content_hash(&bytes);
        Ok(FetchedItem { bytes, content_hash })
    }
}

/// Cloud gateway that fabricates handles without provider calls.
pub struct SimulatedCloudGateway;

fn simulated_handle(kind: ResourceKind, id: &str, endpoint: &str) -> ResourceHandle {
    ResourceHandle {
        kind,
        external_id: format!("simulated-{id}"),
        endpoint: endpoint.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

impl CloudGateway for SimulatedCloudGateway {
    fn check(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn ensure_compute(&self, spec: &ComputeSpec) -> Result<ResourceHandle, GatewayError> {
        Ok(simulated_handle(ResourceKind::Compute, &spec.name, "198.51.100.1"))
    }

    fn ensure_storage(&self, spec: &StorageSpec) -> Result<ResourceHandle, GatewayError> {
        Ok(simulated_handle(
            ResourceKind::Storage,
            &spec.bucket,
            &format!("gs://{}", spec.bucket),
        ))
    }

    fn ensure_dns(
        &self,
        spec: &DnsSpec,
        target_endpoint: &str,
    ) -> Result<ResourceHandle, GatewayError> {
        let _ = target_endpoint;
        Ok(simulated_handle(ResourceKind::Dns, &spec.zone, &spec.domain))
    }

    fn ensure_function(
        &self,
        spec: &FunctionSpec,
        _routing: &FormRouting,
    ) -> Result<ResourceHandle, GatewayError> {
        Ok(simulated_handle(
            ResourceKind::Function,
            &spec.name,
            &format!("https://{}.functions.invalid/{}", spec.region, spec.name),
        ))
    }

    fn resolve(&self, _handle: &ResourceHandle) -> Result<bool, GatewayError> {
        Ok(true)
    }

    fn put_objects(
        &self,
        _storage: &ResourceHandle,
        objects: &[ObjectUpload],
    ) -> Result<u64, GatewayError> {
        Ok(objects.len() as u64)
    }
}

/// Command channel that reports success for every command.
pub struct SimulatedCommandChannel;

impl CommandChannel for SimulatedCommandChannel {
    fn exec(
        &self,
        _target: &ResourceHandle,
        _command: &str,
        _timeout: Duration,
    ) -> Result<ExecOutput, GatewayError> {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Health probe that reports every endpoint healthy.
pub struct SimulatedHealthProbe;

impl HealthProbe for SimulatedHealthProbe {
    fn probe(&self, _url: &str) -> Result<u16, GatewayError> {
        Ok(200)
    }
}
