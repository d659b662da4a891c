//! Cloud gateway backed by the provider CLI.
//!
//! Resource operations shell out to `gcloud`/`gsutil` with `--format=json`
//! and translate exit status plus stderr into the classified error model.
//! Each ensure operation is describe-then-create, which together with the
//! provider's own already-exists detection gives the idempotency the engine
//! relies on.

use std::io::Write;
use std::process::Command;

use siteferry_engine::config::types::CloudConfig;
use siteferry_engine::gateway::{CloudGateway, ObjectUpload};
use siteferry_types::error::GatewayError;
use siteferry_types::plan::{ComputeSpec, DnsSpec, FormRouting, FunctionSpec, StorageSpec};
use siteferry_types::resource::{ResourceHandle, ResourceKind};

/// Cloud gateway that drives the provider CLI as a subprocess.
pub struct CliCloudGateway {
    project: String,
    region: String,
    zone: String,
    credentials_file: String,
}

/// Classify a failed CLI invocation from its stderr.
fn classify_cli_failure(op: &str, stderr: &str) -> GatewayError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("was not found") || lowered.contains("notfound") {
        GatewayError::not_found("CLI_NOT_FOUND", format!("{op}: {}", stderr.trim()))
    } else if lowered.contains("already exists") || lowered.contains("alreadyexists") {
        GatewayError::already_exists("CLI_EXISTS", format!("{op}: {}", stderr.trim()))
    } else if lowered.contains("permission") || lowered.contains("unauthorized")
        || lowered.contains("could not find default credentials")
    {
        GatewayError::auth("CLI_DENIED", format!("{op}: {}", stderr.trim()))
    } else if lowered.contains("quota") {
        GatewayError::quota("CLI_QUOTA", format!("{op}: {}", stderr.trim()))
    } else if lowered.contains("rate limit") || lowered.contains("resource_exhausted") {
        GatewayError::rate_limited("CLI_THROTTLED", format!("{op}: {}", stderr.trim()), None)
    } else if lowered.contains("timed out")
        || lowered.contains("deadline")
        || lowered.contains("connection reset")
        || lowered.contains("unavailable")
    {
        GatewayError::transient_network("CLI_TRANSIENT", format!("{op}: {}", stderr.trim()))
    } else {
        GatewayError::internal("CLI_FAILED", format!("{op}: {}", stderr.trim()))
    }
}

impl CliCloudGateway {
    #[must_use]
    pub fn new(cloud: &CloudConfig) -> Self {
        Self {
            project: cloud.project_id.clone(),
            region: cloud.region.clone(),
            zone: cloud.zone.clone(),
            credentials_file: cloud.credentials_file.clone(),
        }
    }

    /// Run a provider CLI command, returning stdout on success.
    fn run(&self, op: &str, program: &str, args: &[&str]) -> Result<String, GatewayError> {
        tracing::debug!(op, program, ?args, "Running provider CLI");
        let output = Command::new(program)
            .args(args)
            .env("GOOGLE_APPLICATION_CREDENTIALS", &self.credentials_file)
            .env("CLOUDSDK_CORE_DISABLE_PROMPTS", "1")
            .output()
            .map_err(|e| {
                GatewayError::internal("CLI_SPAWN", format!("{op}: failed to run {program}: {e}"))
            })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_cli_failure(
                op,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }

    fn run_json(
        &self,
        op: &str,
        program: &str,
        args: &[&str],
    ) -> Result<serde_json::Value, GatewayError> {
        let stdout = self.run(op, program, args)?;
        serde_json::from_str(&stdout).map_err(|e| {
            GatewayError::internal("CLI_PARSE", format!("{op}: unparseable CLI output: {e}"))
        })
    }

    fn handle(kind: ResourceKind, external_id: &str, endpoint: &str) -> ResourceHandle {
        ResourceHandle {
            kind,
            external_id: external_id.to_string(),
            endpoint: endpoint.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn describe_instance(&self, name: &str) -> Result<serde_json::Value, GatewayError> {
        self.run_json(
            "describe instance",
            "gcloud",
            &[
                "compute",
                "instances",
                "describe",
                name,
                "--project",
                &self.project,
                "--zone",
                &self.zone,
                "--format=json",
            ],
        )
    }

    fn external_ip(instance: &serde_json::Value) -> Option<String> {
        instance["networkInterfaces"]
            .as_array()?
            .iter()
            .find_map(|iface| {
                iface["accessConfigs"].as_array()?.iter().find_map(|ac| {
                    ac["natIP"].as_str().map(ToString::to_string)
                })
            })
    }
}

impl CloudGateway for CliCloudGateway {
    fn check(&self) -> Result<(), GatewayError> {
        self.run(
            "list instances",
            "gcloud",
            &[
                "compute",
                "instances",
                "list",
                "--project",
                &self.project,
                "--zones",
                &self.zone,
                "--format=json",
                "--limit=1",
            ],
        )
        .map(|_| ())
    }

    fn ensure_compute(&self, spec: &ComputeSpec) -> Result<ResourceHandle, GatewayError> {
        let described = match self.describe_instance(&spec.name) {
            Ok(instance) => instance,
            Err(err) if err.category == siteferry_types::error::ErrorCategory::NotFound => {
                let disk = format!("--boot-disk-size={}GB", spec.disk_gb);
                self.run(
                    "create instance",
                    "gcloud",
                    &[
                        "compute",
                        "instances",
                        "create",
                        &spec.name,
                        "--project",
                        &self.project,
                        "--zone",
                        &self.zone,
                        "--machine-type",
                        &spec.machine_type,
                        &disk,
                        "--format=json",
                    ],
                )?;
                self.describe_instance(&spec.name)?
            }
            Err(err) => return Err(err),
        };

        let ip = Self::external_ip(&described).ok_or_else(|| {
            GatewayError::internal(
                "NO_EXTERNAL_IP",
                format!("instance '{}' has no external address", spec.name),
            )
        })?;
        Ok(Self::handle(ResourceKind::Compute, &spec.name, &ip))
    }

    fn ensure_storage(&self, spec: &StorageSpec) -> Result<ResourceHandle, GatewayError> {
        let uri = format!("gs://{}", spec.bucket);
        match self.run("describe bucket", "gsutil", &["ls", "-b", &uri]) {
            Ok(_) => {}
            Err(err) if err.category == siteferry_types::error::ErrorCategory::NotFound => {
                match self.run(
                    "create bucket",
                    "gsutil",
                    &["mb", "-p", &self.project, "-l", &spec.location, &uri],
                ) {
                    Ok(_) => {}
                    // Lost the race with an earlier crashed attempt; the
                    // bucket being there is the goal.
                    Err(err)
                        if err.category
                            == siteferry_types::error::ErrorCategory::AlreadyExists => {}
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
        Ok(Self::handle(ResourceKind::Storage, &spec.bucket, &uri))
    }

    fn ensure_dns(&self, spec: &DnsSpec, target_endpoint: &str) -> Result<ResourceHandle, GatewayError> {
        let existing = self.run_json(
            "list record sets",
            "gcloud",
            &[
                "dns",
                "record-sets",
                "list",
                "--project",
                &self.project,
                "--zone",
                &spec.zone,
                "--name",
                &format!("{}.", spec.domain),
                "--type=A",
                "--format=json",
            ],
        )?;
        let present = existing.as_array().is_some_and(|rs| !rs.is_empty());
        if !present {
            self.run(
                "create record set",
                "gcloud",
                &[
                    "dns",
                    "record-sets",
                    "create",
                    &format!("{}.", spec.domain),
                    "--project",
                    &self.project,
                    "--zone",
                    &spec.zone,
                    "--type=A",
                    "--ttl=300",
                    "--rrdatas",
                    target_endpoint,
                ],
            )?;
        }
        Ok(Self::handle(ResourceKind::Dns, &spec.zone, &spec.domain))
    }

    fn ensure_function(
        &self,
        spec: &FunctionSpec,
        routing: &FormRouting,
    ) -> Result<ResourceHandle, GatewayError> {
        let described = self.run_json(
            "describe function",
            "gcloud",
            &[
                "functions",
                "describe",
                &spec.name,
                "--project",
                &self.project,
                "--region",
                &spec.region,
                "--format=json",
            ],
        );
        let described = match described {
            Ok(value) => value,
            Err(err) if err.category == siteferry_types::error::ErrorCategory::NotFound => {
                self.run(
                    "deploy function",
                    "gcloud",
                    &[
                        "functions",
                        "deploy",
                        &spec.name,
                        "--project",
                        &self.project,
                        "--region",
                        &spec.region,
                        "--runtime",
                        &spec.runtime,
                        "--trigger-http",
                        "--allow-unauthenticated",
                        "--entry-point=relay",
                        "--set-env-vars",
                        &format!("NOTIFY_EMAIL={}", routing.notify_email),
                        "--format=json",
                    ],
                )?;
                self.run_json(
                    "describe function",
                    "gcloud",
                    &[
                        "functions",
                        "describe",
                        &spec.name,
                        "--project",
                        &self.project,
                        "--region",
                        &spec.region,
                        "--format=json",
                    ],
                )?
            }
            Err(err) => return Err(err),
        };

        let url = described["serviceConfig"]["uri"]
            .as_str()
            .or_else(|| described["httpsTrigger"]["url"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self::handle(ResourceKind::Function, &spec.name, &url))
    }

    fn resolve(&self, handle: &ResourceHandle) -> Result<bool, GatewayError> {
        let result = match handle.kind {
            ResourceKind::Compute => self.describe_instance(&handle.external_id).map(|_| ()),
            ResourceKind::Storage => self
                .run("describe bucket", "gsutil", &["ls", "-b", &handle.endpoint])
                .map(|_| ()),
            ResourceKind::Dns => self
                .run(
                    "list record sets",
                    "gcloud",
                    &[
                        "dns",
                        "record-sets",
                        "list",
                        "--project",
                        &self.project,
                        "--zone",
                        &handle.external_id,
                        "--format=json",
                    ],
                )
                .map(|_| ()),
            ResourceKind::Function => self
                .run(
                    "describe function",
                    "gcloud",
                    &[
                        "functions",
                        "describe",
                        &handle.external_id,
                        "--project",
                        &self.project,
                        "--region",
                        &self.region,
                        "--format=json",
                    ],
                )
                .map(|_| ()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.category == siteferry_types::error::ErrorCategory::NotFound => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn put_objects(
        &self,
        storage: &ResourceHandle,
        objects: &[ObjectUpload],
    ) -> Result<u64, GatewayError> {
        // Stage the bundle in a temp tree and hand the whole sync to the
        // CLI; it parallelizes and retries partial transfers itself.
        let staging = tempfile::tempdir().map_err(|e| {
            GatewayError::internal("STAGING_DIR", format!("failed to create staging dir: {e}"))
        })?;
        for object in objects {
            let path = staging.path().join(&object.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GatewayError::internal("STAGING_DIR", format!("{}: {e}", parent.display()))
                })?;
            }
            let mut file = std::fs::File::create(&path).map_err(|e| {
                GatewayError::internal("STAGING_WRITE", format!("{}: {e}", path.display()))
            })?;
            file.write_all(&object.bytes).map_err(|e| {
                GatewayError::internal("STAGING_WRITE", format!("{}: {e}", path.display()))
            })?;
        }

        let staging_path = staging.path().to_string_lossy().into_owned();
        self.run(
            "sync bundle to bucket",
            "gsutil",
            &["-m", "rsync", "-r", "-d", &staging_path, &storage.endpoint],
        )?;
        Ok(objects.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteferry_types::error::ErrorCategory;

    #[test]
    fn stderr_classification() {
        let cases = [
            ("The resource 'x' was not found", ErrorCategory::NotFound),
            ("resource already exists", ErrorCategory::AlreadyExists),
            ("Permission denied on project", ErrorCategory::Auth),
            ("Quota 'INSTANCES' exceeded", ErrorCategory::Quota),
            ("Rate limit exceeded, try later", ErrorCategory::RateLimited),
            ("connection reset by peer", ErrorCategory::TransientNetwork),
            ("something inexplicable", ErrorCategory::Internal),
        ];
        for (stderr, expected) in cases {
            let err = classify_cli_failure("op", stderr);
            assert_eq!(err.category, expected, "stderr: {stderr}");
        }
    }

    #[test]
    fn external_ip_reads_nat_address() {
        let instance = serde_json::json!({
            "networkInterfaces": [{
                "accessConfigs": [{"name": "External NAT", "natIP": "203.0.113.77"}]
            }]
        });
        assert_eq!(
            CliCloudGateway::external_ip(&instance),
            Some("203.0.113.77".to_string())
        );
    }

    #[test]
    fn external_ip_missing_yields_none() {
        let instance = serde_json::json!({"networkInterfaces": []});
        assert_eq!(CliCloudGateway::external_ip(&instance), None);
    }
}
