//! Remote configuration stage: an ordered command sequence against the
//! provisioned host.
//!
//! Commands run strictly in order; each depends on the filesystem and
//! service state the previous one left behind. A transport failure
//! (connection, timeout) retries that single command with backoff; a
//! non-zero exit is a permanent configuration error that aborts the rest of
//! the sequence, since running later commands out of order is unsafe.

use std::sync::Arc;
use std::time::Duration;

use crate::error::MigrationError;
use crate::execution::CancelToken;
use crate::gateway::CommandChannel;
use crate::runner::{gateway_call, with_retry, RetryPolicy};
use siteferry_types::error::GatewayError;
use siteferry_types::plan::{MigrationPlan, TargetImage};
use siteferry_types::resource::ResourceHandle;

/// One step of the remote configuration sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Short operator-facing label (`"install packages"`).
    pub label: String,
    /// The shell command to execute.
    pub command: String,
}

impl RemoteCommand {
    fn new(label: &str, command: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            command: command.into(),
        }
    }
}

const NGINX_SITE_DEBIAN: &str = r#"server {
    listen 80;
    server_name SERVER_NAME;
    root /var/www/site;
    index index.html;

    location / {
        try_files $uri $uri/ $uri.html =404;
    }

    location FORM_ENDPOINT {
        proxy_pass http://127.0.0.1:8080;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
    }
}"#;

const BACKUP_SCRIPT: &str = r#"#!/bin/bash
STAMP=$(date +"%Y%m%d-%H%M%S")
BACKUP_DIR=/var/backups/site
mkdir -p "$BACKUP_DIR"
tar -czf "$BACKUP_DIR/site-$STAMP.tar.gz" /var/www/site
find "$BACKUP_DIR" -type f -mtime +7 -name '*.gz' -delete"#;

const FORM_RELAY_UNIT: &str = r#"[Unit]
Description=Form relay for migrated site
After=network.target

[Service]
User=www-data
Group=www-data
ExecStart=/usr/local/bin/form-relay --forms-dir /var/www/site/api/forms --listen 127.0.0.1:8080
Restart=on-failure

[Install]
WantedBy=multi-user.target"#;

/// Build the ordered command sequence for the plan's target image.
///
/// The sequence is data, keyed by image family, so provider- or
/// image-specific variants are additive rather than special-cased inline.
#[must_use]
pub fn command_plan(plan: &MigrationPlan, storage_endpoint: &str) -> Vec<RemoteCommand> {
    let server_name = plan
        .dns
        .as_ref()
        .map_or_else(|| "_".to_string(), |d| d.domain.clone());
    let site_config = NGINX_SITE_DEBIAN
        .replace("SERVER_NAME", &server_name)
        .replace("FORM_ENDPOINT", &plan.forms.endpoint_path);

    let (update, install) = match plan.compute.image {
        TargetImage::DebianFamily => (
            "sudo apt-get update -y",
            "sudo apt-get install -y nginx rsync",
        ),
        TargetImage::RhelFamily => ("sudo dnf makecache", "sudo dnf install -y nginx rsync"),
    };

    let mut commands = vec![
        RemoteCommand::new("refresh package index", update),
        RemoteCommand::new("install packages", install),
        RemoteCommand::new(
            "create web root",
            "sudo mkdir -p /var/www/site && sudo chown -R www-data:www-data /var/www/site",
        ),
        RemoteCommand::new(
            "sync bundle from bucket",
            format!("sudo gsutil -m rsync -r -d {storage_endpoint} /var/www/site"),
        ),
        RemoteCommand::new(
            "write web server config",
            format!(
                "printf '%s' '{}' | sudo tee /etc/nginx/sites-available/site >/dev/null \
                 && sudo ln -sf /etc/nginx/sites-available/site /etc/nginx/sites-enabled/default",
                site_config.replace('\'', "'\\''")
            ),
        ),
        RemoteCommand::new("validate web server config", "sudo nginx -t"),
    ];

    if let (Some(dns), Some(email)) = (&plan.dns, &plan.tls_email) {
        commands.push(RemoteCommand::new(
            "install certificate tooling",
            match plan.compute.image {
                TargetImage::DebianFamily => "sudo apt-get install -y certbot python3-certbot-nginx",
                TargetImage::RhelFamily => "sudo dnf install -y certbot python3-certbot-nginx",
            },
        ));
        commands.push(RemoteCommand::new(
            "issue certificate",
            format!(
                "sudo certbot --nginx --non-interactive --agree-tos --redirect \
                 --email {email} -d {}",
                dns.domain
            ),
        ));
    }

    if plan.host.monitoring {
        commands.push(RemoteCommand::new(
            "install monitoring tools",
            match plan.compute.image {
                TargetImage::DebianFamily => "sudo apt-get install -y htop iotop nethogs",
                TargetImage::RhelFamily => "sudo dnf install -y htop iotop nethogs",
            },
        ));
    }
    if plan.host.auto_backup {
        commands.push(RemoteCommand::new(
            "install backup script",
            format!(
                "printf '%s' '{}' | sudo tee /usr/local/bin/backup-site.sh >/dev/null \
                 && sudo chmod +x /usr/local/bin/backup-site.sh",
                BACKUP_SCRIPT.replace('\'', "'\\''")
            ),
        ));
        commands.push(RemoteCommand::new(
            "schedule daily backup",
            "echo '17 2 * * * /usr/local/bin/backup-site.sh' | sudo crontab -",
        ));
    }

    commands.extend([
        RemoteCommand::new(
            "install form relay unit",
            format!(
                "printf '%s' '{FORM_RELAY_UNIT}' | sudo tee /etc/systemd/system/form-relay.service >/dev/null \
                 && sudo systemctl daemon-reload"
            ),
        ),
        RemoteCommand::new(
            "enable form relay",
            "sudo systemctl enable --now form-relay",
        ),
        RemoteCommand::new("restart web server", "sudo systemctl restart nginx"),
        RemoteCommand::new(
            "confirm services active",
            "sudo systemctl is-active nginx form-relay",
        ),
    ]);

    commands
}

/// Result of one configuration pass.
pub struct ConfigureOutcome {
    pub commands_run: u32,
    /// Highest attempt count any single command consumed.
    pub max_attempts_used: u32,
    pub first_error: Option<MigrationError>,
    /// A cancellation checkpoint fired before the sequence finished.
    pub interrupted: bool,
}

/// Execute the command sequence against the compute handle.
pub async fn run_configure(
    plan: &MigrationPlan,
    compute: &ResourceHandle,
    storage_endpoint: &str,
    commands: &Arc<dyn CommandChannel>,
    policy: RetryPolicy,
    timeout: Duration,
    cancel: &CancelToken,
) -> ConfigureOutcome {
    let sequence = command_plan(plan, storage_endpoint);
    let mut outcome = ConfigureOutcome {
        commands_run: 0,
        max_attempts_used: 0,
        first_error: None,
        interrupted: false,
    };

    for step in sequence {
        if cancel.is_cancelled() {
            tracing::warn!(
                label = step.label,
                "Cancellation requested, aborting remaining command sequence"
            );
            outcome.interrupted = true;
            break;
        }

        tracing::info!(label = step.label, host = compute.endpoint, "Running remote command");
        let channel = commands.clone();
        let target = compute.clone();
        let command = step.command.clone();
        let op = format!("remote command '{}'", step.label);
        let result = with_retry(&policy, &op, move || {
            let channel = channel.clone();
            let target = target.clone();
            let command = command.clone();
            async move {
                let output =
                    gateway_call(move || channel.exec(&target, &command, timeout)).await?;
                if output.success() {
                    Ok(output)
                } else {
                    // Non-zero exit is a host configuration error; retrying
                    // the same command against the same state cannot help.
                    Err(MigrationError::Gateway(GatewayError::remote_command(
                        "NONZERO_EXIT",
                        format!(
                            "exit code {}: {}",
                            output.exit_code,
                            output.stderr.trim()
                        ),
                    )))
                }
            }
        })
        .await;

        match result {
            Ok((_, attempts)) => {
                outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                outcome.commands_run += 1;
            }
            Err((err, attempts)) => {
                outcome.max_attempts_used = outcome.max_attempts_used.max(attempts);
                tracing::error!(label = step.label, "Remote command failed: {err}");
                outcome.first_error = Some(err);
                // Later commands assume this one's side effects.
                break;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ExecOutput;
    use siteferry_types::plan::{
        ComputeSpec, DnsSpec, FormRouting, FunctionSpec, ProcessingOptions, SourceRef, StorageSpec,
    };
    use siteferry_types::resource::ResourceKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn plan(with_dns: bool) -> MigrationPlan {
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
            dns: with_dns.then(|| DnsSpec {
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
            tls_email: with_dns.then(|| "ops@demo.example".to_string()),
            dry_run: false,
        }
    }

    fn compute_handle() -> ResourceHandle {
        ResourceHandle {
            kind: ResourceKind::Compute,
            external_id: "demo-web".into(),
            endpoint: "203.0.113.9".into(),
            created_at: "2026-08-01T00:00:00Z".into(),
        }
    }

    struct ScriptedChannel {
        seen: Mutex<Vec<String>>,
        fail_label_substring: Option<&'static str>,
        transient_failures_before: u32,
        calls: AtomicU32,
    }

    impl ScriptedChannel {
        fn ok() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_label_substring: None,
                transient_failures_before: 0,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl CommandChannel for ScriptedChannel {
        fn exec(
            &self,
            _target: &ResourceHandle,
            command: &str,
            _timeout: Duration,
        ) -> Result<ExecOutput, GatewayError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.transient_failures_before {
                return Err(GatewayError::transient_network("SSH_RESET", "connection reset"));
            }
            self.seen.lock().unwrap().push(command.to_string());
            if let Some(marker) = self.fail_label_substring {
                if command.contains(marker) {
                    return Ok(ExecOutput {
                        exit_code: 1,
                        stdout: String::new(),
                        stderr: "unit not found".into(),
                    });
                }
            }
            Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn command_plan_is_ordered_and_ends_with_service_checks() {
        let plan = plan(true);
        let commands = command_plan(&plan, "gs://demo-content");
        let labels: Vec<&str> = commands.iter().map(|c| c.label.as_str()).collect();

        let pos = |needle: &str| labels.iter().position(|l| *l == needle).unwrap();
        assert!(pos("refresh package index") < pos("install packages"));
        assert!(pos("install packages") < pos("sync bundle from bucket"));
        assert!(pos("sync bundle from bucket") < pos("write web server config"));
        assert!(pos("issue certificate") < pos("restart web server"));
        assert_eq!(*labels.last().unwrap(), "confirm services active");

        // The sync command targets the real bucket endpoint.
        assert!(commands
            .iter()
            .any(|c| c.command.contains("gs://demo-content")));
    }

    #[test]
    fn host_extras_append_when_enabled() {
        let mut plan = plan(false);
        assert!(!command_plan(&plan, "gs://b")
            .iter()
            .any(|c| c.label.contains("monitoring") || c.label.contains("backup")));

        plan.host.monitoring = true;
        plan.host.auto_backup = true;
        let commands = command_plan(&plan, "gs://b");
        assert!(commands.iter().any(|c| c.label == "install monitoring tools"));
        assert!(commands.iter().any(|c| c.label == "install backup script"));
        assert!(commands
            .iter()
            .any(|c| c.command.contains("crontab")));
        // Extras come before the relay unit and final restart.
        let labels: Vec<&str> = commands.iter().map(|c| c.label.as_str()).collect();
        let pos = |needle: &str| labels.iter().position(|l| *l == needle).unwrap();
        assert!(pos("install monitoring tools") < pos("install form relay unit"));
        assert_eq!(*labels.last().unwrap(), "confirm services active");
    }

    #[test]
    fn command_plan_without_dns_skips_certificates() {
        let commands = command_plan(&plan(false), "gs://demo-content");
        assert!(!commands.iter().any(|c| c.label.contains("certificate")));
        // Nginx serves under the catch-all name instead of a domain.
        assert!(commands
            .iter()
            .any(|c| c.command.contains("server_name _;")));
    }

    #[tokio::test]
    async fn runs_every_command_in_order() {
        let channel_impl = Arc::new(ScriptedChannel::ok());
        let channel: Arc<dyn CommandChannel> = channel_impl.clone();
        let plan = plan(false);

        let outcome = run_configure(
            &plan,
            &compute_handle(),
            "gs://demo-content",
            &channel,
            RetryPolicy::default(),
            Duration::from_secs(30),
            &CancelToken::new(),
        )
        .await;

        assert!(outcome.first_error.is_none());
        let expected = command_plan(&plan, "gs://demo-content");
        let seen = channel_impl.seen.lock().unwrap();
        assert_eq!(outcome.commands_run as usize, expected.len());
        let expected_commands: Vec<String> =
            expected.iter().map(|c| c.command.clone()).collect();
        assert_eq!(*seen, expected_commands);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_transport_failure_retries_single_command() {
        let channel_impl = Arc::new(ScriptedChannel {
            transient_failures_before: 2,
            ..ScriptedChannel::ok()
        });
        let channel: Arc<dyn CommandChannel> = channel_impl.clone();
        let plan = plan(false);

        let outcome = run_configure(
            &plan,
            &compute_handle(),
            "gs://demo-content",
            &channel,
            RetryPolicy::with_max_attempts(4),
            Duration::from_secs(30),
            &CancelToken::new(),
        )
        .await;

        assert!(outcome.first_error.is_none());
        assert_eq!(outcome.max_attempts_used, 3);
        assert_eq!(
            outcome.commands_run as usize,
            command_plan(&plan, "gs://demo-content").len()
        );
    }

    #[tokio::test]
    async fn nonzero_exit_aborts_remaining_sequence() {
        let channel_impl = Arc::new(ScriptedChannel {
            fail_label_substring: Some("systemctl enable"),
            ..ScriptedChannel::ok()
        });
        let channel: Arc<dyn CommandChannel> = channel_impl.clone();
        let plan = plan(false);

        let outcome = run_configure(
            &plan,
            &compute_handle(),
            "gs://demo-content",
            &channel,
            RetryPolicy::default(),
            Duration::from_secs(30),
            &CancelToken::new(),
        )
        .await;

        let err = outcome.first_error.unwrap();
        assert!(!err.is_retryable());
        let category = err.as_gateway_error().unwrap().category;
        assert_eq!(category, siteferry_types::error::ErrorCategory::RemoteCommand);

        // Nothing after the failing step ran.
        let seen = channel_impl.seen.lock().unwrap();
        assert!(!seen.iter().any(|c| c.contains("restart nginx")));
    }
}
