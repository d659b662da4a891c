//! Command channel over the provider CLI's SSH wrapper.
//!
//! One command per call, executed through `gcloud compute ssh`. The child
//! is polled against the caller's timeout; a deadline hit kills the child
//! and surfaces a classified timeout so the engine's retry wrapper can
//! decide what happens next.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use siteferry_engine::config::types::CloudConfig;
use siteferry_engine::gateway::{CommandChannel, ExecOutput};
use siteferry_types::error::GatewayError;
use siteferry_types::resource::ResourceHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Command channel backed by the provider CLI's SSH wrapper.
pub struct CliCommandChannel {
    project: String,
    zone: String,
}

impl CliCommandChannel {
    #[must_use]
    pub fn new(cloud: &CloudConfig) -> Self {
        Self {
            project: cloud.project_id.clone(),
            zone: cloud.zone.clone(),
        }
    }

    fn ssh_args<'a>(&'a self, instance: &'a str, command: &'a str) -> Vec<&'a str> {
        vec![
            "compute",
            "ssh",
            instance,
            "--project",
            &self.project,
            "--zone",
            &self.zone,
            "--command",
            command,
        ]
    }
}

/// Classify a spawn/wait failure from the SSH wrapper.
fn classify_transport(message: String) -> GatewayError {
    let lowered = message.to_lowercase();
    if lowered.contains("connection refused")
        || lowered.contains("connection reset")
        || lowered.contains("broken pipe")
    {
        GatewayError::transient_network("SSH_CONNECT", message)
    } else {
        GatewayError::internal("SSH_SPAWN", message)
    }
}

impl CommandChannel for CliCommandChannel {
    fn exec(
        &self,
        target: &ResourceHandle,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, GatewayError> {
        tracing::debug!(
            instance = target.external_id,
            timeout_secs = timeout.as_secs(),
            "Executing remote command"
        );
        let mut child = Command::new("gcloud")
            .args(self.ssh_args(&target.external_id, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| classify_transport(format!("failed to spawn ssh wrapper: {e}")))?;

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(GatewayError::timeout(
                            "SSH_TIMEOUT",
                            format!(
                                "remote command on '{}' exceeded {}s",
                                target.external_id,
                                timeout.as_secs()
                            ),
                        ));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(classify_transport(format!("failed to wait for ssh: {e}")));
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| classify_transport(format!("failed to collect ssh output: {e}")))?;

        // The remote command completed; a non-zero exit is the caller's to
        // interpret, only transport-level failures are errors here.
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
