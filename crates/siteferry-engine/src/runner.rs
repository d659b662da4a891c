//! Stage runner: the retry/backoff wrapper every gateway call goes through.

use std::future::Future;

use crate::error::{compute_backoff, MigrationError};
use siteferry_types::error::GatewayError;

/// Retry policy for remote operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempt bound including the first try.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4 }
    }
}

impl RetryPolicy {
    /// Policy with an explicit attempt bound (clamped to at least 1).
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Run one remote operation under the retry policy.
///
/// The closure is invoked once per attempt. Transient failures sleep the
/// computed backoff and retry up to `policy.max_attempts`; exhausting the
/// bound converts the failure into the permanent
/// [`MigrationError::Exhausted`], carrying the attempt count for reporting.
/// Permanent failures return immediately with the attempt count so far.
///
/// # Errors
///
/// Returns the terminal error along with how many attempts were spent.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &str,
    f: F,
) -> Result<(T, u32), (MigrationError, u32)>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, MigrationError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                // is_retryable() implies a classified gateway error exists.
                let Some(gateway_err) = err.as_gateway_error() else {
                    return Err((err, attempt));
                };
                let delay = compute_backoff(gateway_err, attempt);
                tracing::warn!(
                    op,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    category = %gateway_err.category,
                    code = %gateway_err.code,
                    "Transient failure, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                let terminal = match err {
                    MigrationError::Gateway(source) if source.retryable => {
                        tracing::error!(
                            op,
                            attempts = attempt,
                            category = %source.category,
                            code = %source.code,
                            "Retry budget exhausted, converting to permanent failure"
                        );
                        MigrationError::Exhausted {
                            op: op.to_string(),
                            attempts: attempt,
                            source,
                        }
                    }
                    other => {
                        tracing::error!(op, attempts = attempt, "Permanent failure: {other}");
                        other
                    }
                };
                return Err((terminal, attempt));
            }
        }
    }
}

/// Run a blocking gateway call on the blocking pool, mapping both the
/// classified error and a task panic into [`MigrationError`].
///
/// # Errors
///
/// Returns [`MigrationError::Gateway`] for classified failures and
/// [`MigrationError::Infrastructure`] if the blocking task panicked.
pub async fn gateway_call<T, F>(f: F) -> Result<T, MigrationError>
where
    F: FnOnce() -> Result<T, GatewayError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MigrationError::Infrastructure(anyhow::anyhow!("gateway task panicked: {e}")))?
        .map_err(MigrationError::Gateway)
}
