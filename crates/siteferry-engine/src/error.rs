//! Engine error model and retry backoff helpers.

use std::time::Duration;

use rand::Rng;
use siteferry_types::error::{BackoffClass, GatewayError};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// MigrationError — categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized engine error for retry decisions.
///
/// `Gateway` wraps a classified [`GatewayError`] with retry metadata.
/// `Exhausted` records a transient failure that hit the attempt bound and is
/// therefore permanent for reporting purposes. `Determinism` marks an
/// internal invariant violation (transformation produced different output
/// for identical input) and is always fatal. `Infrastructure` wraps opaque
/// host-side errors (state store, task panics) that are never retryable.
#[derive(Debug)]
pub enum MigrationError {
    /// Classified gateway error with retry metadata.
    Gateway(GatewayError),
    /// Transient failure that exhausted its retry budget.
    Exhausted {
        op: String,
        attempts: u32,
        source: GatewayError,
    },
    /// Transformation determinism invariant broken. Signals a bug.
    Determinism(String),
    /// Infrastructure error (state store, join/panic, filesystem).
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(e) => write!(f, "{e}"),
            Self::Exhausted { op, attempts, source } => {
                write!(f, "'{op}' failed after {attempts} attempts: {source}")
            }
            Self::Determinism(msg) => write!(f, "determinism violation: {msg}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<anyhow::Error> for MigrationError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<GatewayError> for MigrationError {
    fn from(e: GatewayError) -> Self {
        Self::Gateway(e)
    }
}

impl MigrationError {
    /// Returns `true` only for gateway errors classified as transient.
    /// Exhausted errors are permanent by construction.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.retryable,
            Self::Exhausted { .. } | Self::Determinism(_) | Self::Infrastructure(_) => false,
        }
    }

    /// Returns `true` for failures that a resume cannot fix without
    /// operator intervention (auth, quota) or that signal a bug
    /// (determinism violation).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Gateway(e) | Self::Exhausted { source: e, .. } => e.is_fatal(),
            Self::Determinism(_) => true,
            Self::Infrastructure(_) => false,
        }
    }

    /// The classified gateway error, if any.
    #[must_use]
    pub fn as_gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Self::Gateway(e) | Self::Exhausted { source: e, .. } => Some(e),
            Self::Determinism(_) | Self::Infrastructure(_) => None,
        }
    }
}

/// Compute retry delay from error hints and the attempt number.
///
/// Exponential on the error's backoff class with full jitter, capped at
/// 60 s. A server-provided `retry_after_ms` hint wins outright.
pub(crate) fn compute_backoff(err: &GatewayError, attempt: u32) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let base_ms: u64 = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let ceiling_ms = base_ms
        .saturating_mul(2u64.pow(attempt.saturating_sub(1).min(16)))
        .min(BACKOFF_MAX_MS);
    // Full jitter: uniform in [ceiling/2, ceiling] so concurrent retries
    // don't synchronize against the same remote endpoint.
    let floor_ms = ceiling_ms / 2;
    let jittered = rand::thread_rng().gen_range(floor_ms..=ceiling_ms.max(floor_ms + 1));
    Duration::from_millis(jittered.min(BACKOFF_MAX_MS))
}
