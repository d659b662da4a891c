//! Structured error model for gateway operations.
//!
//! [`GatewayError`] carries classification and retry metadata. This
//! classification is the single decision point the retry machinery trusts:
//! a transient category retries with backoff, everything else fails fast.
//! Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a gateway error.
///
/// Determines default retry behavior and operator-facing categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid configuration or malformed request.
    Config,
    /// Authentication failure. Fatal: requires an operator credential fix.
    Auth,
    /// Provider quota exhausted. Fatal: no amount of retrying helps.
    Quota,
    /// Rate limit response (retryable, slow backoff).
    RateLimited,
    /// Transient network error: reset, refused, DNS blip (retryable).
    TransientNetwork,
    /// Remote operation or command timed out (retryable).
    Timeout,
    /// Requested item does not exist.
    NotFound,
    /// Resource already exists. At ensure sites, exists means success.
    AlreadyExists,
    /// Remote command exited non-zero: a configuration error on the host.
    RemoteCommand,
    /// Deployed endpoint is reachable but not serving correctly.
    HealthCheck,
    /// Invalid or corrupt content payload.
    Data,
    /// Internal adapter error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::RateLimited => "rate_limited",
            Self::TransientNetwork => "transient_network",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::RemoteCommand => "remote_command",
            Self::HealthCheck => "health_check",
            Self::Data => "data",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Structured error from a gateway operation.
///
/// Carries classification and retry metadata. Construct via
/// category-specific factory methods (e.g. [`GatewayError::transient_network`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct GatewayError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
}

impl GatewayError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, BackoffClass::Normal, code, message)
    }

    /// Authentication error (fatal, not retryable).
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, false, BackoffClass::Normal, code, message)
    }

    /// Quota exhaustion (fatal, not retryable).
    #[must_use]
    pub fn quota(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Quota, false, BackoffClass::Normal, code, message)
    }

    /// Rate limit response (retryable, slow backoff, optional server hint).
    #[must_use]
    pub fn rate_limited(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(ErrorCategory::RateLimited, true, BackoffClass::Slow, code, message);
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Transient network error (retryable, normal backoff).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, true, BackoffClass::Normal, code, message)
    }

    /// Remote timeout (retryable, normal backoff).
    #[must_use]
    pub fn timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, true, BackoffClass::Normal, code, message)
    }

    /// Item not found (not retryable).
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, false, BackoffClass::Normal, code, message)
    }

    /// Resource already exists (not retryable; ensure sites treat as success).
    #[must_use]
    pub fn already_exists(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::AlreadyExists, false, BackoffClass::Normal, code, message)
    }

    /// Remote command exited non-zero (not retryable).
    #[must_use]
    pub fn remote_command(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::RemoteCommand, false, BackoffClass::Normal, code, message)
    }

    /// Endpoint reachable but unhealthy (not retryable).
    #[must_use]
    pub fn health_check(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::HealthCheck, false, BackoffClass::Normal, code, message)
    }

    /// Invalid or corrupt content payload (not retryable).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, false, BackoffClass::Normal, code, message)
    }

    /// Internal adapter error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, false, BackoffClass::Normal, code, message)
    }

    /// Returns `true` for categories that require an operator fix and must
    /// never be retried by a resume either (auth, quota).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.category, ErrorCategory::Auth | ErrorCategory::Quota)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_defaults() {
        let err = GatewayError::config("MISSING_BUCKET", "bucket name is required");
        assert_eq!(err.category, ErrorCategory::Config);
        assert!(!err.retryable);
        assert!(!err.is_fatal());
        assert_eq!(err.backoff_class, BackoffClass::Normal);
    }

    #[test]
    fn transient_errors_are_retryable() {
        let net = GatewayError::transient_network("CONN_RESET", "connection reset by peer");
        assert!(net.retryable);

        let timeout = GatewayError::timeout("EXEC_TIMEOUT", "command timed out");
        assert!(timeout.retryable);

        let rate = GatewayError::rate_limited("THROTTLED", "slow down", Some(5000));
        assert!(rate.retryable);
        assert_eq!(rate.retry_after_ms, Some(5000));
        assert_eq!(rate.backoff_class, BackoffClass::Slow);
    }

    #[test]
    fn auth_and_quota_are_fatal() {
        assert!(GatewayError::auth("BAD_CREDS", "invalid key").is_fatal());
        assert!(GatewayError::quota("QUOTA", "instance quota exceeded").is_fatal());
        assert!(!GatewayError::not_found("GONE", "no such page").is_fatal());
    }

    #[test]
    fn already_exists_is_permanent() {
        let err = GatewayError::already_exists("EXISTS", "bucket already exists");
        assert!(!err.retryable);
        assert_eq!(err.category, ErrorCategory::AlreadyExists);
    }

    #[test]
    fn display_format() {
        let err = GatewayError::remote_command("EXIT_1", "apt-get returned 1");
        assert_eq!(err.to_string(), "[remote_command] EXIT_1: apt-get returned 1");
    }

    #[test]
    fn serde_roundtrip() {
        let err = GatewayError::rate_limited("THROTTLED", "slow down", Some(2500));
        let json = serde_json::to_string(&err).unwrap();
        let back: GatewayError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
