//! Shared HTTP plumbing: client construction and error classification.

use std::time::Duration;

use siteferry_types::error::GatewayError;

/// Default per-request timeout for source fetches and probes.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a blocking HTTP client with sane defaults.
///
/// # Errors
///
/// Returns a classified error if the TLS backend fails to initialize.
pub fn client() -> Result<reqwest::blocking::Client, GatewayError> {
    reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("siteferry/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| GatewayError::internal("HTTP_CLIENT", format!("failed to build client: {e}")))
}

/// Classify a transport-level reqwest error.
#[must_use]
pub fn classify_transport(err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::timeout("HTTP_TIMEOUT", err.to_string())
    } else if err.is_connect() {
        GatewayError::transient_network("HTTP_CONNECT", err.to_string())
    } else {
        GatewayError::internal("HTTP", err.to_string())
    }
}

/// Classify a non-success HTTP status for a given URL.
#[must_use]
pub fn classify_status(status: u16, url: &str, retry_after_ms: Option<u64>) -> GatewayError {
    match status {
        401 | 403 => GatewayError::auth("HTTP_DENIED", format!("{url} answered HTTP {status}")),
        404 | 410 => GatewayError::not_found("HTTP_GONE", format!("{url} answered HTTP {status}")),
        429 => GatewayError::rate_limited(
            "HTTP_THROTTLED",
            format!("{url} answered HTTP 429"),
            retry_after_ms,
        ),
        500..=599 => GatewayError::transient_network(
            "HTTP_SERVER_ERROR",
            format!("{url} answered HTTP {status}"),
        ),
        _ => GatewayError::internal("HTTP_STATUS", format!("{url} answered HTTP {status}")),
    }
}

/// Parse a `Retry-After` header value (seconds form only) into milliseconds.
#[must_use]
pub fn retry_after_ms(value: Option<&str>) -> Option<u64> {
    value?.trim().parse::<u64>().ok().map(|s| s * 1000)
}
