//! HTTP health probe for the finalization stage.

use crate::http::{classify_transport, client};
use siteferry_engine::gateway::HealthProbe;
use siteferry_types::error::GatewayError;

/// Health probe that issues a plain GET and reports the status code.
pub struct HttpProbe {
    client: reqwest::blocking::Client,
}

impl HttpProbe {
    /// Build the probe.
    ///
    /// # Errors
    ///
    /// Returns a classified error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, GatewayError> {
        Ok(Self { client: client()? })
    }
}

impl HealthProbe for HttpProbe {
    fn probe(&self, url: &str) -> Result<u16, GatewayError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| classify_transport(&e))?;
        Ok(response.status().as_u16())
    }
}
