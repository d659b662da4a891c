//! Concrete gateway adapters for the siteferry migration engine.
//!
//! Everything here is a thin shell over an external system: an HTTP client
//! for the source site, the provider CLI for cloud resources and remote
//! commands, and an HTTP probe for health checks. The orchestration
//! invariants live in `siteferry-engine`; adapters only translate calls and
//! classify failures.

#![warn(clippy::pedantic)]

pub mod cloud;
pub mod content;
pub mod http;
pub mod probe;
pub mod ssh;

pub use cloud::CliCloudGateway;
pub use content::HttpContentGateway;
pub use probe::HttpProbe;
pub use ssh::CliCommandChannel;

use std::sync::Arc;

use siteferry_engine::gateway::Gateways;
use siteferry_engine::config::types::MigrationConfig;

/// Build the production gateway set from configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn build_gateways(config: &MigrationConfig) -> Result<Gateways, siteferry_types::error::GatewayError> {
    Ok(Gateways {
        content: Arc::new(HttpContentGateway::new(&config.source)?),
        cloud: Arc::new(CliCloudGateway::new(&config.cloud)),
        commands: Arc::new(CliCommandChannel::new(&config.cloud)),
        probe: Arc::new(HttpProbe::new()?),
    })
}
