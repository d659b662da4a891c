//! Semantic validation for parsed migration configuration values.

use anyhow::{bail, Result};

use crate::config::types::MigrationConfig;

fn looks_like_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.')
}

/// Bucket naming rules shared by the major providers: lowercase letters,
/// digits, dashes, dots; no leading/trailing separator.
fn valid_bucket_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && !name.starts_with(['-', '.'])
        && !name.ends_with(['-', '.'])
}

/// Validate a parsed migration configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &MigrationConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.name.trim().is_empty() {
        errors.push("Migration name must not be empty".to_string());
    }

    if !looks_like_url(&config.source.base_url) {
        errors.push(format!(
            "Source base_url '{}' must start with http:// or https://",
            config.source.base_url
        ));
    }

    // Partial API credentials are worse than none: extraction would start
    // authenticated and then fail halfway.
    let api_fields = [
        config.source.api_key.is_some(),
        config.source.secret_key.is_some(),
        config.source.project_id.is_some(),
    ];
    if api_fields.iter().any(|p| *p) && !api_fields.iter().all(|p| *p) {
        errors.push(
            "Source API extraction needs api_key, secret_key, and project_id together".to_string(),
        );
    }

    if config.cloud.project_id.trim().is_empty() {
        errors.push("Cloud project_id must not be empty".to_string());
    }
    if config.cloud.credentials_file.trim().is_empty() {
        errors.push("Cloud credentials_file must not be empty".to_string());
    }
    if config.cloud.compute.name.trim().is_empty() {
        errors.push("Compute instance name must not be empty".to_string());
    }
    if config.cloud.compute.disk_gb == 0 {
        errors.push("Compute disk_gb must be at least 1".to_string());
    }
    if !valid_bucket_name(&config.cloud.storage.bucket) {
        errors.push(format!(
            "Invalid storage bucket name '{}'",
            config.cloud.storage.bucket
        ));
    }

    if let Some(dns) = &config.cloud.dns {
        if !dns.domain.contains('.') {
            errors.push(format!("DNS domain '{}' is not a valid hostname", dns.domain));
        }
        if dns.zone.trim().is_empty() {
            errors.push("DNS zone must not be empty".to_string());
        }
        match &config.cloud.tls_email {
            Some(email) if looks_like_email(email) => {}
            Some(email) => errors.push(format!("tls_email '{email}' is not a valid address")),
            None => errors.push(
                "A DNS domain is configured but tls_email is missing; certificate issuance needs it"
                    .to_string(),
            ),
        }
    }

    if !config.forms.endpoint_path.starts_with('/') {
        errors.push(format!(
            "Form endpoint_path '{}' must start with '/'",
            config.forms.endpoint_path
        ));
    }
    if !looks_like_email(&config.forms.notify_email) {
        errors.push(format!(
            "Form notify_email '{}' is not a valid address",
            config.forms.notify_email
        ));
    }

    if config.resources.fetch_concurrency == 0 {
        errors.push("fetch_concurrency must be at least 1".to_string());
    }
    if config.resources.max_attempts == 0 {
        errors.push("max_attempts must be at least 1".to_string());
    }
    if config.resources.command_timeout_seconds == 0 {
        errors.push("command_timeout_seconds must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Configuration validation failed:\n  - {}", errors.join("\n  - "));
    }
}
