//! Migration YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::MigrationConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut errors = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                errors.push(var_name.to_string());
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", errors.join(", "));
    }

    Ok(result)
}

/// Parse a migration YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<MigrationConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: MigrationConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse migration YAML")?;
    Ok(config)
}

/// Parse a migration YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<MigrationConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_substitution() {
        std::env::set_var("SF_TEST_KEY", "abc123");
        let input = "api_key: ${SF_TEST_KEY}";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("abc123"));
        assert!(!result.contains("${SF_TEST_KEY}"));
        std::env::remove_var("SF_TEST_KEY");
    }

    #[test]
    fn no_env_vars_passthrough() {
        let input = "base_url: https://demo.example";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn missing_env_vars_all_reported() {
        let input = "${SF_MISSING_A} and ${SF_MISSING_B}";
        let err = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err.contains("SF_MISSING_A"));
        assert!(err.contains("SF_MISSING_B"));
    }

    #[test]
    fn parse_config_from_string() {
        std::env::set_var("SF_TEST_NOTIFY", "owner@demo.example");
        let yaml = r#"
name: demo
source:
  base_url: https://demo.example
cloud:
  project_id: demo-project
  region: us-central1
  zone: us-central1-a
  credentials_file: /tmp/creds.json
  compute:
    name: demo-web
    machine_type: e2-small
    disk_gb: 20
  storage:
    bucket: demo-content
    location: us-central1
  function:
    name: demo-forms
    runtime: python312
    region: us-central1
forms:
  notify_email: ${SF_TEST_NOTIFY}
"#;
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.forms.notify_email, "owner@demo.example");
        std::env::remove_var("SF_TEST_NOTIFY");
    }

    #[test]
    fn parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn parse_config_file_not_found() {
        let result = parse_config(Path::new("/nonexistent/migration.yaml"));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Failed to read config file"));
    }
}
