//! Configuration loading via `ortho-config`.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::SshDefaults;

/// Application configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "GANTRY")]
pub struct GantryConfig {
    /// Provider API key used as the bearer token. This value is required.
    pub api_key: String,
    /// Remote username for SSH sessions. Rental pods run as `root`.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Path to the SSH private key; a leading `~/` expands to the home
    /// directory at resolution time.
    #[ortho_config(default = "~/.ssh/id_ed25519".to_owned())]
    pub ssh_key_path: String,
    /// Network volume attached to the tracker pod. Required only by the
    /// dashboard command.
    pub network_volume_id: Option<String>,
    /// Local env file pushed to task pods during bootstrap.
    #[ortho_config(default = ".env".to_owned())]
    pub env_file: String,
    /// Port the tracker daemon listens on, and the local end of the
    /// dashboard tunnel.
    #[ortho_config(default = 8237)]
    pub dashboard_port: u16,
    /// Verify remote host keys against `~/.ssh/known_hosts` instead of
    /// trusting on first use.
    #[ortho_config(default = false)]
    pub verify_host_key: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl GantryConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to gantry.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("gantry")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values via environment
    /// variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_key,
            &FieldMetadata::new("provider API key", "GANTRY_API_KEY", "api_key"),
        )?;
        Self::require_field(
            &self.ssh_user,
            &FieldMetadata::new("SSH username", "GANTRY_SSH_USER", "ssh_user"),
        )?;
        Self::require_field(
            &self.ssh_key_path,
            &FieldMetadata::new("SSH key path", "GANTRY_SSH_KEY_PATH", "ssh_key_path"),
        )?;
        Self::require_field(
            &self.env_file,
            &FieldMetadata::new("env file path", "GANTRY_ENV_FILE", "env_file"),
        )?;
        Ok(())
    }

    /// Defaults feeding the credential resolver.
    #[must_use]
    pub fn ssh_defaults(&self) -> SshDefaults {
        SshDefaults {
            user: self.ssh_user.clone(),
            key_path: self.ssh_key_path.clone(),
        }
    }

    /// Configured env file as a UTF-8 path.
    #[must_use]
    pub fn env_file_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.env_file)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;

    fn config_with(api_key: &str) -> GantryConfig {
        GantryConfig {
            api_key: api_key.to_owned(),
            ssh_user: String::from("root"),
            ssh_key_path: String::from("~/.ssh/id_ed25519"),
            network_volume_id: None,
            env_file: String::from(".env"),
            dashboard_port: 8237,
            verify_host_key: false,
        }
    }

    #[test]
    fn validate_accepts_populated_config() {
        config_with("rp-key").validate().expect("should validate");
    }

    #[test]
    fn validate_names_the_env_var_that_fixes_a_missing_key() {
        let err = config_with("  ")
            .validate()
            .expect_err("blank api key should fail");
        let ConfigError::MissingField(message) = err else {
            panic!("expected MissingField, got {err:?}");
        };
        assert!(message.contains("GANTRY_API_KEY"), "message: {message}");
        assert!(message.contains("api_key"), "message: {message}");
    }

    #[test]
    fn ssh_defaults_mirror_configured_values() {
        let defaults = config_with("rp-key").ssh_defaults();
        assert_eq!(defaults.user, "root");
        assert_eq!(defaults.key_path, "~/.ssh/id_ed25519");
    }

    #[tokio::test]
    async fn load_reads_prefixed_environment_variables() {
        let _guard = EnvGuard::set_vars(&[
            ("GANTRY_API_KEY", "rp-test-key"),
            ("GANTRY_DASHBOARD_PORT", "9001"),
        ])
        .await;

        let config = GantryConfig::load_without_cli_args().expect("load should succeed");
        assert_eq!(config.api_key, "rp-test-key");
        assert_eq!(config.dashboard_port, 9001);
        assert_eq!(config.ssh_user, "root", "default applies");
        assert!(!config.verify_host_key, "default applies");
    }
}
