//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::host::HostIdentity;

/// Default CloudAPI endpoint.
pub const DEFAULT_URL: &str = "https://us-east-1.api.joyent.com";
/// Default image reference.
pub const DEFAULT_IMAGE: &str = "debian-8";
/// Default package reference.
pub const DEFAULT_PACKAGE: &str = "k4-highcpu-kvm-250M";
/// Default SSH login user.
pub const DEFAULT_SSH_USER: &str = "root";
/// Default directory for per-machine files.
pub const DEFAULT_STORE_PATH: &str = ".trireme";

/// Triton account, credential, and machine settings derived from environment
/// variables, configuration files, and CLI flags.
///
/// Environment variables use the historic `SDC_` prefix.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SDC",
    discovery(
        app_name = "trireme",
        env_var = "TRIREME_CONFIG_PATH",
        config_file_name = "trireme.toml",
        dotfile_name = ".trireme.toml",
        project_file_name = "trireme.toml"
    )
)]
pub struct TritonConfig {
    /// Triton login name owning the machines.
    pub account: String,
    /// MD5 fingerprint of the signing key registered with the account.
    pub key_id: String,
    /// Path to an unencrypted PEM private key added to the account.
    pub key_path: Option<String>,
    /// Base64-encoded private key content, for hosts that cannot pass
    /// multi-line values. Takes precedence over `key_path`.
    pub key_material: Option<String>,
    /// CloudAPI endpoint.
    #[ortho_config(default = DEFAULT_URL.to_owned())]
    pub url: String,
    /// Image reference (`debian-8`, `debian-8@20150527`, `ca291f66`, ...).
    #[ortho_config(default = DEFAULT_IMAGE.to_owned())]
    pub image: String,
    /// Package (instance size) name or identifier.
    #[ortho_config(default = DEFAULT_PACKAGE.to_owned())]
    pub package: String,
    /// SSH login user for the provisioned machine.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// Display name for the machine. Generated when absent.
    pub machine_name: Option<String>,
    /// Exact identifier of a previously created machine.
    pub machine_id: Option<String>,
    /// Directory for per-machine files.
    #[ortho_config(default = DEFAULT_STORE_PATH.to_owned())]
    pub store_path: String,
    /// `openssl` executable used to sign requests.
    #[ortho_config(default = "openssl".to_owned())]
    pub openssl_bin: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl TritonConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to trireme.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("trireme")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields before any remote
    /// call is made.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.account,
            &FieldMetadata::new("Triton account", "SDC_ACCOUNT", "account"),
        )?;
        Self::require_field(
            &self.key_id,
            &FieldMetadata::new("signing key fingerprint", "SDC_KEY_ID", "key_id"),
        )?;
        Self::require_field(
            &self.url,
            &FieldMetadata::new("CloudAPI endpoint", "SDC_URL", "url"),
        )?;
        Self::require_field(
            &self.image,
            &FieldMetadata::new("VM image", "SDC_IMAGE", "image"),
        )?;
        Self::require_field(
            &self.package,
            &FieldMetadata::new("VM package", "SDC_PACKAGE", "package"),
        )?;
        Ok(())
    }

    /// Builds the host identity, generating a machine name when none is
    /// configured.
    #[must_use]
    pub fn host_identity(&self) -> HostIdentity {
        let name = self
            .machine_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(HostIdentity::generated_name, str::to_owned);
        HostIdentity::new(name, self.store_path.as_str(), self.ssh_user.as_str())
    }

    /// Returns the recorded machine identifier, ignoring blank values.
    #[must_use]
    pub fn recorded_machine_id(&self) -> Option<&str> {
        self.machine_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
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
