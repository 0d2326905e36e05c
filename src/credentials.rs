//! Private key handling and request signing.
//!
//! CloudAPI authenticates every request with an HTTP signature over the
//! `date` header. This module locates the account's private key, either from
//! a path or from base64-encoded key material, and exposes the
//! [`RequestSigner`] seam used by the HTTP client. The shipped signer
//! delegates the RSA-SHA256 signature to `openssl`.

use std::future::Future;
use std::io::{self, Write as _};
use std::pin::Pin;
use std::process::Stdio;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use crate::config::TritonConfig;
use crate::host::HostIdentity;

/// Signature algorithm advertised in the `Authorization` header.
pub const SIGNATURE_ALGORITHM: &str = "rsa-sha256";

const ENCRYPTED_MARKER: &str = "Proc-Type: 4,ENCRYPTED";

/// Errors raised while loading keys or signing requests.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// The configured key material is not valid base64.
    #[error("failed to base64 decode key_material: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
    /// A key file could not be read or written.
    #[error("failed to access key {path}: {message}")]
    Io {
        /// Key file path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The key file holds no PEM private key.
    #[error("failed to read key material '{path}': no key found")]
    NoKey {
        /// Key file path.
        path: Utf8PathBuf,
    },
    /// The key file is password protected.
    #[error(
        "failed to read key '{path}': password protected keys are not supported; decrypt the key first"
    )]
    Encrypted {
        /// Key file path.
        path: Utf8PathBuf,
    },
    /// A key file from an earlier run differs from the configured material.
    #[error("key file '{path}' does not hold the configured key_material; remove it and retry")]
    StaleKey {
        /// Key file path.
        path: Utf8PathBuf,
    },
    /// Neither a key path nor key material was configured.
    #[error("no private key configured: set SDC_KEY_PATH or SDC_KEY_MATERIAL (SSH agent signing is not supported)")]
    NoKeyConfigured,
    /// The signing process failed.
    #[error("failed to sign request: {0}")]
    Sign(String),
}

/// Future returned by [`RequestSigner::sign`].
pub type SignFuture<'a> = Pin<Box<dyn Future<Output = Result<String, CredentialError>> + Send + 'a>>;

/// Produces base64 signatures for CloudAPI requests.
pub trait RequestSigner: Send + Sync {
    /// Fingerprint of the signing key registered with the account.
    fn key_id(&self) -> &str;

    /// Signs `signing_string` and returns the base64-encoded signature.
    fn sign<'a>(&'a self, signing_string: &'a str) -> SignFuture<'a>;
}

/// Signs requests by piping the signing string through `openssl dgst`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpensslSigner {
    key_id: String,
    key_path: Utf8PathBuf,
    openssl_bin: String,
}

impl OpensslSigner {
    /// Creates a signer for the key at `key_path`.
    #[must_use]
    pub fn new(
        key_id: impl Into<String>,
        key_path: impl Into<Utf8PathBuf>,
        openssl_bin: impl Into<String>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            key_path: key_path.into(),
            openssl_bin: openssl_bin.into(),
        }
    }

    /// Path of the private key used for signing.
    #[must_use]
    pub fn key_path(&self) -> &Utf8Path {
        &self.key_path
    }

    async fn run(&self, signing_string: &str) -> Result<String, CredentialError> {
        let mut child = Command::new(&self.openssl_bin)
            .args(["dgst", "-sha256", "-sign"])
            .arg(self.key_path.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| CredentialError::Sign(format!("{}: {err}", self.openssl_bin)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(signing_string.as_bytes())
                .await
                .map_err(|err| CredentialError::Sign(err.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| CredentialError::Sign(err.to_string()))?;
        if !output.status.success() {
            return Err(CredentialError::Sign(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ));
        }
        Ok(STANDARD.encode(output.stdout))
    }
}

impl RequestSigner for OpensslSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn sign<'a>(&'a self, signing_string: &'a str) -> SignFuture<'a> {
        Box::pin(self.run(signing_string))
    }
}

/// Decodes base64 key material into the PEM text it carries.
///
/// # Errors
///
/// Returns [`CredentialError::Decode`] when the input is not valid base64 or
/// does not decode to UTF-8.
pub fn decode_key_material(encoded: &str) -> Result<String, CredentialError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| CredentialError::Decode {
            message: err.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|err| CredentialError::Decode {
        message: err.to_string(),
    })
}

/// Checks that `contents` holds an unencrypted PEM private key.
///
/// # Errors
///
/// Returns [`CredentialError::NoKey`] when no PEM private key block is
/// present and [`CredentialError::Encrypted`] for password-protected keys.
pub fn check_private_key(path: &Utf8Path, contents: &str) -> Result<(), CredentialError> {
    let has_block = contents
        .lines()
        .any(|line| line.starts_with("-----BEGIN ") && line.ends_with("PRIVATE KEY-----"));
    if !has_block {
        return Err(CredentialError::NoKey {
            path: path.to_path_buf(),
        });
    }
    if contents.contains(ENCRYPTED_MARKER) {
        return Err(CredentialError::Encrypted {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Path of the file that decoded key material is written to.
#[must_use]
pub fn material_key_path(host: &HostIdentity, account: &str) -> Utf8PathBuf {
    host.resolve_store_path(&format!("id_rsa_triton_{account}"))
}

/// Returns the SSH private key path for the machine, if one is configured.
#[must_use]
pub fn ssh_key_path(config: &TritonConfig, host: &HostIdentity) -> Option<Utf8PathBuf> {
    if config.key_material.as_deref().is_some_and(|m| !m.trim().is_empty()) {
        return Some(material_key_path(host, &config.account));
    }
    config
        .key_path
        .as_deref()
        .filter(|path| !path.trim().is_empty())
        .map(Utf8PathBuf::from)
}

/// Writes decoded key material to `path` unless the file already exists.
///
/// The file is created exclusively with mode `0600` on Unix, so the key is
/// never readable by other users. Returns `true` when the file was written.
///
/// # Errors
///
/// Returns [`CredentialError::Io`] when the directory or file cannot be
/// created.
pub fn write_key_material(path: &Utf8Path, pem: &str) -> Result<bool, CredentialError> {
    let io_error = |err: io::Error| CredentialError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| CredentialError::Io {
        path: path.to_path_buf(),
        message: String::from("key path is missing a filename"),
    })?;

    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(io_error)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;
    let mut file = match dir.open_with(file_name, &key_file_options()) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(io_error(err)),
    };

    let mut contents = pem.trim_end().to_owned();
    contents.push('\n');
    file.write_all(contents.as_bytes()).map_err(io_error)?;
    Ok(true)
}

fn key_file_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use cap_std::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn read_key(path: &Utf8Path) -> Result<String, CredentialError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| CredentialError::Io {
        path: path.to_path_buf(),
        message: String::from("key path is missing a filename"),
    })?;
    Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.read_to_string(file_name))
        .map_err(|err| CredentialError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn ensure_material_matches(path: &Utf8Path, pem: &str) -> Result<(), CredentialError> {
    let existing = read_key(path)?;
    check_private_key(path, &existing)?;
    if existing.trim_end() != pem.trim_end() {
        return Err(CredentialError::StaleKey {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Builds the request signer described by the configuration.
///
/// Key material is decoded and written to the store directory (once) so the
/// host can also use it for SSH. A key file left by an earlier run must hold
/// the same material. Otherwise the configured key path is checked for an
/// unencrypted PEM key.
///
/// # Errors
///
/// Returns [`CredentialError`] when no key is configured or the key cannot
/// be decoded, written, read, or accepted.
pub fn signer_from_config(
    config: &TritonConfig,
    host: &HostIdentity,
) -> Result<OpensslSigner, CredentialError> {
    if let Some(encoded) = config
        .key_material
        .as_deref()
        .filter(|m| !m.trim().is_empty())
    {
        let pem = decode_key_material(encoded)?;
        let path = material_key_path(host, &config.account);
        check_private_key(&path, &pem)?;
        if write_key_material(&path, &pem)? {
            info!("wrote decoded key material to {path}");
        } else {
            ensure_material_matches(&path, &pem)?;
        }
        return Ok(OpensslSigner::new(&config.key_id, path, &config.openssl_bin));
    }

    let path = config
        .key_path
        .as_deref()
        .filter(|path| !path.trim().is_empty())
        .map(Utf8PathBuf::from)
        .ok_or(CredentialError::NoKeyConfigured)?;
    let contents = read_key(&path)?;
    check_private_key(&path, &contents)?;
    Ok(OpensslSigner::new(&config.key_id, path, &config.openssl_bin))
}
