//! Identity of the managed host as seen by the orchestrator.

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;

/// Prefix used for generated machine names.
pub const GENERATED_NAME_PREFIX: &str = "trireme-";

/// Name, local store location, and login user of one managed machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostIdentity {
    machine_name: String,
    store_path: Utf8PathBuf,
    ssh_user: String,
}

impl HostIdentity {
    /// Creates an identity from its parts.
    #[must_use]
    pub fn new(
        machine_name: impl Into<String>,
        store_path: impl Into<Utf8PathBuf>,
        ssh_user: impl Into<String>,
    ) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ssh_user: ssh_user.into(),
        }
    }

    /// Generates a fresh machine name of the form `trireme-<uuid>`.
    #[must_use]
    pub fn generated_name() -> String {
        format!("{GENERATED_NAME_PREFIX}{}", Uuid::new_v4().simple())
    }

    /// Display name of the machine.
    #[must_use]
    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Directory holding per-machine files such as decoded keys.
    #[must_use]
    pub fn store_path(&self) -> &Utf8Path {
        &self.store_path
    }

    /// User for SSH logins to the machine.
    #[must_use]
    pub fn ssh_user(&self) -> &str {
        &self.ssh_user
    }

    /// Resolves `file` relative to the store directory.
    #[must_use]
    pub fn resolve_store_path(&self, file: &str) -> Utf8PathBuf {
        self.store_path.join(file)
    }
}
