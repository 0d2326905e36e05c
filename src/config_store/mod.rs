//! Persistent machine record updates for `trireme.toml`.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::ConfigDiscovery;
use ortho_config::toml;
use thiserror::Error;

const APP_NAME: &str = "trireme";
const CONFIG_ENV_VAR: &str = "TRIREME_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = "trireme.toml";
const DOTFILE_NAME: &str = ".trireme.toml";
const PROJECT_FILE_NAME: &str = "trireme.toml";

const MACHINE_ID_KEY: &str = "machine_id";
const MACHINE_NAME_KEY: &str = "machine_name";
const IMAGE_KEY: &str = "image";
const PACKAGE_KEY: &str = "package";

/// Errors raised while updating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Raised when no configuration candidates are available.
    #[error("no configuration file candidates were discovered")]
    NoCandidates,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when parsing existing TOML content fails.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when existing TOML has an unexpected structure.
    #[error("invalid configuration in {path}: {message}")]
    InvalidStructure {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a different machine is already recorded.
    #[error("machine {machine_id} is already recorded; remove it before creating another")]
    MachineAlreadyRecorded {
        /// Machine identifier already present in configuration.
        machine_id: String,
    },
}

/// Machine fields written back after a successful create.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistedMachine {
    /// Exact machine identifier returned by the provider.
    pub machine_id: String,
    /// Display name used at creation.
    pub machine_name: String,
    /// Exact image identifier the machine was created from.
    pub image: String,
    /// Package reference the machine was created with.
    pub package: String,
}

impl PersistedMachine {
    fn entries(&self) -> [(&'static str, &str); 4] {
        [
            (MACHINE_ID_KEY, self.machine_id.as_str()),
            (MACHINE_NAME_KEY, self.machine_name.as_str()),
            (IMAGE_KEY, self.image.as_str()),
            (PACKAGE_KEY, self.package.as_str()),
        ]
    }
}

/// Abstraction over configuration writers for dependency injection.
pub trait ConfigWriter {
    /// Returns the recorded machine identifier, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when the configuration file cannot be
    /// accessed or parsed.
    fn current_machine_id(&self) -> Result<Option<String>, ConfigStoreError>;

    /// Records a created machine. Rewriting the same identifier is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::MachineAlreadyRecorded`] when a different
    /// machine is recorded, or another [`ConfigStoreError`] when reading or
    /// updating the file fails.
    fn write_machine(&self, machine: &PersistedMachine) -> Result<Utf8PathBuf, ConfigStoreError>;

    /// Forgets the recorded machine identifier. Returns the updated path, or
    /// `None` when there was nothing to clear.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when reading or updating the file fails.
    fn clear_machine(&self) -> Result<Option<Utf8PathBuf>, ConfigStoreError>;
}

/// Updates `trireme.toml` using `OrthoConfig`'s discovery search order.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    discovery: ConfigDiscovery,
}

impl ConfigStore {
    /// Builds a config store using the standard discovery settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: ConfigDiscovery::builder(APP_NAME)
                .env_var(CONFIG_ENV_VAR)
                .config_file_name(CONFIG_FILE_NAME)
                .dotfile_name(DOTFILE_NAME)
                .project_file_name(PROJECT_FILE_NAME)
                .build(),
        }
    }

    /// Builds a config store using an explicit discovery configuration.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery) -> Self {
        Self { discovery }
    }

    fn resolve_target(&self) -> Result<ConfigTarget, ConfigStoreError> {
        let candidates = self.discovery.utf8_candidates();
        if candidates.is_empty() {
            return Err(ConfigStoreError::NoCandidates);
        }

        for candidate in &candidates {
            if path_exists(candidate)? {
                return Ok(ConfigTarget {
                    path: candidate.clone(),
                    exists: true,
                });
            }
        }

        let fallback = candidates
            .last()
            .cloned()
            .ok_or(ConfigStoreError::NoCandidates)?;
        Ok(ConfigTarget {
            path: fallback,
            exists: false,
        })
    }

    fn load(&self) -> Result<(ConfigTarget, toml::Value), ConfigStoreError> {
        let target = self.resolve_target()?;
        let contents = if target.exists {
            read_config(&target.path)?
        } else {
            String::new()
        };
        let value = parse_toml(&target.path, &contents)?;
        Ok((target, value))
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigWriter for ConfigStore {
    fn current_machine_id(&self) -> Result<Option<String>, ConfigStoreError> {
        let (target, value) = self.load()?;
        if !target.exists {
            return Ok(None);
        }
        read_machine_id(&target.path, &value)
    }

    fn write_machine(&self, machine: &PersistedMachine) -> Result<Utf8PathBuf, ConfigStoreError> {
        let (target, mut value) = self.load()?;
        if let Some(existing) = read_machine_id(&target.path, &value)?
            && existing != machine.machine_id.trim()
        {
            return Err(ConfigStoreError::MachineAlreadyRecorded {
                machine_id: existing,
            });
        }

        let table = root_table_mut(&target.path, &mut value)?;
        for (key, field) in machine.entries() {
            table.insert(key.to_owned(), toml::Value::String(field.trim().to_owned()));
        }
        write_config(&target.path, &value)?;
        Ok(target.path)
    }

    fn clear_machine(&self) -> Result<Option<Utf8PathBuf>, ConfigStoreError> {
        let (target, mut value) = self.load()?;
        if !target.exists {
            return Ok(None);
        }
        let table = root_table_mut(&target.path, &mut value)?;
        if table.remove(MACHINE_ID_KEY).is_none() {
            return Ok(None);
        }
        write_config(&target.path, &value)?;
        Ok(Some(target.path))
    }
}

#[derive(Clone, Debug)]
struct ConfigTarget {
    path: Utf8PathBuf,
    exists: bool,
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), ConfigStoreError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("configuration file path is missing a filename"),
        })?;
    Ok((parent, file_name))
}

fn path_exists(path: &Utf8Path) -> Result<bool, ConfigStoreError> {
    let (parent, file_name) = split_path(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir
            .try_exists(file_name)
            .map_err(|err| ConfigStoreError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn read_config(path: &Utf8Path) -> Result<String, ConfigStoreError> {
    let (parent, file_name) = split_path(path)?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    dir.read_to_string(file_name)
        .map_err(|err| ConfigStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn parse_toml(path: &Utf8Path, contents: &str) -> Result<toml::Value, ConfigStoreError> {
    if contents.trim().is_empty() {
        return Ok(toml::Value::Table(toml::value::Table::new()));
    }

    toml::from_str(contents).map_err(|err| ConfigStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn root_table_mut<'v>(
    path: &Utf8Path,
    value: &'v mut toml::Value,
) -> Result<&'v mut toml::value::Table, ConfigStoreError> {
    value
        .as_table_mut()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("configuration root is not a table"),
        })
}

fn read_machine_id(
    path: &Utf8Path,
    value: &toml::Value,
) -> Result<Option<String>, ConfigStoreError> {
    let table = value
        .as_table()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("configuration root is not a table"),
        })?;

    table.get(MACHINE_ID_KEY).map_or(Ok(None), |raw| {
        raw.as_str()
            .map(str::trim)
            .map(|id| (!id.is_empty()).then(|| id.to_owned()))
            .ok_or_else(|| ConfigStoreError::InvalidStructure {
                path: path.to_path_buf(),
                message: format!("{MACHINE_ID_KEY} must be a string"),
            })
    })
}

fn write_config(path: &Utf8Path, value: &toml::Value) -> Result<(), ConfigStoreError> {
    let (parent, file_name) = split_path(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
        ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let rendered = toml::to_string_pretty(value).map_err(|err| ConfigStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    dir.write(file_name, rendered)
        .map_err(|err| ConfigStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}
