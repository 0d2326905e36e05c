//! Core library for the Trireme Triton machine adapter.
//!
//! The crate resolves user-supplied image references to exact CloudAPI
//! identifiers, drives a single machine through create, power, and delete
//! operations, and maps CloudAPI machine states onto a small abstract
//! lifecycle that host orchestrators understand.

pub mod compute;
pub mod config;
pub mod config_store;
pub mod controller;
pub mod credentials;
pub mod host;
pub mod resolver;
pub mod state;
pub mod test_support;
pub mod triton;
pub mod types;

pub use compute::{ApiError, ComputeApi, ImageCatalogEntry, ImageFilter, InstanceRecord};
pub use config::{ConfigError, TritonConfig};
pub use config_store::{ConfigStore, ConfigStoreError, ConfigWriter, PersistedMachine};
pub use controller::{AddressWait, ControllerError, MachineController, MachineSettings};
pub use credentials::{CredentialError, OpensslSigner, RequestSigner, signer_from_config};
pub use host::HostIdentity;
pub use resolver::{MatchRule, Resolution, ResolutionError, resolve_image, validate_package};
pub use state::{LifecycleState, RemoteState, UnknownState, map_state};
pub use triton::TritonClient;
pub use types::{ImageId, MachineId};
