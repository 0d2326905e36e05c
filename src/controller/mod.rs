//! Lifecycle controller for a single Triton machine.
//!
//! The controller owns the machine's identity for its whole lifetime. It
//! normalises the image reference during pre-flight, creates the machine,
//! maps remote states onto [`LifecycleState`], and passes power operations
//! through to the compute API without retrying them.

mod wait;

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::compute::{ApiError, ComputeApi, CreateInstanceRequest, RequestError};
use crate::host::HostIdentity;
use crate::resolver::{self, ResolutionError};
use crate::state::{LifecycleState, map_state};
use crate::types::MachineId;

/// Default interval between address checks after creation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default budget for the address wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
/// Port the Docker engine listens on inside provisioned machines.
pub const DOCKER_PORT: u16 = 2376;

/// Image and package references used to create the machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineSettings {
    /// Image reference; replaced by the exact identifier once resolved.
    pub image: String,
    /// Package name or identifier.
    pub package: String,
}

impl MachineSettings {
    /// Builds settings from image and package references.
    #[must_use]
    pub fn new(image: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            package: package.into(),
        }
    }
}

/// Whether [`MachineController::create`] waits for a network address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressWait {
    /// Return as soon as the machine identifier is known.
    Skip,
    /// Poll until the machine reports a primary address.
    Poll,
}

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The API endpoint could not be reached or refused the credentials.
    #[error("cannot reach CloudAPI: {source}")]
    Connectivity {
        /// Error returned by the liveness check.
        #[source]
        source: ApiError,
    },
    /// The image or package reference could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The creation request was incomplete.
    #[error("invalid machine request: {0}")]
    Request(#[from] RequestError),
    /// The remote API refused to create the machine.
    #[error("failed to create machine: {source}")]
    Create {
        /// Error returned by the creation call.
        #[source]
        source: ApiError,
    },
    /// A call against an existing machine failed.
    #[error("{operation} failed for machine {machine_id}: {source}")]
    Remote {
        /// Operation that failed.
        operation: &'static str,
        /// Machine the call addressed.
        machine_id: MachineId,
        /// Error returned by the remote API.
        #[source]
        source: ApiError,
    },
    /// The machine reported a state outside the known vocabulary.
    #[error("machine {machine_id} reports unknown state '{state}'")]
    UnknownState {
        /// Machine that reported the state.
        machine_id: MachineId,
        /// Raw state string.
        state: String,
    },
    /// A bounded wait ran out of time.
    #[error("timed out waiting for {action} on machine {machine_id}")]
    Timeout {
        /// Condition being awaited.
        action: &'static str,
        /// Machine being polled.
        machine_id: MachineId,
    },
    /// The operation needs a machine but none has been created or attached.
    #[error("no machine has been created yet")]
    NoMachine,
    /// Creation was requested while a machine is already managed.
    #[error("machine {machine_id} already exists")]
    AlreadyCreated {
        /// Identifier of the managed machine.
        machine_id: MachineId,
    },
    /// The operation needs a running machine.
    #[error("machine {machine_id} is {state}, not Running")]
    NotRunning {
        /// Machine that was checked.
        machine_id: MachineId,
        /// Abstract state observed.
        state: LifecycleState,
    },
    /// The machine has no primary address yet.
    #[error("machine {machine_id} has no primary address yet")]
    NoAddress {
        /// Machine that was checked.
        machine_id: MachineId,
    },
}

/// Drives one machine through its lifecycle against a [`ComputeApi`].
#[derive(Debug)]
pub struct MachineController<A> {
    api: A,
    host: HostIdentity,
    settings: MachineSettings,
    image_resolved: bool,
    machine_id: Option<MachineId>,
    ip_address: Option<String>,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl<A: ComputeApi> MachineController<A> {
    /// Creates a controller for a machine that does not exist yet.
    #[must_use]
    pub const fn new(api: A, host: HostIdentity, settings: MachineSettings) -> Self {
        Self {
            api,
            host,
            settings,
            image_resolved: false,
            machine_id: None,
            ip_address: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Creates a controller re-attached to a machine recorded by an earlier
    /// invocation.
    #[must_use]
    pub fn attach(
        api: A,
        host: HostIdentity,
        settings: MachineSettings,
        machine_id: MachineId,
    ) -> Self {
        Self {
            machine_id: Some(machine_id),
            ..Self::new(api, host, settings)
        }
    }

    /// Overrides the address wait cadence.
    #[must_use]
    pub fn with_wait(mut self, poll_interval: Duration, wait_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.wait_timeout = wait_timeout;
        self
    }

    /// Identifier of the managed machine, if one exists.
    #[must_use]
    pub const fn machine_id(&self) -> Option<&MachineId> {
        self.machine_id.as_ref()
    }

    /// Image reference, or the exact identifier once resolved.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.settings.image
    }

    /// Package reference.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.settings.package
    }

    /// Identity of the managed host.
    #[must_use]
    pub const fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Address cached by an earlier lookup.
    #[must_use]
    pub fn cached_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// Compute API the controller talks to.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    fn require_machine(&self) -> Result<MachineId, ControllerError> {
        self.machine_id.clone().ok_or(ControllerError::NoMachine)
    }

    /// Checks reachability and normalises the image and package references.
    /// Nothing is mutated remotely.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Connectivity`] when the ping fails and
    /// [`ControllerError::Resolution`] when either reference is unusable.
    pub async fn preflight_check(&mut self) -> Result<(), ControllerError> {
        self.api
            .ping()
            .await
            .map_err(|source| ControllerError::Connectivity { source })?;
        self.resolve_image().await?;
        resolver::validate_package(&self.api, &self.settings.package).await?;
        Ok(())
    }

    async fn resolve_image(&mut self) -> Result<(), ControllerError> {
        if self.image_resolved {
            return Ok(());
        }
        let resolution = resolver::resolve_image(&self.api, &self.settings.image).await?;
        self.settings.image = resolution.image_id.into_inner();
        self.image_resolved = true;
        Ok(())
    }

    /// Creates the machine and records its identifier. With
    /// [`AddressWait::Poll`] the call returns only once an address is known.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyCreated`] when a machine is already
    /// managed, [`ControllerError::Create`] when the remote API refuses the
    /// request, and [`ControllerError::Timeout`] when the address wait runs
    /// out of time. On timeout the identifier stays recorded.
    pub async fn create(&mut self, wait: AddressWait) -> Result<MachineId, ControllerError> {
        if let Some(machine_id) = self.machine_id.clone() {
            return Err(ControllerError::AlreadyCreated { machine_id });
        }
        self.resolve_image().await?;

        let request = CreateInstanceRequest::builder()
            .name(self.host.machine_name())
            .image_id(self.settings.image.as_str())
            .package(self.settings.package.as_str())
            .build()?;
        info!(
            name = request.name.as_str(),
            image = request.image_id.as_str(),
            package = request.package.as_str(),
            "creating machine"
        );
        let created = self
            .api
            .create_instance(&request)
            .await
            .map_err(|source| ControllerError::Create { source })?;
        let machine_id = MachineId::new(created.id);
        info!(machine_id = machine_id.as_str(), "machine created");
        self.machine_id = Some(machine_id.clone());

        if wait == AddressWait::Poll {
            self.wait_for_address().await?;
        }
        Ok(machine_id)
    }

    /// Returns the machine's primary address, fetching and caching it when
    /// not already known. `None` means the remote side has not assigned one.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoMachine`] or [`ControllerError::Remote`].
    pub async fn address(&mut self) -> Result<Option<String>, ControllerError> {
        if let Some(address) = &self.ip_address {
            return Ok(Some(address.clone()));
        }
        let machine_id = self.require_machine()?;
        let record = self
            .api
            .get_instance(&machine_id)
            .await
            .map_err(|source| ControllerError::Remote {
                operation: "address lookup",
                machine_id,
                source,
            })?;
        self.ip_address = record.primary_ip.filter(|ip| !ip.is_empty());
        Ok(self.ip_address.clone())
    }

    /// Fetches the machine and maps its remote state.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownState`] when the remote state is
    /// outside the known vocabulary; hosts present this as
    /// [`LifecycleState::Error`] while reporting the diagnostic.
    pub async fn state(&self) -> Result<LifecycleState, ControllerError> {
        let machine_id = self.require_machine()?;
        let record = match self.api.get_instance(&machine_id).await {
            Ok(record) => record,
            Err(source) => {
                return Err(ControllerError::Remote {
                    operation: "state lookup",
                    machine_id,
                    source,
                });
            }
        };
        map_state(&record.state).map_err(|unknown| ControllerError::UnknownState {
            machine_id,
            state: unknown.state,
        })
    }

    /// Boots the machine.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoMachine`] or [`ControllerError::Remote`].
    pub async fn start(&self) -> Result<(), ControllerError> {
        let machine_id = self.require_machine()?;
        info!(machine_id = machine_id.as_str(), "starting machine");
        self.api
            .start_instance(&machine_id)
            .await
            .map_err(|source| ControllerError::Remote {
                operation: "start",
                machine_id,
                source,
            })
    }

    /// Gracefully stops the machine.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoMachine`] or [`ControllerError::Remote`].
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let machine_id = self.require_machine()?;
        info!(machine_id = machine_id.as_str(), "stopping machine");
        self.api
            .stop_instance(&machine_id)
            .await
            .map_err(|source| ControllerError::Remote {
                operation: "stop",
                machine_id,
                source,
            })
    }

    /// Reboots the machine.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoMachine`] or [`ControllerError::Remote`].
    pub async fn restart(&self) -> Result<(), ControllerError> {
        let machine_id = self.require_machine()?;
        info!(machine_id = machine_id.as_str(), "restarting machine");
        self.api
            .reboot_instance(&machine_id)
            .await
            .map_err(|source| ControllerError::Remote {
                operation: "restart",
                machine_id,
                source,
            })
    }

    /// CloudAPI has no forced power-off, so kill is a graceful stop.
    ///
    /// # Errors
    ///
    /// Same as [`Self::stop`].
    pub async fn kill(&self) -> Result<(), ControllerError> {
        self.stop().await
    }

    /// Deletes the machine and releases the managed identity. Returns the
    /// identifier that was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoMachine`] or [`ControllerError::Remote`];
    /// the identity is kept when deletion fails.
    pub async fn remove(&mut self) -> Result<MachineId, ControllerError> {
        let machine_id = self.require_machine()?;
        info!(machine_id = machine_id.as_str(), "removing machine");
        if let Err(source) = self.api.delete_instance(&machine_id).await {
            return Err(ControllerError::Remote {
                operation: "remove",
                machine_id,
                source,
            });
        }
        self.machine_id = None;
        self.ip_address = None;
        Ok(machine_id)
    }

    /// Returns the Docker engine URL of a running machine.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotRunning`] unless the machine is
    /// Running, and [`ControllerError::NoAddress`] when it has no address.
    pub async fn docker_url(&mut self) -> Result<String, ControllerError> {
        let machine_id = self.require_machine()?;
        let state = self.state().await?;
        if state != LifecycleState::Running {
            return Err(ControllerError::NotRunning { machine_id, state });
        }
        let address = self
            .address()
            .await?
            .ok_or(ControllerError::NoAddress { machine_id })?;
        Ok(format!("tcp://{address}:{DOCKER_PORT}"))
    }
}

#[cfg(test)]
mod tests;
