//! Mapping from CloudAPI machine states to the abstract lifecycle the host
//! orchestrator understands.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Abstract lifecycle state reported to the host.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LifecycleState {
    /// The machine is being provisioned or booted.
    Starting,
    /// The machine is up.
    Running,
    /// The machine is shutting down.
    Stopping,
    /// The machine is powered off.
    Stopped,
    /// The machine failed, or its state could not be interpreted.
    Error,
}

impl LifecycleState {
    /// Returns the display label used by the command-line host.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine states known to CloudAPI (the `vmadm` vocabulary).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RemoteState {
    /// `configured`
    Configured,
    /// `provisioning`
    Provisioning,
    /// `failed`
    Failed,
    /// `receiving`
    Receiving,
    /// `running`
    Running,
    /// `shutting_down`
    ShuttingDown,
    /// `stopping`
    Stopping,
    /// `down`
    Down,
    /// `stopped`
    Stopped,
}

impl RemoteState {
    /// Every known remote state, in vocabulary order.
    pub const ALL: [Self; 9] = [
        Self::Configured,
        Self::Provisioning,
        Self::Failed,
        Self::Receiving,
        Self::Running,
        Self::ShuttingDown,
        Self::Stopping,
        Self::Down,
        Self::Stopped,
    ];

    /// Returns the wire spelling of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Provisioning => "provisioning",
            Self::Failed => "failed",
            Self::Receiving => "receiving",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopping => "stopping",
            Self::Down => "down",
            Self::Stopped => "stopped",
        }
    }

    /// Maps the remote state onto the abstract lifecycle.
    #[must_use]
    pub const fn lifecycle(self) -> LifecycleState {
        match self {
            Self::Configured | Self::Provisioning => LifecycleState::Starting,
            Self::Failed | Self::Receiving => LifecycleState::Error,
            Self::Running => LifecycleState::Running,
            Self::ShuttingDown | Self::Stopping => LifecycleState::Stopping,
            Self::Down | Self::Stopped => LifecycleState::Stopped,
        }
    }
}

impl FromStr for RemoteState {
    type Err = UnknownState;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| UnknownState {
                state: value.to_owned(),
            })
    }
}

/// Raised when CloudAPI reports a state outside the known vocabulary.
///
/// Hosts should present the machine as [`LifecycleState::Error`] while
/// surfacing this diagnostic, so a stale state table is distinguishable from
/// a genuinely failed machine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown Triton instance state: {state}")]
pub struct UnknownState {
    /// State string reported by the remote API.
    pub state: String,
}

/// Maps a raw remote state string onto the abstract lifecycle.
///
/// # Errors
///
/// Returns [`UnknownState`] when `raw` is not part of the known vocabulary.
pub fn map_state(raw: &str) -> Result<LifecycleState, UnknownState> {
    raw.parse::<RemoteState>().map(RemoteState::lifecycle)
}
