//! Bounded polling for the post-creation network address.

use std::time::Instant;

use tokio::time::sleep;
use tracing::debug;

use crate::compute::ComputeApi;

use super::{ControllerError, MachineController};

impl<A: ComputeApi> MachineController<A> {
    /// Polls until the machine reports a primary address, sleeping the poll
    /// interval between checks. Lookup failures are retried until the budget
    /// runs out.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoMachine`] when no machine exists and
    /// [`ControllerError::Timeout`] when no address appears in time.
    pub async fn wait_for_address(&mut self) -> Result<String, ControllerError> {
        let machine_id = self.require_machine()?;
        let deadline = Instant::now() + self.wait_timeout;

        while Instant::now() <= deadline {
            match self.address().await {
                Ok(Some(address)) => {
                    debug!(
                        machine_id = machine_id.as_str(),
                        address = address.as_str(),
                        "machine address assigned"
                    );
                    return Ok(address);
                }
                Ok(None) => {
                    debug!(machine_id = machine_id.as_str(), "machine has no address yet");
                }
                Err(err) => {
                    debug!(machine_id = machine_id.as_str(), error = %err, "address lookup failed");
                }
            }
            sleep(self.poll_interval).await;
        }

        Err(ControllerError::Timeout {
            action: "machine address",
            machine_id,
        })
    }
}
