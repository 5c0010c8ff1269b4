//! Synchronous command session
//!
//! `Session::open` probes the device with TEST UNIT READY and refuses to
//! construct a session for an absent target. `submit_and_wait` is the single
//! blocking entry point: encode, transmit, wait, decode. The session keeps
//! no state across calls; every mutation lives on the target.

use bytes::Bytes;
use tracing::{debug, warn};

use osdwire::{cdb, Command, CommandResult, Outcome};

use crate::device::Device;
use crate::error::SessionError;
use crate::Result;

/// An open session owning its transport handle exclusively.
pub struct Session {
    device: Box<dyn Device>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device.name())
            .finish()
    }
}

impl Session {
    /// Open a session, verifying the device answers at all.
    pub async fn open(mut device: Box<dyn Device>) -> Result<Self> {
        let probe = cdb::encode(&Command::test_unit_ready())?;
        match device.transfer(&probe.cdb, &probe.data_out).await {
            Ok(frame) if !frame.is_empty() => {
                debug!(device = device.name(), "session open");
                Ok(Self { device })
            }
            Ok(_) => Err(SessionError::DeviceNotFound(device.name().to_string())),
            Err(err) => {
                warn!(device = device.name(), %err, "presence probe failed");
                Err(SessionError::DeviceNotFound(device.name().to_string()))
            }
        }
    }

    /// Submit one command and wait for its structured result.
    ///
    /// Check conditions come back inside the `CommandResult`; only transport
    /// failures and malformed replies are `Err`.
    pub async fn submit_and_wait(&mut self, command: &Command) -> Result<CommandResult> {
        let encoded = cdb::encode(command)?;
        debug!(
            device = self.device.name(),
            action = ?command.action,
            pid = command.partition_id,
            oid = command.object_id,
            out = encoded.data_out.len(),
            "submit"
        );
        let frame: Bytes = self.device.transfer(&encoded.cdb, &encoded.data_out).await?;
        let result = CommandResult::decode(command, frame)?;
        match &result.outcome {
            Outcome::Complete => {}
            Outcome::TruncatedRead => {
                debug!(device = self.device.name(), got = result.data.len(), "short read");
            }
            Outcome::CheckCondition(sense) => {
                debug!(device = self.device.name(), %sense, "check condition");
            }
        }
        Ok(result)
    }

    /// Release the transport handle, surfacing shutdown errors.
    ///
    /// Dropping a session also releases the handle, but silently.
    pub async fn close(mut self) -> Result<()> {
        debug!(device = self.device.name(), "session close");
        self.device.shutdown().await?;
        Ok(())
    }
}
