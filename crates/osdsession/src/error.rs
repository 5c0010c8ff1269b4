//! Session error taxonomy
//!
//! Three distinct failure classes, never collapsed into one another:
//! transport I/O failures, protocol decode bugs, and device absence. Check
//! conditions reported by the target are *not* errors here; they arrive
//! inside the decoded `CommandResult` so callers can inspect the sense pair.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The device could not be opened or did not answer the presence probe.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// I/O failure below the protocol. Fatal to the in-flight command; the
    /// session does not retry.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed or mismatched bytes. A compatibility bug, never expected in
    /// normal operation.
    #[error("protocol decode error: {0}")]
    Wire(#[from] osdwire::WireError),
}
