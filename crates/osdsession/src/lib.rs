//! OSD device session
//!
//! This crate owns the connection to a single target device: it serializes a
//! [`osdwire::Command`], hands the bytes to a [`Device`] transport, waits for
//! the raw reply, and decodes it into a structured
//! [`osdwire::CommandResult`].
//!
//! The session is strictly synchronous per call: one command in flight,
//! issuance order is completion order, no pipelining and no cancellation.
//! Concurrency across targets is achieved by opening independent sessions.

pub mod device;
pub mod error;
pub mod session;

pub use device::Device;
pub use error::SessionError;
pub use session::Session;

pub type Result<T> = std::result::Result<T, SessionError>;
