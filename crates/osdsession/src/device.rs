//! Transport abstraction
//!
//! A [`Device`] moves one encoded command to a target and returns the raw
//! reply frame. Implementations own the underlying handle exclusively;
//! whatever timeout policy they enforce surfaces as an I/O error, distinct
//! from any protocol-level check condition.

use async_trait::async_trait;
use bytes::Bytes;

/// Byte-oriented transport to a single target device.
#[async_trait]
pub trait Device: Send {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Submit one command and block until the target's reply frame arrives.
    /// `cdb` is the 6- or 200-byte command block; `data_out` carries the
    /// write payload and request attribute lists, possibly empty.
    async fn transfer(&mut self, cdb: &[u8], data_out: &[u8]) -> std::io::Result<Bytes>;

    /// Release transport resources. Called once, on session close.
    async fn shutdown(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
