//! In-process device
//!
//! Binds a [`CommandService`] behind the [`osdsession::Device`] transport
//! trait, so a session exercises the exact CDB and reply frames a remote
//! target would see, minus the network.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use osdsession::Device;

use crate::service::CommandService;
use crate::store::ObjectStore;

/// A whole OSD target living in the caller's address space.
pub struct InMemoryOsd {
    name: String,
    service: CommandService,
}

impl InMemoryOsd {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: CommandService::new(),
        }
    }

    /// Wrap pre-populated state, for tests that want a known starting point.
    pub fn with_store(name: impl Into<String>, store: ObjectStore) -> Self {
        Self {
            name: name.into(),
            service: CommandService::with_store(store),
        }
    }

    pub fn store(&self) -> &ObjectStore {
        self.service.store()
    }
}

impl Default for InMemoryOsd {
    fn default() -> Self {
        Self::new("ram0")
    }
}

#[async_trait]
impl Device for InMemoryOsd {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transfer(&mut self, cdb: &[u8], data_out: &[u8]) -> std::io::Result<Bytes> {
        Ok(self.service.execute(cdb, data_out))
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        debug!(device = %self.name, "shutdown");
        Ok(())
    }
}
