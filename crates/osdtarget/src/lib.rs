//! OSD target emulation
//!
//! The semantics a target must honor, independent of any storage engine: a
//! hierarchical namespace of partitions containing user objects and
//! collections, attribute pages addressed by (page, number), and the
//! membership rules tying objects to collections.
//!
//! - `store`: the object/partition/collection state machine
//! - `service`: CDB decoding and dispatch, reply frame construction
//! - `device`: an in-process [`osdsession::Device`] backed by the service,
//!   so the full initiator path can run against it
//!
//! State lives in memory; the original's persistent engine is out of scope.

pub mod device;
pub mod service;
pub mod store;

pub use device::InMemoryOsd;
pub use service::CommandService;
pub use store::{ObjectStore, StoreError};
