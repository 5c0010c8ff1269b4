//! OSD wire protocol
//!
//! This crate implements the command-level wire format spoken between an OSD
//! initiator and a target: the variable-length command descriptor block (CDB),
//! the attribute list/page segments that ride alongside a command, the reply
//! frame with its sense data, and the resolver that matches returned attribute
//! bytes back to the descriptors that requested them.
//!
//! # Architecture
//!
//! - `Command`: one protocol exchange (service action, target ids, payload,
//!   attribute descriptors)
//! - `cdb`: fixed-layout CDB encoding/decoding
//! - `attrs`: attribute list and page segment codec
//! - `resolver`: demultiplexes a response attribute segment, including the
//!   Current Command Attributes Page and the timestamp page
//! - `reply`: reply frame and the decoded `CommandResult`
//!
//! The crate is a pure codec: it performs no I/O and holds no device state.

pub mod attrs;
pub mod cdb;
pub mod command;
pub mod error;
pub mod reply;
pub mod resolver;
pub mod sense;
pub mod types;

pub use attrs::{AttrListEntry, GetEntry};
pub use cdb::{AttrFormat, DecodedCdb, EncodedCommand, OSD_CDB_SIZE};
pub use command::{Command, ServiceAction};
pub use error::WireError;
pub use reply::{CommandResult, Outcome, Reply};
pub use resolver::{AttributeResult, CurrentCommandPage, TimestampPage};
pub use sense::{SenseData, SenseKey, STATUS_CHECK_CONDITION, STATUS_GOOD};
pub use types::{AttrRequest, AttributeValue, ObjectId, PartitionId};

pub type Result<T> = std::result::Result<T, WireError>;
