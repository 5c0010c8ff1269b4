//! Command construction
//!
//! A [`Command`] describes one protocol exchange: a service action, the
//! partition/object it targets, an optional data transfer in either
//! direction, and any attribute descriptors riding along. Constructors mirror
//! the set of commands a target accepts; a command is inert until handed to a
//! session for encoding and submission.

use bytes::Bytes;

use crate::types::{AttrRequest, ObjectId, PartitionId};

/// Service action codes, from the OSD command set plus the two fixed-format
/// SCSI commands every target answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceAction {
    Format,
    Create,
    Read,
    Write,
    Append,
    Remove,
    CreatePartition,
    RemovePartition,
    GetAttributes,
    SetAttributes,
    CreateCollection,
    RemoveCollection,
    GetMemberAttributes,
    SetMemberAttributes,
    Inquiry,
    TestUnitReady,
}

impl ServiceAction {
    /// Wire code. For variable-length commands this is the 16-bit service
    /// action; for the fixed 6-byte commands it is the CDB opcode.
    pub const fn code(self) -> u16 {
        match self {
            ServiceAction::Format => 0x8801,
            ServiceAction::Create => 0x8802,
            ServiceAction::Read => 0x8805,
            ServiceAction::Write => 0x8806,
            ServiceAction::Append => 0x8807,
            ServiceAction::Remove => 0x880A,
            ServiceAction::CreatePartition => 0x880B,
            ServiceAction::RemovePartition => 0x880C,
            ServiceAction::GetAttributes => 0x880E,
            ServiceAction::SetAttributes => 0x880F,
            ServiceAction::CreateCollection => 0x8815,
            ServiceAction::RemoveCollection => 0x8816,
            ServiceAction::GetMemberAttributes => 0x8883,
            ServiceAction::SetMemberAttributes => 0x8884,
            ServiceAction::Inquiry => 0x0012,
            ServiceAction::TestUnitReady => 0x0000,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x8801 => ServiceAction::Format,
            0x8802 => ServiceAction::Create,
            0x8805 => ServiceAction::Read,
            0x8806 => ServiceAction::Write,
            0x8807 => ServiceAction::Append,
            0x880A => ServiceAction::Remove,
            0x880B => ServiceAction::CreatePartition,
            0x880C => ServiceAction::RemovePartition,
            0x880E => ServiceAction::GetAttributes,
            0x880F => ServiceAction::SetAttributes,
            0x8815 => ServiceAction::CreateCollection,
            0x8816 => ServiceAction::RemoveCollection,
            0x8883 => ServiceAction::GetMemberAttributes,
            0x8884 => ServiceAction::SetMemberAttributes,
            _ => return None,
        })
    }

    /// True for actions carried in the 200-byte variable-length CDB.
    pub const fn is_varlen(self) -> bool {
        !matches!(self, ServiceAction::Inquiry | ServiceAction::TestUnitReady)
    }
}

/// One protocol exchange.
///
/// Fields not meaningful for the action are left zero and ignored by the
/// encoder; the constructors below set exactly the fields each action uses.
#[derive(Debug, Clone)]
pub struct Command {
    pub action: ServiceAction,
    pub partition_id: PartitionId,
    pub object_id: ObjectId,
    /// Transfer length for read/write/append, capacity for format.
    pub length: u64,
    /// Starting byte offset for read/write.
    pub offset: u64,
    /// Number of objects to allocate contiguously (`Create` only; 0 and 1
    /// both mean a single object).
    pub num_objects: u16,
    /// Force flag for collection/partition removal.
    pub force: bool,
    /// Bytes travelling to the target (write/append payload).
    pub data_out: Option<Bytes>,
    /// Allocation length for the fixed-format `Inquiry` reply.
    pub inquiry_len: u8,
    /// Attribute descriptors carried on this exchange.
    pub attrs: Vec<AttrRequest>,
}

impl Command {
    fn new(action: ServiceAction) -> Self {
        Self {
            action,
            partition_id: 0,
            object_id: 0,
            length: 0,
            offset: 0,
            num_objects: 0,
            force: false,
            data_out: None,
            inquiry_len: 0,
            attrs: Vec::new(),
        }
    }

    /// Re-initialize the target, destroying all partitions and objects.
    pub fn format(capacity: u64) -> Self {
        let mut cmd = Self::new(ServiceAction::Format);
        cmd.length = capacity;
        cmd
    }

    /// Create a partition. `requested_pid` of 0 lets the target choose.
    pub fn create_partition(requested_pid: PartitionId) -> Self {
        let mut cmd = Self::new(ServiceAction::CreatePartition);
        cmd.partition_id = requested_pid;
        cmd
    }

    /// Remove a partition. A non-forced removal fails while the partition
    /// still holds objects or collections.
    pub fn remove_partition(pid: PartitionId, force: bool) -> Self {
        let mut cmd = Self::new(ServiceAction::RemovePartition);
        cmd.partition_id = pid;
        cmd.force = force;
        cmd
    }

    /// Create a user object. `requested_oid` of 0 lets the target choose;
    /// the assigned id comes back through the CCAP.
    pub fn create(pid: PartitionId, requested_oid: ObjectId) -> Self {
        let mut cmd = Self::new(ServiceAction::Create);
        cmd.partition_id = pid;
        cmd.object_id = requested_oid;
        cmd
    }

    /// Create `count` objects with contiguous ids in one exchange.
    pub fn create_many(pid: PartitionId, requested_oid: ObjectId, count: u16) -> Self {
        let mut cmd = Self::create(pid, requested_oid);
        cmd.num_objects = count;
        cmd
    }

    pub fn remove(pid: PartitionId, oid: ObjectId) -> Self {
        let mut cmd = Self::new(ServiceAction::Remove);
        cmd.partition_id = pid;
        cmd.object_id = oid;
        cmd
    }

    pub fn write(pid: PartitionId, oid: ObjectId, offset: u64, data: Bytes) -> Self {
        let mut cmd = Self::new(ServiceAction::Write);
        cmd.partition_id = pid;
        cmd.object_id = oid;
        cmd.offset = offset;
        cmd.length = data.len() as u64;
        cmd.data_out = Some(data);
        cmd
    }

    /// Write at the current end of the object.
    pub fn append(pid: PartitionId, oid: ObjectId, data: Bytes) -> Self {
        let mut cmd = Self::new(ServiceAction::Append);
        cmd.partition_id = pid;
        cmd.object_id = oid;
        cmd.length = data.len() as u64;
        cmd.data_out = Some(data);
        cmd
    }

    pub fn read(pid: PartitionId, oid: ObjectId, offset: u64, len: u64) -> Self {
        let mut cmd = Self::new(ServiceAction::Read);
        cmd.partition_id = pid;
        cmd.object_id = oid;
        cmd.offset = offset;
        cmd.length = len;
        cmd
    }

    pub fn get_attributes(pid: PartitionId, oid: ObjectId) -> Self {
        let mut cmd = Self::new(ServiceAction::GetAttributes);
        cmd.partition_id = pid;
        cmd.object_id = oid;
        cmd
    }

    pub fn set_attributes(pid: PartitionId, oid: ObjectId) -> Self {
        let mut cmd = Self::new(ServiceAction::SetAttributes);
        cmd.partition_id = pid;
        cmd.object_id = oid;
        cmd
    }

    /// Create a collection. `requested_cid` of 0 lets the target choose.
    pub fn create_collection(pid: PartitionId, requested_cid: ObjectId) -> Self {
        let mut cmd = Self::new(ServiceAction::CreateCollection);
        cmd.partition_id = pid;
        cmd.object_id = requested_cid;
        cmd
    }

    /// Remove a collection. A non-forced removal fails while any object
    /// still references the collection.
    pub fn remove_collection(pid: PartitionId, cid: ObjectId, force: bool) -> Self {
        let mut cmd = Self::new(ServiceAction::RemoveCollection);
        cmd.partition_id = pid;
        cmd.object_id = cid;
        cmd.force = force;
        cmd
    }

    /// Apply the command's get descriptors to every member of a collection.
    pub fn get_member_attributes(pid: PartitionId, cid: ObjectId) -> Self {
        let mut cmd = Self::new(ServiceAction::GetMemberAttributes);
        cmd.partition_id = pid;
        cmd.object_id = cid;
        cmd
    }

    /// Apply the command's set descriptors to every member of a collection.
    pub fn set_member_attributes(pid: PartitionId, cid: ObjectId) -> Self {
        let mut cmd = Self::new(ServiceAction::SetMemberAttributes);
        cmd.partition_id = pid;
        cmd.object_id = cid;
        cmd
    }

    pub fn inquiry(alloc_len: u8) -> Self {
        let mut cmd = Self::new(ServiceAction::Inquiry);
        cmd.inquiry_len = alloc_len;
        cmd
    }

    pub fn test_unit_ready() -> Self {
        Self::new(ServiceAction::TestUnitReady)
    }

    /// Attach an attribute descriptor, keeping request order.
    pub fn with_attr(mut self, attr: AttrRequest) -> Self {
        self.attrs.push(attr);
        self
    }

    /// Attach several attribute descriptors at once.
    pub fn with_attrs(mut self, attrs: impl IntoIterator<Item = AttrRequest>) -> Self {
        self.attrs.extend(attrs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_codes_round_trip() {
        for action in [
            ServiceAction::Format,
            ServiceAction::Create,
            ServiceAction::Read,
            ServiceAction::Write,
            ServiceAction::Append,
            ServiceAction::Remove,
            ServiceAction::CreatePartition,
            ServiceAction::RemovePartition,
            ServiceAction::GetAttributes,
            ServiceAction::SetAttributes,
            ServiceAction::CreateCollection,
            ServiceAction::RemoveCollection,
            ServiceAction::GetMemberAttributes,
            ServiceAction::SetMemberAttributes,
        ] {
            assert_eq!(ServiceAction::from_code(action.code()), Some(action));
        }
    }

    #[test]
    fn write_records_length_and_payload() {
        let cmd = Command::write(0x10000, 0x10010, 4, Bytes::from_static(b"hello"));
        assert_eq!(cmd.length, 5);
        assert_eq!(cmd.offset, 4);
        assert_eq!(cmd.data_out.as_deref(), Some(&b"hello"[..]));
    }
}
