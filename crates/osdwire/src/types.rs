//! Identifiers, reserved constants, and attribute descriptor types

use bytes::{BufMut, Bytes, BytesMut};

/// Partition identifier, 64-bit. Partition 0 is the root.
pub type PartitionId = u64;

/// User object or collection identifier, 64-bit, unique within a partition.
pub type ObjectId = u64;

/// The root object lives at (0, 0).
pub const ROOT_PID: PartitionId = 0;
pub const ROOT_OID: ObjectId = 0;

/// Lowest partition id a caller may create. Ids below this are reserved.
pub const PARTITION_PID_LB: PartitionId = 0x10000;

/// Lowest user object id within a partition.
pub const USEROBJECT_OID_LB: ObjectId = 0x10000;

/// Lowest collection id within a partition.
pub const COLLECTION_OID_LB: ObjectId = 0x10000;

// Attribute page ranges. Pages are scoped by the kind of object they attach
// to; the range is encoded in the top bits of the page number.
pub const USEROBJECT_PG: u32 = 0;
pub const PARTITION_PG: u32 = 0x3000_0000;
pub const COLLECTION_PG: u32 = 0x6000_0000;
pub const ROOT_PG: u32 = 0x9000_0000;
pub const RESERVED_PG: u32 = 0xC000_0000;
pub const ANY_PG: u32 = 0xF000_0000;

/// User object information page; number `UIAP_LOGICAL_LEN` reports the
/// current byte length of the object.
pub const USER_INFO_PG: u32 = USEROBJECT_PG + 1;
pub const UIAP_LOGICAL_LEN: u32 = 0x82;

/// User object timestamp page, see [`crate::resolver::TimestampPage`].
pub const USER_TMSTMP_PG: u32 = USEROBJECT_PG + 3;

/// Collection membership page: slot `n` holding a collection id records that
/// the object belongs to that collection.
pub const USER_COLL_PG: u32 = USEROBJECT_PG + 4;

/// Current Command Attributes Page, reporting metadata about the command just
/// executed (notably the acted-upon partition and object ids).
pub const CUR_CMD_ATTR_PG: u32 = 0xFFFF_FFFE;

/// Pseudo-page requesting every attribute of an object.
pub const GETALLATTR_PG: u32 = 0xFFFF_FFFF;

// Attribute numbers within the CCAP.
pub const CCAP_OBJT: u32 = 2;
pub const CCAP_PID: u32 = 3;
pub const CCAP_OID: u32 = 4;

// Attribute numbers within the timestamp page. Values are 6-byte big-endian
// millisecond counts.
pub const UTSAP_CTIME: u32 = 1;
pub const UTSAP_ATTR_ATIME: u32 = 2;
pub const UTSAP_ATTR_MTIME: u32 = 3;
pub const UTSAP_DATA_ATIME: u32 = 4;
pub const UTSAP_DATA_MTIME: u32 = 5;

/// A typed attribute value.
///
/// On the wire every value is an opaque byte string; integers are fixed
/// 8-byte big-endian. `Empty` serializes as length zero, which on a set
/// request means "delete this attribute".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Integer64(u64),
    Bytes(Bytes),
    Empty,
}

impl AttributeValue {
    /// Wire bytes of this value.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            AttributeValue::Integer64(v) => {
                let mut buf = BytesMut::with_capacity(8);
                buf.put_u64(*v);
                buf.freeze()
            }
            AttributeValue::Bytes(b) => b.clone(),
            AttributeValue::Empty => Bytes::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AttributeValue::Integer64(_) => 8,
            AttributeValue::Bytes(b) => b.len(),
            AttributeValue::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Integer64(v)
    }
}

impl From<Bytes> for AttributeValue {
    fn from(b: Bytes) -> Self {
        if b.is_empty() {
            AttributeValue::Empty
        } else {
            AttributeValue::Bytes(b)
        }
    }
}

/// One attribute descriptor attached to a command.
///
/// `Get` and `GetPage` ask the target to return attribute bytes alongside the
/// command's own data transfer; `Set` stores (or, with an empty value,
/// deletes) an attribute in the same exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrRequest {
    /// Retrieve a single attribute, returning at most `max_len` bytes.
    Get { page: u32, number: u32, max_len: u32 },
    /// Retrieve a whole page in its self-describing form.
    GetPage { page: u32, max_len: u32 },
    /// Store a value; `AttributeValue::Empty` deletes the slot.
    Set {
        page: u32,
        number: u32,
        value: AttributeValue,
    },
}

impl AttrRequest {
    pub fn page(&self) -> u32 {
        match self {
            AttrRequest::Get { page, .. }
            | AttrRequest::GetPage { page, .. }
            | AttrRequest::Set { page, .. } => *page,
        }
    }

    pub fn is_get(&self) -> bool {
        matches!(self, AttrRequest::Get { .. } | AttrRequest::GetPage { .. })
    }
}
