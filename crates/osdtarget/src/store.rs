//! Object, partition, and collection state machine
//!
//! Identifiers within a partition move `Nonexistent -> Created -> Nonexistent`
//! and nothing else; attribute and content mutation never changes identity
//! state. Objects and collections share one id namespace per partition.
//! Collection membership is derived, not stored on the collection: slot `n`
//! of the member object's `USER_COLL_PG` page holds the collection id.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use osdwire::resolver::TimestampPage;
use osdwire::sense::{asc, SenseData, SenseKey};
use osdwire::types::{
    COLLECTION_OID_LB, PARTITION_PID_LB, UIAP_LOGICAL_LEN, USEROBJECT_OID_LB, USER_COLL_PG,
    USER_INFO_PG, USER_TMSTMP_PG, UTSAP_ATTR_ATIME, UTSAP_ATTR_MTIME, UTSAP_CTIME,
    UTSAP_DATA_ATIME, UTSAP_DATA_MTIME,
};

/// Semantic violations, each mapping to the sense pair the target reports.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("target has not been formatted")]
    NotFormatted,

    #[error("partition 0x{0:x} does not exist")]
    NoSuchPartition(u64),

    #[error("object 0x{oid:x} does not exist in partition 0x{pid:x}")]
    NoSuchObject { pid: u64, oid: u64 },

    #[error("collection 0x{cid:x} does not exist in partition 0x{pid:x}")]
    NoSuchCollection { pid: u64, cid: u64 },

    #[error("identifier 0x{0:x} already exists")]
    Exists(u64),

    #[error("identifier 0x{0:x} is below the user-creatable bound")]
    ReservedId(u64),

    #[error("partition or collection still contains user objects")]
    NotEmpty,

    #[error("membership slot conflict")]
    MembershipConflict,

    #[error("no contiguous identifier range available")]
    NoSpace,

    #[error("write extent exceeds target capacity")]
    QuotaExceeded,

    #[error("malformed attribute value")]
    InvalidValue,
}

impl StoreError {
    /// The sense pair this violation surfaces as.
    pub fn sense(&self) -> SenseData {
        match self {
            StoreError::NotFormatted => SenseData::new(
                SenseKey::NotReady,
                asc::LOGICAL_UNIT_NOT_READY_FORMAT_REQUIRED,
            ),
            StoreError::NoSuchPartition(_)
            | StoreError::NoSuchObject { .. }
            | StoreError::NoSuchCollection { .. }
            | StoreError::Exists(_)
            | StoreError::ReservedId(_) => {
                SenseData::new(SenseKey::IllegalRequest, asc::INVALID_FIELD_IN_CDB)
            }
            StoreError::NotEmpty => SenseData::new(
                SenseKey::IllegalRequest,
                asc::PARTITION_OR_COLLECTION_CONTAINS_OBJECTS,
            ),
            StoreError::MembershipConflict | StoreError::InvalidValue => SenseData::new(
                SenseKey::IllegalRequest,
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
            ),
            StoreError::NoSpace => {
                SenseData::new(SenseKey::IllegalRequest, asc::SYSTEM_RESOURCE_FAILURE)
            }
            StoreError::QuotaExceeded => {
                SenseData::new(SenseKey::IllegalRequest, asc::QUOTA_ERROR)
            }
        }
    }
}

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, Default)]
struct Timestamps {
    created: u64,
    attr_access: u64,
    attr_modify: u64,
    data_access: u64,
    data_modify: u64,
}

impl Timestamps {
    fn new(now: u64) -> Self {
        Self {
            created: now,
            attr_access: now,
            attr_modify: now,
            data_access: now,
            data_modify: now,
        }
    }
}

#[derive(Debug, Default)]
struct UserObject {
    data: Vec<u8>,
    attrs: HashMap<(u32, u32), Bytes>,
    times: Timestamps,
}

#[derive(Debug, Default)]
struct Collection {
    attrs: HashMap<(u32, u32), Bytes>,
}

#[derive(Debug, Default)]
struct PartitionState {
    objects: HashMap<u64, UserObject>,
    collections: HashMap<u64, Collection>,
}

impl PartitionState {
    fn id_in_use(&self, id: u64) -> bool {
        self.objects.contains_key(&id) || self.collections.contains_key(&id)
    }

    /// Lowest id >= `lb` beginning a run of `count` unused ids.
    fn allocate(&self, lb: u64, count: u64) -> Result<u64> {
        let mut candidate = lb;
        loop {
            match (candidate..candidate.checked_add(count).ok_or(StoreError::NoSpace)?)
                .find(|id| self.id_in_use(*id))
            {
                None => return Ok(candidate),
                Some(used) => candidate = used.checked_add(1).ok_or(StoreError::NoSpace)?,
            }
        }
    }
}

/// The whole target-side persistent state.
#[derive(Debug, Default)]
pub struct ObjectStore {
    formatted: bool,
    capacity: u64,
    partitions: HashMap<u64, PartitionState>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_formatted(&self) -> bool {
        self.formatted
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Destroy everything and start over.
    pub fn format(&mut self, capacity: u64) {
        debug!(capacity, "format");
        self.partitions.clear();
        self.capacity = capacity;
        self.formatted = true;
    }

    fn partition(&self, pid: u64) -> Result<&PartitionState> {
        if !self.formatted {
            return Err(StoreError::NotFormatted);
        }
        self.partitions
            .get(&pid)
            .ok_or(StoreError::NoSuchPartition(pid))
    }

    fn partition_mut(&mut self, pid: u64) -> Result<&mut PartitionState> {
        if !self.formatted {
            return Err(StoreError::NotFormatted);
        }
        self.partitions
            .get_mut(&pid)
            .ok_or(StoreError::NoSuchPartition(pid))
    }

    fn object_mut(&mut self, pid: u64, oid: u64) -> Result<&mut UserObject> {
        self.partition_mut(pid)?
            .objects
            .get_mut(&oid)
            .ok_or(StoreError::NoSuchObject { pid, oid })
    }

    /// Create a partition; `requested` of 0 means the target chooses.
    pub fn create_partition(&mut self, requested: u64) -> Result<u64> {
        if !self.formatted {
            return Err(StoreError::NotFormatted);
        }
        let pid = if requested == 0 {
            (PARTITION_PID_LB..)
                .find(|pid| !self.partitions.contains_key(pid))
                .ok_or(StoreError::NoSpace)?
        } else {
            if requested < PARTITION_PID_LB {
                return Err(StoreError::ReservedId(requested));
            }
            if self.partitions.contains_key(&requested) {
                return Err(StoreError::Exists(requested));
            }
            requested
        };
        debug!(pid, "create partition");
        self.partitions.insert(pid, PartitionState::default());
        Ok(pid)
    }

    /// Remove a partition; fails while it holds objects or collections
    /// unless forced.
    pub fn remove_partition(&mut self, pid: u64, force: bool) -> Result<()> {
        let part = self.partition(pid)?;
        if !force && (!part.objects.is_empty() || !part.collections.is_empty()) {
            return Err(StoreError::NotEmpty);
        }
        debug!(pid, force, "remove partition");
        self.partitions.remove(&pid);
        Ok(())
    }

    /// Create `count` user objects with contiguous ids; returns the first.
    /// `requested` of 0 means the target chooses.
    pub fn create_objects(&mut self, pid: u64, requested: u64, count: u16) -> Result<u64> {
        let count = u64::from(count.max(1));
        let part = self.partition_mut(pid)?;
        let first = if requested == 0 {
            part.allocate(USEROBJECT_OID_LB, count)?
        } else {
            if requested < USEROBJECT_OID_LB {
                return Err(StoreError::ReservedId(requested));
            }
            if let Some(used) = (requested..requested + count).find(|id| part.id_in_use(*id)) {
                return Err(StoreError::Exists(used));
            }
            requested
        };
        let now = now_millis();
        for oid in first..first + count {
            part.objects.insert(
                oid,
                UserObject {
                    times: Timestamps::new(now),
                    ..UserObject::default()
                },
            );
        }
        debug!(pid, first, count, "create objects");
        Ok(first)
    }

    pub fn remove_object(&mut self, pid: u64, oid: u64) -> Result<()> {
        let part = self.partition_mut(pid)?;
        part.objects
            .remove(&oid)
            .ok_or(StoreError::NoSuchObject { pid, oid })?;
        debug!(pid, oid, "remove object");
        Ok(())
    }

    pub fn write(&mut self, pid: u64, oid: u64, offset: u64, data: &[u8]) -> Result<()> {
        // Offset is a raw wire field; bound the resulting extent before
        // touching the object's bytes.
        let capacity = self.capacity;
        let obj = self.object_mut(pid, oid)?;
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= capacity)
            .ok_or(StoreError::QuotaExceeded)?;
        if (obj.data.len() as u64) < end {
            obj.data.resize(end as usize, 0);
        }
        obj.data[offset as usize..end as usize].copy_from_slice(data);
        obj.times.data_modify = now_millis();
        Ok(())
    }

    /// Write at the current end of the object.
    pub fn append(&mut self, pid: u64, oid: u64, data: &[u8]) -> Result<()> {
        let len = self
            .partition(pid)?
            .objects
            .get(&oid)
            .ok_or(StoreError::NoSuchObject { pid, oid })?
            .data
            .len() as u64;
        self.write(pid, oid, len, data)
    }

    /// Read up to `len` bytes from `offset`. The bool is true when the
    /// request reached past end of object and the data came back short.
    pub fn read(&mut self, pid: u64, oid: u64, offset: u64, len: u64) -> Result<(Bytes, bool)> {
        let obj = self.object_mut(pid, oid)?;
        obj.times.data_access = now_millis();
        let size = obj.data.len() as u64;
        if offset >= size {
            return Ok((Bytes::new(), len > 0));
        }
        let wanted = offset.saturating_add(len);
        let end = size.min(wanted);
        let data = Bytes::copy_from_slice(&obj.data[offset as usize..end as usize]);
        Ok((data, end < wanted))
    }

    /// Create a collection; `requested` of 0 means the target chooses.
    pub fn create_collection(&mut self, pid: u64, requested: u64) -> Result<u64> {
        let part = self.partition_mut(pid)?;
        let cid = if requested == 0 {
            part.allocate(COLLECTION_OID_LB, 1)?
        } else {
            if requested < COLLECTION_OID_LB {
                return Err(StoreError::ReservedId(requested));
            }
            if part.id_in_use(requested) {
                return Err(StoreError::Exists(requested));
            }
            requested
        };
        part.collections.insert(cid, Collection::default());
        debug!(pid, cid, "create collection");
        Ok(cid)
    }

    /// Remove a collection. Non-forced removal fails while any object still
    /// references it; forced removal voids the membership pointers.
    pub fn remove_collection(&mut self, pid: u64, cid: u64, force: bool) -> Result<()> {
        let members = self.members(pid, cid)?;
        if !members.is_empty() && !force {
            return Err(StoreError::NotEmpty);
        }
        let part = self.partition_mut(pid)?;
        for oid in members {
            if let Some(obj) = part.objects.get_mut(&oid) {
                obj.attrs
                    .retain(|(page, _), value| !(*page == USER_COLL_PG && is_id(value, cid)));
            }
        }
        part.collections.remove(&cid);
        debug!(pid, cid, force, "remove collection");
        Ok(())
    }

    /// Objects referencing the collection, ordered by id.
    pub fn members(&self, pid: u64, cid: u64) -> Result<Vec<u64>> {
        let part = self.partition(pid)?;
        if !part.collections.contains_key(&cid) {
            return Err(StoreError::NoSuchCollection { pid, cid });
        }
        let mut members: Vec<u64> = part
            .objects
            .iter()
            .filter(|(_, obj)| {
                obj.attrs
                    .iter()
                    .any(|((page, _), value)| *page == USER_COLL_PG && is_id(value, cid))
            })
            .map(|(oid, _)| *oid)
            .collect();
        members.sort_unstable();
        Ok(members)
    }

    /// Store one attribute; an empty value deletes the slot. Membership
    /// slots (`USER_COLL_PG`) are validated against the collection rules.
    /// Collections carry plain attributes of their own.
    pub fn set_attr(&mut self, pid: u64, oid: u64, page: u32, number: u32, value: Bytes) -> Result<()> {
        if page == USER_COLL_PG {
            return self.set_membership(pid, oid, number, value);
        }
        if let Some(coll) = self.partition_mut(pid)?.collections.get_mut(&oid) {
            if value.is_empty() {
                coll.attrs.remove(&(page, number));
            } else {
                coll.attrs.insert((page, number), value);
            }
            return Ok(());
        }
        let obj = self.object_mut(pid, oid)?;
        if value.is_empty() {
            obj.attrs.remove(&(page, number));
        } else {
            obj.attrs.insert((page, number), value);
        }
        obj.times.attr_modify = now_millis();
        Ok(())
    }

    /// Membership rules: the referenced collection must exist in the same
    /// partition; a slot bound to one collection cannot be rebound to a
    /// different one without deleting first; an object may reference a given
    /// collection through at most one slot.
    fn set_membership(&mut self, pid: u64, oid: u64, slot: u32, value: Bytes) -> Result<()> {
        if value.is_empty() {
            let obj = self.object_mut(pid, oid)?;
            obj.attrs.remove(&(USER_COLL_PG, slot));
            obj.times.attr_modify = now_millis();
            return Ok(());
        }
        if value.len() != 8 {
            return Err(StoreError::InvalidValue);
        }
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&value[..8]);
        let cid = u64::from_be_bytes(id_bytes);
        let part = self.partition(pid)?;
        if !part.collections.contains_key(&cid) {
            return Err(StoreError::NoSuchCollection { pid, cid });
        }
        let obj = part
            .objects
            .get(&oid)
            .ok_or(StoreError::NoSuchObject { pid, oid })?;
        for ((page, number), existing) in &obj.attrs {
            if *page != USER_COLL_PG {
                continue;
            }
            if *number == slot && !is_id(existing, cid) {
                return Err(StoreError::MembershipConflict);
            }
            if *number != slot && is_id(existing, cid) {
                return Err(StoreError::MembershipConflict);
            }
        }
        let obj = self.object_mut(pid, oid)?;
        obj.attrs.insert((USER_COLL_PG, slot), value);
        obj.times.attr_modify = now_millis();
        Ok(())
    }

    /// Fetch one attribute. Info-page and timestamp-page numbers are
    /// computed; everything else comes from stored slots, with an unset slot
    /// returning an empty value.
    pub fn get_attr(&mut self, pid: u64, oid: u64, page: u32, number: u32) -> Result<Bytes> {
        if let Some(coll) = self.partition(pid)?.collections.get(&oid) {
            return Ok(coll
                .attrs
                .get(&(page, number))
                .cloned()
                .unwrap_or_default());
        }
        let obj = self.object_mut(pid, oid)?;
        obj.times.attr_access = now_millis();
        if page == USER_INFO_PG && number == UIAP_LOGICAL_LEN {
            return Ok(Bytes::copy_from_slice(&(obj.data.len() as u64).to_be_bytes()));
        }
        if page == USER_TMSTMP_PG {
            let t = &obj.times;
            let stamp = match number {
                UTSAP_CTIME => t.created,
                UTSAP_ATTR_ATIME => t.attr_access,
                UTSAP_ATTR_MTIME => t.attr_modify,
                UTSAP_DATA_ATIME => t.data_access,
                UTSAP_DATA_MTIME => t.data_modify,
                _ => return Ok(Bytes::new()),
            };
            return Ok(osdwire::resolver::encode_timestamp48(stamp));
        }
        Ok(obj
            .attrs
            .get(&(page, number))
            .cloned()
            .unwrap_or_default())
    }

    /// The object's timestamp page.
    pub fn timestamp_page(&mut self, pid: u64, oid: u64) -> Result<TimestampPage> {
        let obj = self.object_mut(pid, oid)?;
        let t = obj.times;
        Ok(TimestampPage {
            created: t.created,
            attr_access: t.attr_access,
            attr_modify: t.attr_modify,
            data_access: t.data_access,
            data_modify: t.data_modify,
        })
    }

    /// Verify that a user object or collection exists at this id, with full
    /// error distinction.
    pub fn check_entity(&self, pid: u64, oid: u64) -> Result<()> {
        let part = self.partition(pid)?;
        if part.id_in_use(oid) {
            Ok(())
        } else {
            Err(StoreError::NoSuchObject { pid, oid })
        }
    }

    pub fn object_exists(&self, pid: u64, oid: u64) -> bool {
        self.partitions
            .get(&pid)
            .map(|p| p.objects.contains_key(&oid))
            .unwrap_or(false)
    }
}

fn is_id(value: &Bytes, id: u64) -> bool {
    value.len() == 8 && value[..8] == id.to_be_bytes()
}
