//! Command dispatch
//!
//! One entry point, [`CommandService::execute`]: decode a CDB, run the
//! operation against the store, apply set descriptors, evaluate retrieve
//! descriptors, and frame the reply. Every exchange produces exactly one
//! frame; protocol violations come back as check conditions, never as a
//! missing response.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use osdwire::attrs::{self, AttrListEntry, GetEntry};
use osdwire::cdb::{self, AttrFormat, DecodedCdb};
use osdwire::command::ServiceAction;
use osdwire::error::WireError;
use osdwire::resolver::CurrentCommandPage;
use osdwire::sense::{asc, SenseData, SenseKey};
use osdwire::types::{CCAP_OID, CCAP_PID, CUR_CMD_ATTR_PG, USER_TMSTMP_PG};
use osdwire::Reply;

use crate::store::ObjectStore;

const INQUIRY_DATA_LEN: usize = 36;
const OSD_DEVICE_TYPE: u8 = 0x11;

/// The target-side command processor: a store plus the dispatch logic.
pub struct CommandService {
    store: ObjectStore,
}

impl Default for CommandService {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifiers and data produced by the main operation, before attribute
/// descriptors are applied.
struct Acted {
    pid: u64,
    oid: u64,
    data: Bytes,
    short_read: bool,
}

impl Acted {
    fn ids(pid: u64, oid: u64) -> Self {
        Self {
            pid,
            oid,
            data: Bytes::new(),
            short_read: false,
        }
    }
}

impl CommandService {
    pub fn new() -> Self {
        Self {
            store: ObjectStore::new(),
        }
    }

    pub fn with_store(store: ObjectStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Run one command to completion. Always returns a reply frame.
    pub fn execute(&mut self, cdb: &[u8], data_out: &[u8]) -> Bytes {
        match self.try_execute(cdb, data_out) {
            Ok(reply) => reply.encode(),
            Err(sense) => {
                debug!(%sense, "check condition");
                Reply::check(sense).encode()
            }
        }
    }

    fn try_execute(
        &mut self,
        cdb: &[u8],
        data_out: &[u8],
    ) -> Result<Reply, SenseData> {
        let dec = cdb::decode(cdb).map_err(decode_sense)?;
        trace!(action = ?dec.action, pid = dec.partition_id, oid = dec.object_id, "dispatch");

        match dec.action {
            ServiceAction::TestUnitReady => {
                return Ok(Reply::good(Bytes::new(), Bytes::new()));
            }
            ServiceAction::Inquiry => {
                return Ok(Reply::good(inquiry_data(dec.inquiry_len), Bytes::new()));
            }
            _ => {}
        }

        let (payload, get_list, set_list) = dec
            .split_data_out(data_out)
            .map_err(|_| field_in_cdb())?;
        let gets = if dec.attr_format == Some(AttrFormat::List) && dec.get_list_len > 0 {
            attrs::decode_get_list(get_list).map_err(param_list)?
        } else {
            Vec::new()
        };
        let sets = if dec.attr_format == Some(AttrFormat::List) && dec.set_list_len > 0 {
            attrs::decode_value_list(set_list).map_err(param_list)?
        } else {
            Vec::new()
        };

        if matches!(
            dec.action,
            ServiceAction::GetMemberAttributes | ServiceAction::SetMemberAttributes
        ) {
            return self.member_attributes(&dec, &gets, &sets);
        }

        // Creating several objects at once has no single object to hang
        // attributes on; only command metadata may be retrieved.
        if dec.action == ServiceAction::Create && dec.num_objects > 1 {
            let only_ccap = sets.is_empty()
                && gets.iter().all(|g| g.page == CUR_CMD_ATTR_PG)
                && (dec.attr_format != Some(AttrFormat::Page)
                    || dec.attr_page == 0
                    || dec.attr_page == CUR_CMD_ATTR_PG);
            if !only_ccap {
                return Err(SenseData::new(
                    SenseKey::IllegalRequest,
                    asc::INVALID_FIELD_IN_PARAMETER_LIST,
                ));
            }
        }

        let acted = self.dispatch(&dec, payload)?;

        for entry in &sets {
            self.store
                .set_attr(acted.pid, acted.oid, entry.page, entry.number, entry.value.clone())
                .map_err(|e| e.sense())?;
        }

        let attr_segment = match dec.attr_format {
            Some(AttrFormat::Page) if dec.attr_page != 0 => {
                self.page_segment(&dec, acted.pid, acted.oid)?
            }
            Some(AttrFormat::List) if !gets.is_empty() => {
                let entries = self.evaluate_gets(&gets, acted.pid, acted.oid)?;
                attrs::encode_value_list(&entries)
            }
            _ => Bytes::new(),
        };

        if acted.short_read {
            Ok(Reply::check_with_data(
                SenseData::new(SenseKey::RecoveredError, asc::READ_PAST_END_OF_USER_OBJECT),
                acted.data,
                attr_segment,
            ))
        } else {
            Ok(Reply::good(acted.data, attr_segment))
        }
    }

    fn dispatch(&mut self, dec: &DecodedCdb, payload: &[u8]) -> Result<Acted, SenseData> {
        let store_err = |e: crate::store::StoreError| e.sense();
        let pid = dec.partition_id;
        let oid = dec.object_id;
        Ok(match dec.action {
            ServiceAction::Format => {
                self.store.format(dec.length);
                Acted::ids(0, 0)
            }
            ServiceAction::CreatePartition => {
                let pid = self.store.create_partition(pid).map_err(store_err)?;
                Acted::ids(pid, 0)
            }
            ServiceAction::RemovePartition => {
                self.store.remove_partition(pid, dec.force).map_err(store_err)?;
                Acted::ids(pid, 0)
            }
            ServiceAction::Create => {
                let first = self
                    .store
                    .create_objects(pid, oid, dec.num_objects)
                    .map_err(store_err)?;
                Acted::ids(pid, first)
            }
            ServiceAction::Remove => {
                self.store.remove_object(pid, oid).map_err(store_err)?;
                Acted::ids(pid, oid)
            }
            ServiceAction::Write => {
                if payload.len() as u64 != dec.length {
                    return Err(field_in_cdb());
                }
                self.store
                    .write(pid, oid, dec.offset, payload)
                    .map_err(store_err)?;
                Acted::ids(pid, oid)
            }
            ServiceAction::Append => {
                if payload.len() as u64 != dec.length {
                    return Err(field_in_cdb());
                }
                self.store.append(pid, oid, payload).map_err(store_err)?;
                Acted::ids(pid, oid)
            }
            ServiceAction::Read => {
                let (data, short_read) = self
                    .store
                    .read(pid, oid, dec.offset, dec.length)
                    .map_err(store_err)?;
                Acted {
                    pid,
                    oid,
                    data,
                    short_read,
                }
            }
            ServiceAction::GetAttributes | ServiceAction::SetAttributes => {
                self.store.check_entity(pid, oid).map_err(store_err)?;
                Acted::ids(pid, oid)
            }
            ServiceAction::CreateCollection => {
                let cid = self.store.create_collection(pid, oid).map_err(store_err)?;
                Acted::ids(pid, cid)
            }
            ServiceAction::RemoveCollection => {
                self.store
                    .remove_collection(pid, oid, dec.force)
                    .map_err(store_err)?;
                Acted::ids(pid, oid)
            }
            ServiceAction::GetMemberAttributes
            | ServiceAction::SetMemberAttributes
            | ServiceAction::Inquiry
            | ServiceAction::TestUnitReady => unreachable!("handled before dispatch"),
        })
    }

    /// Member-attribute commands address a collection and fan the descriptor
    /// lists out over every member, in ascending object id order. The
    /// response list repeats the retrieve sequence once per member.
    fn member_attributes(
        &mut self,
        dec: &DecodedCdb,
        gets: &[GetEntry],
        sets: &[AttrListEntry],
    ) -> Result<Reply, SenseData> {
        // Only the list form can express a per-member response.
        if dec.attr_format == Some(AttrFormat::Page) && dec.attr_page != 0 {
            return Err(field_in_cdb());
        }
        let members = self
            .store
            .members(dec.partition_id, dec.object_id)
            .map_err(|e| e.sense())?;
        debug!(
            cid = dec.object_id,
            members = members.len(),
            "member attributes"
        );
        let mut entries = Vec::with_capacity(members.len() * gets.len());
        for member in members {
            for entry in sets {
                self.store
                    .set_attr(
                        dec.partition_id,
                        member,
                        entry.page,
                        entry.number,
                        entry.value.clone(),
                    )
                    .map_err(|e| e.sense())?;
            }
            entries.extend(self.evaluate_gets(gets, dec.partition_id, member)?);
        }
        let attr_segment = if gets.is_empty() {
            Bytes::new()
        } else {
            attrs::encode_value_list(&entries)
        };
        Ok(Reply::good(Bytes::new(), attr_segment))
    }

    /// Answer the retrieve list against one object, bounding every value by
    /// its requested maximum. Command metadata comes from the acted-upon ids
    /// rather than the store.
    fn evaluate_gets(
        &mut self,
        gets: &[GetEntry],
        pid: u64,
        oid: u64,
    ) -> Result<Vec<AttrListEntry>, SenseData> {
        let mut entries = Vec::with_capacity(gets.len());
        for get in gets {
            let mut value = if get.page == CUR_CMD_ATTR_PG {
                match get.number {
                    CCAP_PID => Bytes::copy_from_slice(&pid.to_be_bytes()),
                    CCAP_OID => Bytes::copy_from_slice(&oid.to_be_bytes()),
                    _ => Bytes::new(),
                }
            } else {
                self.store
                    .get_attr(pid, oid, get.page, get.number)
                    .map_err(|e| e.sense())?
            };
            if value.len() > get.max_len as usize {
                value.truncate(get.max_len as usize);
            }
            entries.push(AttrListEntry {
                page: get.page,
                number: get.number,
                value,
            });
        }
        Ok(entries)
    }

    /// Build a page-format attribute segment. Only pages with a fixed wire
    /// layout can be returned whole.
    fn page_segment(
        &mut self,
        dec: &DecodedCdb,
        pid: u64,
        oid: u64,
    ) -> Result<Bytes, SenseData> {
        let mut segment = match dec.attr_page {
            CUR_CMD_ATTR_PG => CurrentCommandPage::new(pid, oid).encode(),
            USER_TMSTMP_PG => self
                .store
                .timestamp_page(pid, oid)
                .map_err(|e| e.sense())?
                .encode(),
            _ => return Err(field_in_cdb()),
        };
        if segment.len() > dec.attr_alloc_len as usize {
            segment.truncate(dec.attr_alloc_len as usize);
        }
        Ok(segment)
    }
}

/// Standard INQUIRY data for an object-based storage device.
fn inquiry_data(alloc_len: u8) -> Bytes {
    let mut buf = BytesMut::zeroed(INQUIRY_DATA_LEN);
    buf[0] = OSD_DEVICE_TYPE;
    buf[2] = 0x05; // SPC-3
    buf[4] = (INQUIRY_DATA_LEN - 5) as u8;
    buf[8..16].copy_from_slice(b"OSDEMU  ");
    buf[16..32].copy_from_slice(b"RAM OBJECT STORE");
    buf[32..36].copy_from_slice(b"0001");
    let mut data = buf.freeze();
    if data.len() > alloc_len as usize {
        data.truncate(alloc_len as usize);
    }
    data
}

fn decode_sense(err: WireError) -> SenseData {
    match err {
        WireError::UnknownOpcode(_) | WireError::UnknownAction(_) => SenseData::new(
            SenseKey::IllegalRequest,
            asc::INVALID_COMMAND_OPERATION_CODE,
        ),
        _ => field_in_cdb(),
    }
}

fn field_in_cdb() -> SenseData {
    SenseData::new(SenseKey::IllegalRequest, asc::INVALID_FIELD_IN_CDB)
}

fn param_list(_: WireError) -> SenseData {
    SenseData::new(
        SenseKey::IllegalRequest,
        asc::INVALID_FIELD_IN_PARAMETER_LIST,
    )
}
