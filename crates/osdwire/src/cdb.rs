//! Command descriptor block encoding and decoding
//!
//! OSD commands travel in a 200-byte variable-length CDB: opcode 0x7F, a
//! 16-bit service action, then fixed-offset fields for the target partition
//! and object ids, transfer length and offset, and the attribute segment
//! bookkeeping. `Inquiry` and `TestUnitReady` keep their native 6-byte CDBs.
//!
//! When a command carries attribute descriptors, the data-out buffer is the
//! write payload (if any) followed by the retrieve list and then the set
//! list; the CDB records each list's byte length so the target can slice the
//! tail without guessing.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::attrs::{self, AttrListEntry, GetEntry};
use crate::command::{Command, ServiceAction};
use crate::error::WireError;
use crate::types::AttrRequest;
use crate::Result;

/// Size of the variable-length CDB.
pub const OSD_CDB_SIZE: usize = 200;

/// SCSI variable-length CDB opcode.
pub const VARLEN_CDB_OPCODE: u8 = 0x7F;

const INQUIRY_OPCODE: u8 = 0x12;
const TEST_UNIT_READY_OPCODE: u8 = 0x00;

/// Timestamp update control: do not touch timestamp attributes beyond what
/// the command itself implies.
const TIMESTAMP_OFF: u8 = 0x7F;

bitflags! {
    /// CDB options byte (byte 10).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CdbOptions: u8 {
        /// Force removal of a collection or partition that is not empty.
        const FORCE = 0x01;
    }
}

/// Attribute segment format selector, bits 4..6 of CDB byte 11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrFormat {
    Page,
    List,
}

impl AttrFormat {
    fn bits(self) -> u8 {
        match self {
            AttrFormat::Page => 0b10 << 4,
            AttrFormat::List => 0b11 << 4,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0b11 {
            0b10 => Some(AttrFormat::Page),
            0b11 => Some(AttrFormat::List),
            _ => None,
        }
    }
}

/// A command serialized for the transport: the CDB plus the data-out buffer.
#[derive(Debug, Clone)]
pub struct EncodedCommand {
    pub cdb: Bytes,
    pub data_out: Bytes,
}

/// Serialize a command. Fails only on unsupported attribute descriptor
/// combinations; every well-formed command encodes.
pub fn encode(cmd: &Command) -> Result<EncodedCommand> {
    if !cmd.action.is_varlen() {
        return encode_fixed(cmd);
    }

    // Member-attribute commands fan descriptors over every collection
    // member; only the list form can carry a per-member response.
    if matches!(
        cmd.action,
        ServiceAction::GetMemberAttributes | ServiceAction::SetMemberAttributes
    ) && cmd
        .attrs
        .iter()
        .any(|a| matches!(a, AttrRequest::GetPage { .. }))
    {
        return Err(WireError::AttrCombination(
            "member-attribute commands take list descriptors only",
        ));
    }

    let mut cdb = BytesMut::zeroed(OSD_CDB_SIZE);
    cdb[0] = VARLEN_CDB_OPCODE;
    cdb[7] = (OSD_CDB_SIZE - 8) as u8;
    cdb[8..10].copy_from_slice(&cmd.action.code().to_be_bytes());
    if cmd.force {
        cdb[10] |= CdbOptions::FORCE.bits();
    }
    cdb[12] = TIMESTAMP_OFF;
    cdb[16..24].copy_from_slice(&cmd.partition_id.to_be_bytes());
    cdb[24..32].copy_from_slice(&cmd.object_id.to_be_bytes());

    match cmd.action {
        ServiceAction::Create => {
            cdb[36..38].copy_from_slice(&cmd.num_objects.to_be_bytes());
        }
        ServiceAction::Format
        | ServiceAction::Read
        | ServiceAction::Write
        | ServiceAction::Append => {
            cdb[36..44].copy_from_slice(&cmd.length.to_be_bytes());
            cdb[44..52].copy_from_slice(&cmd.offset.to_be_bytes());
        }
        _ => {}
    }

    let payload = cmd.data_out.clone().unwrap_or_default();
    let (attr_bytes, fmt) = encode_attr_request(&cmd.attrs, &mut cdb)?;
    if let Some(fmt) = fmt {
        cdb[11] |= fmt.bits();
    } else {
        // Page format with page 0 means "nothing to retrieve".
        cdb[11] |= AttrFormat::Page.bits();
    }

    let mut data_out = BytesMut::with_capacity(payload.len() + attr_bytes.len());
    data_out.put_slice(&payload);
    data_out.put_slice(&attr_bytes);

    Ok(EncodedCommand {
        cdb: cdb.freeze(),
        data_out: data_out.freeze(),
    })
}

fn encode_fixed(cmd: &Command) -> Result<EncodedCommand> {
    if !cmd.attrs.is_empty() {
        return Err(WireError::AttrCombination(
            "fixed-format commands carry no attribute descriptors",
        ));
    }
    let mut cdb = BytesMut::zeroed(6);
    match cmd.action {
        ServiceAction::Inquiry => {
            cdb[0] = INQUIRY_OPCODE;
            cdb[4] = cmd.inquiry_len;
        }
        ServiceAction::TestUnitReady => {
            cdb[0] = TEST_UNIT_READY_OPCODE;
        }
        _ => unreachable!("fixed encoding only for 6-byte commands"),
    }
    Ok(EncodedCommand {
        cdb: cdb.freeze(),
        data_out: Bytes::new(),
    })
}

/// Split descriptors into the wire lists and fill the CDB attribute fields.
/// Returns the bytes to append to data-out and the chosen format.
fn encode_attr_request(
    attrs: &[AttrRequest],
    cdb: &mut BytesMut,
) -> Result<(Bytes, Option<AttrFormat>)> {
    if attrs.is_empty() {
        return Ok((Bytes::new(), None));
    }

    let mut gets: Vec<GetEntry> = Vec::new();
    let mut sets: Vec<AttrListEntry> = Vec::new();
    let mut get_page: Option<(u32, u32)> = None;

    for attr in attrs {
        match attr {
            AttrRequest::Get {
                page,
                number,
                max_len,
            } => gets.push(GetEntry {
                page: *page,
                number: *number,
                max_len: *max_len,
            }),
            AttrRequest::GetPage { page, max_len } => {
                if get_page.is_some() {
                    return Err(WireError::AttrCombination(
                        "at most one page may be retrieved per command",
                    ));
                }
                get_page = Some((*page, *max_len));
            }
            AttrRequest::Set {
                page,
                number,
                value,
            } => sets.push(AttrListEntry {
                page: *page,
                number: *number,
                value: value.to_bytes(),
            }),
        }
    }

    if let Some((page, max_len)) = get_page {
        if !gets.is_empty() || !sets.is_empty() {
            return Err(WireError::AttrCombination(
                "page retrieval cannot be mixed with list descriptors",
            ));
        }
        cdb[52..56].copy_from_slice(&page.to_be_bytes());
        cdb[56..60].copy_from_slice(&(max_len + 8).to_be_bytes());
        return Ok((Bytes::new(), Some(AttrFormat::Page)));
    }

    let get_list = if gets.is_empty() {
        Bytes::new()
    } else {
        attrs::encode_get_list(&gets)
    };
    let set_list = if sets.is_empty() {
        Bytes::new()
    } else {
        attrs::encode_value_list(&sets)
    };

    // Worst-case space for the returned list: header plus every entry at its
    // requested maximum, saturated to the 32-bit field.
    let alloc = gets
        .iter()
        .fold(4u64, |acc, g| acc + 12 + u64::from(g.max_len))
        .min(u64::from(u32::MAX)) as u32;

    cdb[52..56].copy_from_slice(&(get_list.len() as u32).to_be_bytes());
    cdb[56..60].copy_from_slice(&(set_list.len() as u32).to_be_bytes());
    cdb[60..64].copy_from_slice(&alloc.to_be_bytes());

    let mut combined = BytesMut::with_capacity(get_list.len() + set_list.len());
    combined.put_slice(&get_list);
    combined.put_slice(&set_list);
    Ok((combined.freeze(), Some(AttrFormat::List)))
}

/// A CDB as seen by the target, with every fixed-offset field extracted.
///
/// `length`/`num_objects` overlap on the wire; the service action decides
/// which interpretation applies.
#[derive(Debug, Clone)]
pub struct DecodedCdb {
    pub action: ServiceAction,
    pub partition_id: u64,
    pub object_id: u64,
    pub length: u64,
    pub offset: u64,
    pub num_objects: u16,
    pub force: bool,
    pub attr_format: Option<AttrFormat>,
    /// Page format: requested page id.
    pub attr_page: u32,
    /// Page format: allocation length for the returned page.
    pub attr_alloc_len: u32,
    /// List format: byte length of the retrieve list in data-out.
    pub get_list_len: u32,
    /// List format: byte length of the set list in data-out.
    pub set_list_len: u32,
    /// Allocation length for the fixed-format `Inquiry` reply.
    pub inquiry_len: u8,
}

/// Parse a CDB. The 6-byte fixed commands and the 200-byte variable-length
/// form are distinguished by the opcode byte.
pub fn decode(cdb: &[u8]) -> Result<DecodedCdb> {
    let opcode = *cdb.first().ok_or(WireError::Truncated { need: 1, have: 0 })?;
    match opcode {
        VARLEN_CDB_OPCODE => decode_varlen(cdb),
        INQUIRY_OPCODE | TEST_UNIT_READY_OPCODE => {
            if cdb.len() < 6 {
                return Err(WireError::Truncated {
                    need: 6,
                    have: cdb.len(),
                });
            }
            let action = if opcode == INQUIRY_OPCODE {
                ServiceAction::Inquiry
            } else {
                ServiceAction::TestUnitReady
            };
            Ok(DecodedCdb {
                action,
                inquiry_len: cdb[4],
                ..DecodedCdb::empty(action)
            })
        }
        other => Err(WireError::UnknownOpcode(other)),
    }
}

fn decode_varlen(cdb: &[u8]) -> Result<DecodedCdb> {
    if cdb.len() < OSD_CDB_SIZE {
        return Err(WireError::Truncated {
            need: OSD_CDB_SIZE,
            have: cdb.len(),
        });
    }
    let code = (&cdb[8..10]).get_u16();
    let action = ServiceAction::from_code(code).ok_or(WireError::UnknownAction(code))?;
    let attr_format = AttrFormat::from_byte(cdb[11]);

    let mut decoded = DecodedCdb {
        action,
        partition_id: (&cdb[16..24]).get_u64(),
        object_id: (&cdb[24..32]).get_u64(),
        length: (&cdb[36..44]).get_u64(),
        offset: (&cdb[44..52]).get_u64(),
        num_objects: (&cdb[36..38]).get_u16(),
        force: CdbOptions::from_bits_truncate(cdb[10]).contains(CdbOptions::FORCE),
        attr_format,
        ..DecodedCdb::empty(action)
    };
    match attr_format {
        Some(AttrFormat::Page) => {
            decoded.attr_page = (&cdb[52..56]).get_u32();
            decoded.attr_alloc_len = (&cdb[56..60]).get_u32();
        }
        Some(AttrFormat::List) => {
            decoded.get_list_len = (&cdb[52..56]).get_u32();
            decoded.set_list_len = (&cdb[56..60]).get_u32();
            decoded.attr_alloc_len = (&cdb[60..64]).get_u32();
        }
        None => {}
    }
    Ok(decoded)
}

impl DecodedCdb {
    fn empty(action: ServiceAction) -> Self {
        Self {
            action,
            partition_id: 0,
            object_id: 0,
            length: 0,
            offset: 0,
            num_objects: 0,
            force: false,
            attr_format: None,
            attr_page: 0,
            attr_alloc_len: 0,
            get_list_len: 0,
            set_list_len: 0,
            inquiry_len: 0,
        }
    }

    /// Slice the attribute lists off the tail of the data-out buffer.
    /// Returns (payload, retrieve list bytes, set list bytes).
    pub fn split_data_out<'a>(&self, data_out: &'a [u8]) -> Result<(&'a [u8], &'a [u8], &'a [u8])> {
        // Both lengths are untrusted 32-bit fields; sum in 64 bits.
        let attr_len = self.get_list_len as u64 + self.set_list_len as u64;
        if (data_out.len() as u64) < attr_len {
            return Err(WireError::Truncated {
                need: attr_len as usize,
                have: data_out.len(),
            });
        }
        let attr_len = attr_len as usize;
        let payload_len = data_out.len() - attr_len;
        let (payload, lists) = data_out.split_at(payload_len);
        let (get_list, set_list) = lists.split_at(self.get_list_len as usize);
        Ok((payload, get_list, set_list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeValue, CUR_CMD_ATTR_PG};

    #[test]
    fn varlen_cdb_fixed_offsets() {
        let cmd = Command::read(0x10000, 0x10010, 0x1122, 0x8000);
        let enc = encode(&cmd).unwrap();
        let cdb = &enc.cdb;
        assert_eq!(cdb.len(), OSD_CDB_SIZE);
        assert_eq!(cdb[0], VARLEN_CDB_OPCODE);
        assert_eq!(cdb[7], 192);
        assert_eq!(&cdb[8..10], &0x8805u16.to_be_bytes());
        assert_eq!(&cdb[16..24], &0x10000u64.to_be_bytes());
        assert_eq!(&cdb[24..32], &0x10010u64.to_be_bytes());
        assert_eq!(&cdb[36..44], &0x8000u64.to_be_bytes());
        assert_eq!(&cdb[44..52], &0x1122u64.to_be_bytes());
    }

    #[test]
    fn create_count_occupies_bytes_36_38() {
        let cmd = Command::create_many(0x10000, 0, 10);
        let enc = encode(&cmd).unwrap();
        assert_eq!(&enc.cdb[36..38], &10u16.to_be_bytes());
    }

    #[test]
    fn force_flag_sets_options_bit() {
        let cmd = Command::remove_collection(0x10000, 0x10020, true);
        let enc = encode(&cmd).unwrap();
        assert_eq!(enc.cdb[10] & 0x01, 0x01);
        let dec = decode(&enc.cdb).unwrap();
        assert!(dec.force);
    }

    #[test]
    fn cdb_round_trip() {
        let cmd = Command::write(0x10000, 0x10010, 7, Bytes::from_static(b"payload"));
        let enc = encode(&cmd).unwrap();
        let dec = decode(&enc.cdb).unwrap();
        assert_eq!(dec.action, ServiceAction::Write);
        assert_eq!(dec.partition_id, 0x10000);
        assert_eq!(dec.object_id, 0x10010);
        assert_eq!(dec.length, 7);
        assert_eq!(dec.offset, 7);
    }

    #[test]
    fn list_format_splits_data_out() {
        let cmd = Command::write(0x10000, 0x10010, 0, Bytes::from_static(b"data"))
            .with_attr(AttrRequest::Get {
                page: 1,
                number: 0x82,
                max_len: 8,
            })
            .with_attr(AttrRequest::Set {
                page: 4,
                number: 2,
                value: AttributeValue::Integer64(0x10020),
            });
        let enc = encode(&cmd).unwrap();
        let dec = decode(&enc.cdb).unwrap();
        assert_eq!(dec.attr_format, Some(AttrFormat::List));
        let (payload, get_list, set_list) = dec.split_data_out(&enc.data_out).unwrap();
        assert_eq!(payload, b"data");
        assert_eq!(crate::attrs::decode_get_list(get_list).unwrap().len(), 1);
        let sets = crate::attrs::decode_value_list(set_list).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].value.as_ref(), &0x10020u64.to_be_bytes());
    }

    #[test]
    fn single_get_page_uses_page_format() {
        let cmd = Command::get_attributes(0x10000, 0x10010).with_attr(AttrRequest::GetPage {
            page: CUR_CMD_ATTR_PG,
            max_len: 48,
        });
        let enc = encode(&cmd).unwrap();
        let dec = decode(&enc.cdb).unwrap();
        assert_eq!(dec.attr_format, Some(AttrFormat::Page));
        assert_eq!(dec.attr_page, CUR_CMD_ATTR_PG);
        assert_eq!(dec.attr_alloc_len, 56);
    }

    #[test]
    fn mixing_page_and_list_is_rejected() {
        let cmd = Command::get_attributes(0x10000, 0x10010)
            .with_attr(AttrRequest::GetPage {
                page: CUR_CMD_ATTR_PG,
                max_len: 48,
            })
            .with_attr(AttrRequest::Get {
                page: 1,
                number: 0x82,
                max_len: 8,
            });
        assert!(matches!(
            encode(&cmd),
            Err(WireError::AttrCombination(_))
        ));
    }

    #[test]
    fn maximal_list_lengths_do_not_wrap() {
        // A hand-crafted CDB may claim list lengths whose u32 sum wraps to a
        // small number; the split must still report truncation.
        let cmd = Command::get_attributes(0x10000, 0x10010);
        let enc = encode(&cmd).unwrap();
        let mut cdb = enc.cdb.to_vec();
        cdb[11] = (cdb[11] & !0x30) | (0b11 << 4);
        cdb[52..56].copy_from_slice(&u32::MAX.to_be_bytes());
        cdb[56..60].copy_from_slice(&u32::MAX.to_be_bytes());
        let dec = decode(&cdb).unwrap();
        assert!(matches!(
            dec.split_data_out(&[0u8; 16]),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_max_len_saturates_allocation_field() {
        let cmd = Command::get_attributes(0x10000, 0x10010)
            .with_attr(AttrRequest::Get {
                page: 1,
                number: 1,
                max_len: u32::MAX,
            })
            .with_attr(AttrRequest::Get {
                page: 1,
                number: 2,
                max_len: u32::MAX,
            });
        let enc = encode(&cmd).unwrap();
        let dec = decode(&enc.cdb).unwrap();
        assert_eq!(dec.attr_alloc_len, u32::MAX);
    }

    #[test]
    fn member_commands_refuse_page_descriptors() {
        let cmd = Command::get_member_attributes(0x10000, 0x20000).with_attr(
            AttrRequest::GetPage {
                page: CUR_CMD_ATTR_PG,
                max_len: 48,
            },
        );
        assert!(matches!(
            encode(&cmd),
            Err(WireError::AttrCombination(_))
        ));
    }

    #[test]
    fn fixed_inquiry_cdb() {
        let enc = encode(&Command::inquiry(80)).unwrap();
        assert_eq!(enc.cdb.len(), 6);
        assert_eq!(enc.cdb[0], 0x12);
        assert_eq!(enc.cdb[4], 80);
        let dec = decode(&enc.cdb).unwrap();
        assert_eq!(dec.action, ServiceAction::Inquiry);
        assert_eq!(dec.inquiry_len, 80);
    }
}
