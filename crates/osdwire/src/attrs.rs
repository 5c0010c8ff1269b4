//! Attribute segment codec
//!
//! Two wire forms exist. The *list* form carries an explicit count of
//! descriptor entries, each `page:u32be, number:u32be, length:u32be` followed
//! by `length` payload bytes; a retrieve list elides the payload (the length
//! field is the requested maximum), a set list and a response list carry it.
//! The *page* form is a single self-describing page: `page:u32be,
//! length:u32be, payload`.
//!
//! All multi-byte fields are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::Result;

/// Fixed prefix of a list entry before its payload.
const ENTRY_HEADER: usize = 12;

/// A retrieve-list entry: ask for one attribute, bounded by `max_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetEntry {
    pub page: u32,
    pub number: u32,
    pub max_len: u32,
}

/// A value-carrying list entry, used in set lists and response lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrListEntry {
    pub page: u32,
    pub number: u32,
    pub value: Bytes,
}

/// Encode a retrieve list: entries name the attribute and the maximum number
/// of bytes the caller is prepared to accept, with no payload.
pub fn encode_get_list(entries: &[GetEntry]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + entries.len() * ENTRY_HEADER);
    buf.put_u32(entries.len() as u32);
    for e in entries {
        buf.put_u32(e.page);
        buf.put_u32(e.number);
        buf.put_u32(e.max_len);
    }
    buf.freeze()
}

pub fn decode_get_list(data: &[u8]) -> Result<Vec<GetEntry>> {
    let mut buf = data;
    if buf.remaining() < 4 {
        return Err(WireError::Truncated {
            need: 4,
            have: buf.remaining(),
        });
    }
    let count = buf.get_u32() as usize;
    // The count is untrusted; never preallocate more than the bytes on hand
    // could describe.
    let mut entries = Vec::with_capacity(count.min(data.len() / ENTRY_HEADER));
    for _ in 0..count {
        if buf.remaining() < ENTRY_HEADER {
            return Err(WireError::Truncated {
                need: ENTRY_HEADER,
                have: buf.remaining(),
            });
        }
        entries.push(GetEntry {
            page: buf.get_u32(),
            number: buf.get_u32(),
            max_len: buf.get_u32(),
        });
    }
    Ok(entries)
}

/// Encode a value list (set list or response list). A zero-length value
/// serializes as length 0 with no payload; on a set list that deletes the
/// attribute.
pub fn encode_value_list(entries: &[AttrListEntry]) -> Bytes {
    let total: usize = entries.iter().map(|e| ENTRY_HEADER + e.value.len()).sum();
    let mut buf = BytesMut::with_capacity(4 + total);
    buf.put_u32(entries.len() as u32);
    for e in entries {
        buf.put_u32(e.page);
        buf.put_u32(e.number);
        buf.put_u32(e.value.len() as u32);
        buf.put_slice(&e.value);
    }
    buf.freeze()
}

pub fn decode_value_list(data: &[u8]) -> Result<Vec<AttrListEntry>> {
    let total = data.len();
    let mut buf = data;
    if buf.remaining() < 4 {
        return Err(WireError::Truncated {
            need: 4,
            have: buf.remaining(),
        });
    }
    let count = buf.get_u32() as usize;
    let mut entries = Vec::with_capacity(count.min(total / ENTRY_HEADER));
    for _ in 0..count {
        if buf.remaining() < ENTRY_HEADER {
            return Err(WireError::Truncated {
                need: ENTRY_HEADER,
                have: buf.remaining(),
            });
        }
        let page = buf.get_u32();
        let number = buf.get_u32();
        let len = buf.get_u32();
        if buf.remaining() < len as usize {
            return Err(WireError::ListOverrun {
                offset: total - buf.remaining(),
                len,
            });
        }
        let value = Bytes::copy_from_slice(&buf[..len as usize]);
        buf.advance(len as usize);
        entries.push(AttrListEntry {
            page,
            number,
            value,
        });
    }
    Ok(entries)
}

/// Encode a self-describing page segment.
pub fn encode_page(page: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_u32(page);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a page segment into (page number, payload). Tolerates trailing
/// bytes after the declared payload length.
pub fn decode_page(data: &[u8]) -> Result<(u32, Bytes)> {
    let mut buf = data;
    if buf.remaining() < 8 {
        return Err(WireError::Truncated {
            need: 8,
            have: buf.remaining(),
        });
    }
    let page = buf.get_u32();
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(WireError::ListOverrun {
            offset: 8,
            len: len as u32,
        });
    }
    Ok((page, Bytes::copy_from_slice(&buf[..len])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_list_round_trip() {
        let entries = vec![
            GetEntry {
                page: 0x3000_0000,
                number: 1,
                max_len: 100,
            },
            GetEntry {
                page: 4,
                number: 7,
                max_len: 8,
            },
        ];
        let wire = encode_get_list(&entries);
        assert_eq!(wire.len(), 4 + 2 * 12);
        assert_eq!(decode_get_list(&wire).unwrap(), entries);
    }

    #[test]
    fn value_list_round_trip_preserves_order() {
        let entries = vec![
            AttrListEntry {
                page: 4,
                number: 1,
                value: Bytes::from_static(b"\x00\x00\x00\x00\x00\x01\x00\x00"),
            },
            AttrListEntry {
                page: 4,
                number: 2,
                value: Bytes::new(),
            },
            AttrListEntry {
                page: 0x10000,
                number: 26,
                value: Bytes::from_static(b"hello"),
            },
        ];
        let wire = encode_value_list(&entries);
        assert_eq!(decode_value_list(&wire).unwrap(), entries);
    }

    #[test]
    fn value_list_rejects_overrun() {
        let mut wire = BytesMut::new();
        wire.put_u32(1);
        wire.put_u32(0);
        wire.put_u32(0);
        wire.put_u32(64); // claims 64 payload bytes, none follow
        assert!(matches!(
            decode_value_list(&wire),
            Err(WireError::ListOverrun { .. })
        ));
    }

    #[test]
    fn huge_wire_count_is_rejected_without_allocating() {
        // Count field claims ~4 billion entries; only the 4-byte header is
        // actually present.
        let wire = u32::MAX.to_be_bytes();
        assert!(matches!(
            decode_get_list(&wire),
            Err(WireError::Truncated { .. })
        ));
        assert!(matches!(
            decode_value_list(&wire),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn page_round_trip() {
        let wire = encode_page(0xFFFF_FFFE, &[0u8; 48]);
        let (page, payload) = decode_page(&wire).unwrap();
        assert_eq!(page, 0xFFFF_FFFE);
        assert_eq!(payload.len(), 48);
    }

    #[test]
    fn page_rejects_truncation() {
        let wire = encode_page(1, b"abcdef");
        assert!(decode_page(&wire[..wire.len() - 1]).is_err());
        assert!(decode_page(&wire[..4]).is_err());
    }
}
