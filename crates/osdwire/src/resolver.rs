//! Attribute page resolver
//!
//! Matches the raw attribute segment of a reply against the descriptors the
//! command carried, producing one [`AttributeResult`] per returned value in
//! request order. Page-form responses are verified against the requested
//! page and expanded into their defined attributes; the Current Command
//! Attributes Page and the timestamp page have fixed layouts parsed here.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::attrs;
use crate::error::WireError;
use crate::types::{
    AttrRequest, CCAP_OID, CCAP_PID, CUR_CMD_ATTR_PG, USER_TMSTMP_PG, UTSAP_ATTR_ATIME,
    UTSAP_ATTR_MTIME, UTSAP_CTIME, UTSAP_DATA_ATIME, UTSAP_DATA_MTIME,
};
use crate::Result;

/// One resolved attribute: where it came from and the returned bytes.
///
/// A returned value shorter than the requested maximum is a partial return,
/// not an error; zero length means the attribute is unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeResult {
    pub page: u32,
    pub number: u32,
    pub value: Bytes,
}

impl AttributeResult {
    /// Reinterpret the value as a big-endian u64, if it is exactly 8 bytes.
    pub fn as_u64(&self) -> Option<u64> {
        if self.value.len() == 8 {
            let mut buf = self.value.clone();
            Some(buf.get_u64())
        } else {
            None
        }
    }
}

/// Resolve a response attribute segment against the request descriptors.
///
/// For list-form responses every entry must match a `Get` descriptor in
/// request order. Member-attribute commands fan one descriptor list out over
/// every collection member, so the response may repeat the request sequence;
/// entries are matched cyclically and results keep response order.
pub fn resolve(requests: &[AttrRequest], segment: &[u8]) -> Result<Vec<AttributeResult>> {
    let gets: Vec<&AttrRequest> = requests.iter().filter(|r| r.is_get()).collect();

    if gets.is_empty() {
        if segment.is_empty() {
            return Ok(Vec::new());
        }
        return Err(WireError::InvalidReply("unexpected attribute segment"));
    }

    if let AttrRequest::GetPage { page, .. } = gets[0] {
        // Encoder guarantees a page request travels alone.
        let (returned, payload) = attrs::decode_page(segment)?;
        if returned != *page {
            return Err(WireError::PageMismatch {
                requested: *page,
                returned,
            });
        }
        return Ok(expand_page(*page, payload));
    }

    let entries = attrs::decode_value_list(segment)?;
    let mut results = Vec::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        match gets[i % gets.len()] {
            AttrRequest::Get { page, number, .. } => {
                if entry.page != *page || entry.number != *number {
                    return Err(WireError::EntryMismatch {
                        page: *page,
                        number: *number,
                    });
                }
            }
            _ => unreachable!("page requests handled above"),
        }
        results.push(AttributeResult {
            page: entry.page,
            number: entry.number,
            value: entry.value,
        });
    }
    Ok(results)
}

/// Expand a page payload into the attributes defined under that page.
/// Unknown pages yield a single result carrying the raw payload.
fn expand_page(page: u32, payload: Bytes) -> Vec<AttributeResult> {
    match page {
        CUR_CMD_ATTR_PG => {
            if let Ok(ccap) = CurrentCommandPage::parse_payload(&payload) {
                return vec![
                    AttributeResult {
                        page,
                        number: CCAP_PID,
                        value: Bytes::copy_from_slice(&ccap.partition_id.to_be_bytes()),
                    },
                    AttributeResult {
                        page,
                        number: CCAP_OID,
                        value: Bytes::copy_from_slice(&ccap.object_id.to_be_bytes()),
                    },
                ];
            }
        }
        USER_TMSTMP_PG => {
            if let Ok(ts) = TimestampPage::parse_payload(&payload) {
                return [
                    (UTSAP_CTIME, ts.created),
                    (UTSAP_ATTR_ATIME, ts.attr_access),
                    (UTSAP_ATTR_MTIME, ts.attr_modify),
                    (UTSAP_DATA_ATIME, ts.data_access),
                    (UTSAP_DATA_MTIME, ts.data_modify),
                ]
                .into_iter()
                .map(|(number, stamp)| AttributeResult {
                    page,
                    number,
                    value: encode_timestamp48(stamp),
                })
                .collect();
            }
        }
        _ => {}
    }
    vec![AttributeResult {
        page,
        number: 0,
        value: payload,
    }]
}

/// Current Command Attributes Page, 56 bytes on the wire.
///
/// Layout: page id (4), remaining length = 48 (4), reserved (24), partition
/// id (8), object id (8), reserved (8). Reports the identifiers the command
/// actually acted upon; after a create-any this is where the assigned id
/// comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentCommandPage {
    pub partition_id: u64,
    pub object_id: u64,
}

/// Total on-wire size of the CCAP including its header.
pub const CCAP_TOTAL_LEN: usize = 56;

impl CurrentCommandPage {
    pub fn new(partition_id: u64, object_id: u64) -> Self {
        Self {
            partition_id,
            object_id,
        }
    }

    /// Encode the full 56-byte page including its header.
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::zeroed(CCAP_TOTAL_LEN - 8);
        payload[24..32].copy_from_slice(&self.partition_id.to_be_bytes());
        payload[32..40].copy_from_slice(&self.object_id.to_be_bytes());
        attrs::encode_page(CUR_CMD_ATTR_PG, &payload)
    }

    /// Parse from the full 56-byte page, verifying the page id.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (page, payload) = attrs::decode_page(data)?;
        if page != CUR_CMD_ATTR_PG {
            return Err(WireError::PageMismatch {
                requested: CUR_CMD_ATTR_PG,
                returned: page,
            });
        }
        Self::parse_payload(&payload)
    }

    /// Parse from the 48-byte payload following the page header.
    pub fn parse_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < CCAP_TOTAL_LEN - 8 {
            return Err(WireError::Truncated {
                need: CCAP_TOTAL_LEN - 8,
                have: payload.len(),
            });
        }
        Ok(Self {
            partition_id: (&payload[24..32]).get_u64(),
            object_id: (&payload[32..40]).get_u64(),
        })
    }
}

/// User object timestamp page: five 6-byte big-endian millisecond counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampPage {
    pub created: u64,
    pub attr_access: u64,
    pub attr_modify: u64,
    pub data_access: u64,
    pub data_modify: u64,
}

/// Total on-wire size of the timestamp page including its header.
pub const TMSTMP_TOTAL_LEN: usize = 38;

impl TimestampPage {
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(TMSTMP_TOTAL_LEN - 8);
        for stamp in [
            self.created,
            self.attr_access,
            self.attr_modify,
            self.data_access,
            self.data_modify,
        ] {
            payload.put_slice(&encode_timestamp48(stamp));
        }
        attrs::encode_page(USER_TMSTMP_PG, &payload)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let (page, payload) = attrs::decode_page(data)?;
        if page != USER_TMSTMP_PG {
            return Err(WireError::PageMismatch {
                requested: USER_TMSTMP_PG,
                returned: page,
            });
        }
        Self::parse_payload(&payload)
    }

    pub fn parse_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < TMSTMP_TOTAL_LEN - 8 {
            return Err(WireError::Truncated {
                need: TMSTMP_TOTAL_LEN - 8,
                have: payload.len(),
            });
        }
        let mut stamps = [0u64; 5];
        for (i, stamp) in stamps.iter_mut().enumerate() {
            *stamp = decode_timestamp48(&payload[i * 6..i * 6 + 6]);
        }
        Ok(Self {
            created: stamps[0],
            attr_access: stamps[1],
            attr_modify: stamps[2],
            data_access: stamps[3],
            data_modify: stamps[4],
        })
    }
}

/// Timestamps on the wire are 48-bit big-endian millisecond counts.
pub fn encode_timestamp48(millis: u64) -> Bytes {
    let be = millis.to_be_bytes();
    Bytes::copy_from_slice(&be[2..8])
}

pub fn decode_timestamp48(data: &[u8]) -> u64 {
    let mut be = [0u8; 8];
    be[2..8].copy_from_slice(&data[..6]);
    u64::from_be_bytes(be)
}
