//! Reply frame and decoded command result
//!
//! A target answers every command with one response buffer: a 12-byte header
//! (status, sense, section lengths) followed by the data-in bytes and the
//! returned attribute segment. [`CommandResult::decode`] demultiplexes the
//! buffer, classifies the status, and resolves the attribute segment against
//! the original command's descriptors.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::error::WireError;
use crate::resolver::{self, AttributeResult, CurrentCommandPage};
use crate::sense::{SenseData, SenseKey, STATUS_CHECK_CONDITION, STATUS_GOOD};
use crate::types::{CCAP_OID, CCAP_PID, CUR_CMD_ATTR_PG};
use crate::Result;

const REPLY_HEADER: usize = 12;

/// A raw reply frame, as built by the target and parsed by the initiator.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u8,
    pub sense: Option<SenseData>,
    pub data_in: Bytes,
    pub attr_segment: Bytes,
}

impl Reply {
    pub fn good(data_in: Bytes, attr_segment: Bytes) -> Self {
        Self {
            status: STATUS_GOOD,
            sense: None,
            data_in,
            attr_segment,
        }
    }

    pub fn check(sense: SenseData) -> Self {
        Self {
            status: STATUS_CHECK_CONDITION,
            sense: Some(sense),
            data_in: Bytes::new(),
            attr_segment: Bytes::new(),
        }
    }

    /// A check condition that still carries data, as a short read does.
    pub fn check_with_data(sense: SenseData, data_in: Bytes, attr_segment: Bytes) -> Self {
        Self {
            status: STATUS_CHECK_CONDITION,
            sense: Some(sense),
            data_in,
            attr_segment,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(REPLY_HEADER + self.data_in.len() + self.attr_segment.len());
        buf.put_u8(self.status);
        match self.sense {
            Some(sense) => {
                buf.put_u8(sense.key as u8);
                buf.put_u16(sense.code);
            }
            None => {
                buf.put_u8(0);
                buf.put_u16(0);
            }
        }
        buf.put_u32(self.data_in.len() as u32);
        buf.put_u32(self.attr_segment.len() as u32);
        buf.put_slice(&self.data_in);
        buf.put_slice(&self.attr_segment);
        buf.freeze()
    }

    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.len() < REPLY_HEADER {
            return Err(WireError::Truncated {
                need: REPLY_HEADER,
                have: frame.len(),
            });
        }
        let status = frame.get_u8();
        let key = frame.get_u8();
        let code = frame.get_u16();
        let data_len = frame.get_u32() as usize;
        let attr_len = frame.get_u32() as usize;
        if frame.remaining() < data_len + attr_len {
            return Err(WireError::InvalidReply("section lengths overrun frame"));
        }
        let data_in = frame.split_to(data_len);
        let attr_segment = frame.split_to(attr_len);
        let sense = if status == STATUS_GOOD {
            None
        } else {
            Some(SenseData::new(SenseKey::from_u8(key)?, code))
        };
        Ok(Self {
            status,
            sense,
            data_in,
            attr_segment,
        })
    }
}

/// How a completed exchange is classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Status GOOD.
    Complete,
    /// Check condition for a read past end of object: success with short
    /// data, never an error.
    TruncatedRead,
    /// Any other check condition, sense attached for caller inspection.
    CheckCondition(SenseData),
}

/// The structured result of one exchange.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: u8,
    pub outcome: Outcome,
    /// Bytes read back from the target, possibly short.
    pub data: Bytes,
    /// Resolved attributes, one per returned value, in request order.
    pub attrs: Vec<AttributeResult>,
}

impl CommandResult {
    /// Decode a raw reply frame for `command`.
    ///
    /// Check conditions are not errors at this layer; only a malformed frame
    /// or attribute segment fails.
    pub fn decode(command: &Command, frame: Bytes) -> Result<Self> {
        let reply = Reply::decode(frame)?;
        let outcome = match reply.sense {
            None => Outcome::Complete,
            Some(sense) if sense.is_read_past_end() => Outcome::TruncatedRead,
            Some(sense) => Outcome::CheckCondition(sense),
        };
        // A failed command returns no attributes to resolve.
        let attrs = if matches!(outcome, Outcome::CheckCondition(_)) {
            Vec::new()
        } else {
            resolver::resolve(&command.attrs, &reply.attr_segment)?
        };
        Ok(Self {
            status: reply.status,
            outcome,
            data: reply.data_in,
            attrs,
        })
    }

    /// True for `Complete` and `TruncatedRead`.
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::CheckCondition(_))
    }

    pub fn sense(&self) -> Option<SenseData> {
        match self.outcome {
            Outcome::CheckCondition(sense) => Some(sense),
            _ => None,
        }
    }

    /// Reconstruct the CCAP from resolved attributes, when the command
    /// requested it in either form.
    pub fn ccap(&self) -> Option<CurrentCommandPage> {
        let find = |number: u32| {
            self.attrs
                .iter()
                .find(|a| a.page == CUR_CMD_ATTR_PG && a.number == number)
                .and_then(AttributeResult::as_u64)
        };
        Some(CurrentCommandPage::new(find(CCAP_PID)?, find(CCAP_OID)?))
    }

    /// Assigned object id after a create-any, from the CCAP.
    pub fn assigned_oid(&self) -> Option<u64> {
        self.attrs
            .iter()
            .find(|a| a.page == CUR_CMD_ATTR_PG && a.number == CCAP_OID)
            .and_then(AttributeResult::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sense::asc;
    use crate::types::AttrRequest;

    #[test]
    fn reply_frame_round_trip() {
        let reply = Reply::good(
            Bytes::from_static(b"hello"),
            Bytes::from_static(b"\x00\x00\x00\x00"),
        );
        let frame = reply.encode();
        assert_eq!(frame[0], STATUS_GOOD);
        let decoded = Reply::decode(frame).unwrap();
        assert_eq!(decoded.data_in.as_ref(), b"hello");
        assert_eq!(decoded.attr_segment.len(), 4);
        assert!(decoded.sense.is_none());
    }

    #[test]
    fn check_condition_carries_sense() {
        let reply = Reply::check(SenseData::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
        let decoded = Reply::decode(reply.encode()).unwrap();
        assert_eq!(decoded.status, STATUS_CHECK_CONDITION);
        assert_eq!(
            decoded.sense,
            Some(SenseData::new(
                SenseKey::IllegalRequest,
                asc::INVALID_FIELD_IN_CDB
            ))
        );
    }

    #[test]
    fn read_past_end_classified_as_truncated() {
        let cmd = Command::read(0x10000, 0x10010, 0, 100);
        let reply = Reply::check_with_data(
            SenseData::new(SenseKey::RecoveredError, asc::READ_PAST_END_OF_USER_OBJECT),
            Bytes::from_static(b"short"),
            Bytes::new(),
        );
        let result = CommandResult::decode(&cmd, reply.encode()).unwrap();
        assert_eq!(result.outcome, Outcome::TruncatedRead);
        assert!(result.is_success());
        assert_eq!(result.data.as_ref(), b"short");
    }

    #[test]
    fn failed_command_keeps_sense_and_no_attrs() {
        let cmd = Command::create(0x10000, 0x10010).with_attr(AttrRequest::Get {
            page: CUR_CMD_ATTR_PG,
            number: CCAP_OID,
            max_len: 8,
        });
        let reply = Reply::check(SenseData::new(
            SenseKey::IllegalRequest,
            asc::INVALID_FIELD_IN_CDB,
        ));
        let result = CommandResult::decode(&cmd, reply.encode()).unwrap();
        assert!(!result.is_success());
        assert!(result.attrs.is_empty());
        assert!(result.sense().unwrap().code == asc::INVALID_FIELD_IN_CDB);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(matches!(
            Reply::decode(Bytes::from_static(&[0u8; 4])),
            Err(WireError::Truncated { .. })
        ));
    }
}
