//! SCSI status and sense data
//!
//! A nonzero status carries a sense key plus a 16-bit additional sense code
//! (ASC/ASCQ packed big-endian). One pair is benign: recovered error with
//! "read past end of user object" is classified here so callers can treat
//! a short read as success.

use std::fmt;

use crate::error::WireError;
use crate::Result;

pub const STATUS_GOOD: u8 = 0;
pub const STATUS_CHECK_CONDITION: u8 = 2;

/// SCSI sense keys (SPC-3 table 27).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SenseKey {
    NoSense = 0x0,
    RecoveredError = 0x1,
    NotReady = 0x2,
    MediumError = 0x3,
    HardwareError = 0x4,
    IllegalRequest = 0x5,
    UnitAttention = 0x6,
    DataProtect = 0x7,
    BlankCheck = 0x8,
    VendorSpecific = 0x9,
    CopyAborted = 0xA,
    AbortedCommand = 0xB,
    VolumeOverflow = 0xD,
    Miscompare = 0xE,
}

impl SenseKey {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0x0 => SenseKey::NoSense,
            0x1 => SenseKey::RecoveredError,
            0x2 => SenseKey::NotReady,
            0x3 => SenseKey::MediumError,
            0x4 => SenseKey::HardwareError,
            0x5 => SenseKey::IllegalRequest,
            0x6 => SenseKey::UnitAttention,
            0x7 => SenseKey::DataProtect,
            0x8 => SenseKey::BlankCheck,
            0x9 => SenseKey::VendorSpecific,
            0xA => SenseKey::CopyAborted,
            0xB => SenseKey::AbortedCommand,
            0xD => SenseKey::VolumeOverflow,
            0xE => SenseKey::Miscompare,
            other => return Err(WireError::InvalidSenseKey(other)),
        })
    }
}

/// Additional sense codes used by the target.
pub mod asc {
    pub const LOGICAL_UNIT_NOT_READY_FORMAT_REQUIRED: u16 = 0x0404;
    pub const INVALID_COMMAND_OPERATION_CODE: u16 = 0x2000;
    pub const INVALID_FIELD_IN_CDB: u16 = 0x2400;
    pub const INVALID_FIELD_IN_PARAMETER_LIST: u16 = 0x2600;
    pub const PARTITION_OR_COLLECTION_CONTAINS_OBJECTS: u16 = 0x2C0A;
    pub const READ_PAST_END_OF_USER_OBJECT: u16 = 0x3B17;
    pub const SYSTEM_RESOURCE_FAILURE: u16 = 0x5500;
    pub const QUOTA_ERROR: u16 = 0x5507;
}

/// Decoded sense key/code pair from a check condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    pub key: SenseKey,
    pub code: u16,
}

impl SenseData {
    pub fn new(key: SenseKey, code: u16) -> Self {
        Self { key, code }
    }

    /// The recovered-error pair a read beyond end of object produces.
    /// Callers must treat this as a successful short read.
    pub fn is_read_past_end(&self) -> bool {
        self.key == SenseKey::RecoveredError && self.code == asc::READ_PAST_END_OF_USER_OBJECT
    }

    fn code_text(&self) -> &'static str {
        match self.code {
            asc::LOGICAL_UNIT_NOT_READY_FORMAT_REQUIRED => "logical unit not ready, format required",
            asc::INVALID_COMMAND_OPERATION_CODE => "invalid command operation code",
            asc::INVALID_FIELD_IN_CDB => "invalid field in CDB",
            asc::INVALID_FIELD_IN_PARAMETER_LIST => "invalid field in parameter list",
            asc::PARTITION_OR_COLLECTION_CONTAINS_OBJECTS => {
                "partition or collection contains user objects"
            }
            asc::READ_PAST_END_OF_USER_OBJECT => "read past end of user object",
            asc::SYSTEM_RESOURCE_FAILURE => "system resource failure",
            asc::QUOTA_ERROR => "quota error",
            _ => "unknown additional sense code",
        }
    }
}

impl fmt::Display for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (0x{:04x}: {})",
            self.key,
            self.code,
            self.code_text()
        )
    }
}
