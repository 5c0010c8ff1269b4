//! Error types for wire encoding and decoding

use thiserror::Error;

/// Errors raised while encoding or decoding protocol bytes.
///
/// Every variant here is a programming or compatibility bug, not an expected
/// runtime condition: a well-behaved peer never produces a malformed segment.
/// Check conditions reported by the target are not errors at this layer; they
/// travel inside the decoded reply.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("buffer truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown service action 0x{0:04x}")]
    UnknownAction(u16),

    #[error("unknown CDB opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("attribute page mismatch: requested 0x{requested:08x}, got 0x{returned:08x}")]
    PageMismatch { requested: u32, returned: u32 },

    #[error("attribute list overruns segment: entry length {len} at offset {offset}")]
    ListOverrun { offset: usize, len: u32 },

    #[error("attribute entry mismatch: expected page 0x{page:08x} number {number}")]
    EntryMismatch { page: u32, number: u32 },

    #[error("unsupported attribute combination: {0}")]
    AttrCombination(&'static str),

    #[error("invalid sense key 0x{0:02x}")]
    InvalidSenseKey(u8),

    #[error("invalid reply frame: {0}")]
    InvalidReply(&'static str),
}
