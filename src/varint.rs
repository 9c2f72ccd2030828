//! The "nibble + extension bytes" integer representation shared by option deltas and option
//!  value lengths:
//!
//! ```ascii
//! value < 13            nibble = value, no extension
//! 13 <= value < 269     nibble = 13, 1 extension byte = value - 13
//! 269 <= value < 65805  nibble = 14, 2 extension bytes (BE) = value - 269
//! ```
//!
//! Nibble 15 is reserved: in the option header it would collide with the payload marker.

use bytes::BufMut;
use crate::buffer::Cursor;
use crate::error::CodecError;

pub const ONE_BYTE_NIBBLE: u8 = 13;
pub const TWO_BYTE_NIBBLE: u8 = 14;
pub const RESERVED_NIBBLE: u8 = 15;

const ONE_BYTE_OFFSET: u32 = 13;
const TWO_BYTE_OFFSET: u32 = 269;

/// exclusive upper bound of encodable values
pub const MAX_EXCLUSIVE: u32 = TWO_BYTE_OFFSET + 0x1_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendedInt {
    Inline(u8),
    OneByte(u8),
    TwoBytes(u16),
}

impl ExtendedInt {
    pub fn encode(value: u32) -> Result<ExtendedInt, CodecError> {
        if value < ONE_BYTE_OFFSET {
            Ok(ExtendedInt::Inline(value as u8))
        }
        else if value < TWO_BYTE_OFFSET {
            Ok(ExtendedInt::OneByte((value - ONE_BYTE_OFFSET) as u8))
        }
        else if value < MAX_EXCLUSIVE {
            Ok(ExtendedInt::TwoBytes((value - TWO_BYTE_OFFSET) as u16))
        }
        else {
            Err(CodecError::ExtendedIntOverflow(value))
        }
    }

    pub fn nibble(&self) -> u8 {
        match self {
            ExtendedInt::Inline(n) => *n,
            ExtendedInt::OneByte(_) => ONE_BYTE_NIBBLE,
            ExtendedInt::TwoBytes(_) => TWO_BYTE_NIBBLE,
        }
    }

    pub fn extension_len(&self) -> usize {
        match self {
            ExtendedInt::Inline(_) => 0,
            ExtendedInt::OneByte(_) => 1,
            ExtendedInt::TwoBytes(_) => 2,
        }
    }

    pub fn put_extension(&self, buf: &mut impl BufMut) {
        match self {
            ExtendedInt::Inline(_) => {}
            ExtendedInt::OneByte(ext) => buf.put_u8(*ext),
            ExtendedInt::TwoBytes(ext) => buf.put_u16(*ext),
        }
    }

    pub fn value(&self) -> u32 {
        match self {
            ExtendedInt::Inline(n) => *n as u32,
            ExtendedInt::OneByte(ext) => *ext as u32 + ONE_BYTE_OFFSET,
            ExtendedInt::TwoBytes(ext) => *ext as u32 + TWO_BYTE_OFFSET,
        }
    }

    /// Read the extension bytes (if any) that go with `nibble`. `header_offset` is only used for
    ///  error reporting.
    pub fn decode(nibble: u8, header_offset: usize, cursor: &mut Cursor) -> Result<ExtendedInt, CodecError> {
        match nibble {
            n if n < ONE_BYTE_NIBBLE => Ok(ExtendedInt::Inline(n)),
            ONE_BYTE_NIBBLE => Ok(ExtendedInt::OneByte(cursor.next_u8()?)),
            TWO_BYTE_NIBBLE => Ok(ExtendedInt::TwoBytes(cursor.next_u16()?)),
            _ => Err(CodecError::ReservedNibble(header_offset)),
        }
    }
}

/// Number of bytes `value` contributes to an option header besides its nibble
pub fn extension_len(value: u32) -> Result<usize, CodecError> {
    Ok(ExtendedInt::encode(value)?.extension_len())
}
