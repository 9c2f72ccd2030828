use std::fmt::{Debug, Formatter};
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::CodecError;
use crate::varint;

pub const IF_MATCH: u16 = 1;
pub const URI_HOST: u16 = 3;
pub const ETAG: u16 = 4;
pub const IF_NONE_MATCH: u16 = 5;
pub const URI_PORT: u16 = 7;
pub const LOCATION_PATH: u16 = 8;
pub const URI_PATH: u16 = 11;
pub const CONTENT_FORMAT: u16 = 12;
pub const MAX_AGE: u16 = 14;
pub const URI_QUERY: u16 = 15;
pub const ACCEPT: u16 = 17;
pub const LOCATION_QUERY: u16 = 20;
pub const PROXY_URI: u16 = 35;
pub const PROXY_SCHEME: u16 = 39;
pub const SIZE1: u16 = 60;

/// Registered values of the Content-Format and Accept options
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ContentFormat {
    TextPlain = 0,
    LinkFormat = 40,
    Xml = 41,
    OctetStream = 42,
    Exi = 47,
    Json = 50,
}

/// A single numbered option with an opaque value.
///
/// Integer values are held in their wire form - big endian, minimal width of 1, 2 or 4 bytes -
///  so serialization copies the value bytes verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct CoapOption {
    number: u16,
    value: Bytes,
}

impl CoapOption {
    pub fn new(number: u16, value: impl Into<Bytes>) -> CoapOption {
        CoapOption {
            number,
            value: value.into(),
        }
    }

    /// The string's UTF-8 bytes, without any terminator
    pub fn from_text(number: u16, value: &str) -> CoapOption {
        CoapOption::new(number, Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn from_u32(number: u16, value: u32) -> CoapOption {
        let value = if value <= u8::MAX as u32 {
            Bytes::copy_from_slice(&[value as u8])
        }
        else if value <= u16::MAX as u32 {
            Bytes::copy_from_slice(&(value as u16).to_be_bytes())
        }
        else {
            Bytes::copy_from_slice(&value.to_be_bytes())
        };
        CoapOption::new(number, value)
    }

    pub fn content_format(format: ContentFormat) -> CoapOption {
        CoapOption::from_u32(CONTENT_FORMAT, u16::from(format) as u32)
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Interpret the value as a big-endian unsigned integer. An empty value is 0; values longer
    ///  than 4 bytes are not integers.
    pub fn as_u32(&self) -> Option<u32> {
        if self.value.len() > size_of::<u32>() {
            return None;
        }
        Some(self.value.iter()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32))
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Number of bytes this option occupies on the wire when it follows an option numbered
    ///  `prev_number`
    pub fn serialized_len(&self, prev_number: u16) -> Result<usize, CodecError> {
        debug_assert!(prev_number <= self.number);
        let delta = (self.number - prev_number) as u32;

        Ok(1
            + varint::extension_len(delta)?
            + varint::extension_len(self.value.len() as u32)?
            + self.value.len())
    }
}

impl Debug for CoapOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.as_str() {
            Some(s) if !s.is_empty() && s.chars().all(|c| !c.is_control()) => write!(f, "{}:{:?}", self.number, s),
            _ => write!(f, "{}:{:?}", self.number, self.value.as_ref()),
        }
    }
}
