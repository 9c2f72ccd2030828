//! Owned fixed-capacity byte regions and a bounds-checked reading cursor.
//!
//! * [Buffer] is backed by a pre-allocated region whose capacity never grows. It implements
//!   `BufMut`, so encoders write through the `bytes` API, and running out of room is something
//!   encoders check up front rather than a reallocation.
//! * [Cursor] walks a borrowed byte slice. Every read is checked against the remaining bytes and
//!   reports a [CodecError::Bounds] instead of panicking.
//!
//! Multi-byte integers are read in network byte order (big endian).

use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};
use bytes::buf::UninitSlice;
use crate::error::CodecError;

/// A length-tagged, fixed-capacity owned buffer
#[derive(Eq, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    len: usize,
}
impl Buffer {
    /// create a new, empty Buffer with the given capacity
    pub fn new(capacity: usize) -> Buffer {
        Buffer {
            buf: vec![0; capacity],
            len: 0,
        }
    }

    /// create a Buffer that takes ownership of `bytes`, its length and capacity being those of
    ///  the vector
    pub fn from_vec(bytes: Vec<u8>) -> Buffer {
        let len = bytes.len();
        Buffer {
            buf: bytes,
            len,
        }
    }

    pub fn from_slice(data: &[u8]) -> Buffer {
        Buffer::from_vec(data.to_vec())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// make the entire underlying region available through as_ref() etc., e.g. before receiving
    ///  a datagram into it
    pub fn maximize_len(&mut self) {
        self.len = self.capacity();
    }

    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.capacity());
        self.len = len;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// A cursor reading this buffer's bytes from the start
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self.as_ref())
    }

    /// Allocate a new Buffer holding a copy of `len` bytes starting at `offset`
    pub fn copy(&self, offset: usize, len: usize) -> Result<Buffer, CodecError> {
        check_span(offset, len, self.len)?;
        Ok(Buffer::from_slice(&self.as_ref()[offset..offset + len]))
    }

    /// Copy `len` bytes of `source` (starting at `source_offset`) into this buffer at
    ///  `dest_offset`, without reallocating. Nothing is written unless both spans are in range.
    pub fn copy_to(&mut self, dest_offset: usize, source: &[u8], source_offset: usize, len: usize) -> Result<(), CodecError> {
        check_span(source_offset, len, source.len())?;
        check_span(dest_offset, len, self.len)?;

        self.buf[dest_offset..dest_offset + len]
            .copy_from_slice(&source[source_offset..source_offset + len]);
        Ok(())
    }
}

fn check_span(offset: usize, len: usize, available: usize) -> Result<(), CodecError> {
    match offset.checked_add(len) {
        Some(end) if end <= available => Ok(()),
        _ => Err(CodecError::Bounds {
            offset,
            needed: len,
            available: available.saturating_sub(offset),
        }),
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl Borrow<[u8]> for Buffer {
    fn borrow(&self) -> &[u8] {
        self.as_ref()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}
impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for Buffer {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}


/// A read position in a borrowed byte slice
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}
impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor {
            data,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// the unread bytes, without advancing
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    /// Borrow the next `len` bytes and advance past them
    pub fn next_slice(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        check_span(self.position, len, self.data.len())?;
        let result = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(result)
    }

    pub fn next_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.next_slice(1)?[0])
    }

    pub fn next_u16(&mut self) -> Result<u16, CodecError> {
        let raw = self.next_slice(size_of::<u16>())?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    pub fn next_u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.next_slice(size_of::<u32>())?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}
