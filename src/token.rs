use std::fmt::{Debug, Formatter};
use bytes::{BufMut, Bytes, BytesMut};
use crate::error::CodecError;
use crate::random::Random;

pub const MAX_TOKEN_LEN: usize = 8;

/// Opaque request / response correlator of 0 to 8 bytes
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Token(Bytes);

/// Number of bytes of the prefix (usually the message id) that go into a generated token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefixWidth {
    One,
    Two,
    Four,
}

impl Token {
    pub fn new(value: impl Into<Bytes>) -> Result<Token, CodecError> {
        let value = value.into();
        if value.len() > MAX_TOKEN_LEN {
            return Err(CodecError::InvalidTokenLength(value.len()));
        }
        Ok(Token(value))
    }

    pub fn empty() -> Token {
        Token(Bytes::new())
    }

    /// Generate a token from the big-endian prefix followed by 4 random bytes.
    ///
    /// With the outgoing message id as prefix, tokens correspond to messages 1:1 while the
    ///  random suffix makes them hard to guess for an off-path attacker. This is *not*
    ///  cryptographically secure.
    pub fn create(prefix: u32, width: PrefixWidth, random: &dyn Random) -> Token {
        let mut buf = BytesMut::with_capacity(MAX_TOKEN_LEN);
        match width {
            PrefixWidth::One => buf.put_u8(prefix as u8),
            PrefixWidth::Two => buf.put_u16(prefix as u16),
            PrefixWidth::Four => buf.put_u32(prefix),
        }
        buf.put_u32(random.next_u32());
        Token(buf.freeze())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl AsRef<[u8]> for Token {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(")?;
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}
