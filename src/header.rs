use std::fmt::{Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const PROTOCOL_VERSION_1: u8 = 1;

const VERSION_SHIFT: u32 = 30;
const TYPE_SHIFT: u32 = 28;
const TOKEN_LEN_SHIFT: u32 = 24;
const CODE_SHIFT: u32 = 16;

/// The reliability class of a message, packed into bits 28-29 of the header
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    /// the two-bit field is total: every value maps to a type
    fn from_bits(bits: u8) -> MessageType {
        match bits & 0b11 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

/// A message code: a 3-bit class (0 = request, 2 = success, 4 = client error, 5 = server error)
///  and a 5-bit detail, written `c.dd`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);

    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);

    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const FORBIDDEN: Code = Code::new(4, 3);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);

    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);

    pub const fn new(class: u8, detail: u8) -> Code {
        Code(((class & 0b111) << 5) | (detail & 0b1_1111))
    }

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0b1_1111
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_request(&self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Request methods, i.e. the codes of class 0 other than 'empty'
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Method {
    Get = 1,
    Post = 2,
    Put = 3,
    Delete = 4,
}

impl From<Method> for Code {
    fn from(value: Method) -> Self {
        Code::new(0, value.into())
    }
}

/// The packed 32-bit header word, most significant bits first:
///
/// ```ascii
/// [2b version][2b type][4b token length][8b code][16b message id]
/// ```
///
/// The token length is a raw 4-bit field here; values above 8 are only rejected when decoding a
///  complete message.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header(u32);

impl Header {
    pub const SERIALIZED_LEN: usize = size_of::<u32>();

    pub fn new(version: u8, message_type: MessageType, token_len: u8, code: Code, message_id: u16) -> Header {
        let raw = ((version as u32 & 0b11) << VERSION_SHIFT)
            | ((u8::from(message_type) as u32) << TYPE_SHIFT)
            | ((token_len as u32 & 0x0f) << TOKEN_LEN_SHIFT)
            | ((code.0 as u32) << CODE_SHIFT)
            | message_id as u32;
        Header(raw)
    }

    pub fn from_raw(raw: u32) -> Header {
        Header(raw)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn version(&self) -> u8 {
        (self.0 >> VERSION_SHIFT) as u8 & 0b11
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_bits((self.0 >> TYPE_SHIFT) as u8)
    }

    pub fn token_len(&self) -> u8 {
        (self.0 >> TOKEN_LEN_SHIFT) as u8 & 0x0f
    }

    pub fn code(&self) -> Code {
        Code((self.0 >> CODE_SHIFT) as u8)
    }

    pub fn message_id(&self) -> u16 {
        self.0 as u16
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("version", &self.version())
            .field("type", &self.message_type())
            .field("token_len", &self.token_len())
            .field("code", &format_args!("{}", self.code()))
            .field("message_id", &self.message_id())
            .finish()
    }
}
