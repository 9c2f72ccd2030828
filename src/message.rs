use std::net::SocketAddr;
use bytes::{BufMut, Bytes};
use crate::buffer::{Buffer, Cursor};
use crate::error::CodecError;
use crate::header::{Code, Header, MessageType, PROTOCOL_VERSION_1};
use crate::options_list::{OptionsList, PAYLOAD_MARKER};
use crate::token::{Token, MAX_TOKEN_LEN};

/// A complete protocol message, one per datagram:
///
/// ```ascii
/// 0: header (4 bytes, big endian)
/// 4: token (0-8 bytes, length from the header)
/// *: options
/// *: 0xFF payload marker followed by the payload - both omitted if there is no payload
/// ```
///
/// A payload is either absent or non-empty: an empty payload is normalized to 'absent' at
///  construction so it is never written as a dangling marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    header: Header,
    token: Token,
    options: OptionsList,
    payload: Option<Bytes>,
    /// the sender's address for received messages
    from: Option<SocketAddr>,
}

impl Message {
    pub fn new(message_type: MessageType, code: Code, message_id: u16, token: Token, options: OptionsList, payload: Option<Bytes>) -> Message {
        Message {
            header: Header::new(PROTOCOL_VERSION_1, message_type, token.len() as u8, code, message_id),
            token,
            options,
            payload: payload.filter(|p| !p.is_empty()),
            from: None,
        }
    }

    pub fn confirmable(code: Code, message_id: u16, token: Token, options: OptionsList, payload: Option<Bytes>) -> Message {
        Message::new(MessageType::Confirmable, code, message_id, token, options, payload)
    }

    pub fn non_confirmable(code: Code, message_id: u16, token: Token, options: OptionsList, payload: Option<Bytes>) -> Message {
        Message::new(MessageType::NonConfirmable, code, message_id, token, options, payload)
    }

    /// A bare Ack without a response code, e.g. to acknowledge a request before producing a
    ///  separate response
    pub fn ack(token: Token, message_id: u16) -> Message {
        Message::new(MessageType::Acknowledgement, Code::EMPTY, message_id, token, OptionsList::empty(), None)
    }

    pub fn reset(message_id: u16) -> Message {
        Message::new(MessageType::Reset, Code::EMPTY, message_id, Token::empty(), OptionsList::empty(), None)
    }

    /// An Ack that carries the response to `request` directly, echoing its message id and token
    pub fn piggybacked_response(request: &Message, code: Code, options: OptionsList, payload: Option<Bytes>) -> Message {
        Message::new(MessageType::Acknowledgement, code, request.message_id(), request.token().clone(), options, payload)
    }

    pub fn with_from(mut self, from: SocketAddr) -> Message {
        self.from = Some(from);
        self
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn version(&self) -> u8 {
        self.header.version()
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type()
    }

    pub fn code(&self) -> Code {
        self.header.code()
    }

    pub fn message_id(&self) -> u16 {
        self.header.message_id()
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn options(&self) -> &OptionsList {
        &self.options
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn from(&self) -> Option<SocketAddr> {
        self.from
    }

    pub fn is_confirmable(&self) -> bool {
        self.message_type() == MessageType::Confirmable
    }

    pub fn is_non_confirmable(&self) -> bool {
        self.message_type() == MessageType::NonConfirmable
    }

    pub fn is_ack(&self) -> bool {
        self.message_type() == MessageType::Acknowledgement
    }

    pub fn is_reset(&self) -> bool {
        self.message_type() == MessageType::Reset
    }

    /// Number of bytes the serialized message occupies
    pub fn serialized_len(&self) -> Result<usize, CodecError> {
        Ok(Header::SERIALIZED_LEN
            + self.token.len()
            + self.options.buffer_size()?
            + self.payload.as_ref().map(|p| 1 + p.len()).unwrap_or(0))
    }

    /// Append the serialized message to `buf`, returning the number of bytes written. The buffer
    ///  never grows: if the message does not fit, nothing is written.
    pub fn ser(&self, buf: &mut Buffer) -> Result<usize, CodecError> {
        let required = self.serialized_len()?;
        if buf.remaining_mut() < required {
            return Err(CodecError::BufferTooSmall {
                required,
                available: buf.remaining_mut(),
            });
        }

        buf.put_u32(self.header.to_raw());
        buf.put_slice(self.token.as_ref());
        self.options.ser(buf)?;
        if let Some(payload) = &self.payload {
            buf.put_u8(PAYLOAD_MARKER);
            buf.put_slice(payload);
        }
        Ok(required)
    }

    pub fn deser(data: &[u8]) -> Result<Message, CodecError> {
        let mut cursor = Cursor::new(data);

        let header = Header::from_raw(cursor.next_u32()?);
        let token_len = header.token_len() as usize;
        if token_len > MAX_TOKEN_LEN {
            return Err(CodecError::InvalidTokenLength(token_len));
        }
        let token = Token::new(Bytes::copy_from_slice(cursor.next_slice(token_len)?))?;

        let options = OptionsList::deser(&mut cursor)?;

        let payload = if cursor.is_empty() {
            None
        }
        else {
            let marker = cursor.next_u8()?;
            if marker != PAYLOAD_MARKER {
                return Err(CodecError::InvalidPayloadMarker(marker));
            }
            if cursor.is_empty() {
                return Err(CodecError::EmptyPayload);
            }
            Some(Bytes::copy_from_slice(cursor.rest()))
        };

        Ok(Message {
            header,
            token,
            options,
            payload,
            from: None,
        })
    }
}
