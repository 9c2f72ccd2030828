use std::io;
use thiserror::Error;

/// Failures of the wire codec: either a read / write would leave the bounds of a buffer, or the
///  bytes are not a well-formed message.
///
/// Decoding never produces a partial structure - a datagram that fails to decode is treated as
///  noise by the endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("bounds exceeded: {needed} bytes needed at offset {offset}, {available} available")]
    Bounds {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("destination buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall {
        required: usize,
        available: usize,
    },
    #[error("option does not fit the destination buffer at position {position}")]
    BufferOverflow {
        position: usize,
    },
    #[error("value {0} is too big for the extended integer encoding")]
    ExtendedIntOverflow(u32),
    #[error("option number exceeds 65535 at offset {0}")]
    OptionNumberOverflow(usize),
    #[error("reserved nibble 15 in option header at offset {0}")]
    ReservedNibble(usize),
    #[error("invalid payload marker 0x{0:02x}")]
    InvalidPayloadMarker(u8),
    #[error("payload marker is not followed by a payload")]
    EmptyPayload,
    #[error("token length {0} exceeds the maximum of 8")]
    InvalidTokenLength(usize),
}

/// Errors surfaced by the datagram transport, passed on verbatim to callers and to result
///  callbacks.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("socket is closed")]
    Closed,
    #[error("timed out")]
    Timeout,
    #[error("destination unreachable")]
    Unreachable,
    #[error("I/O error: {0}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable => TransportError::Unreachable,
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => TransportError::Closed,
            kind => TransportError::Io(kind),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("scheme must be 'coap' or 'coaps'")]
    InvalidScheme,
    #[error("URI has no host")]
    MissingHost,
    #[error("unterminated IPv6 literal")]
    UnterminatedIpv6,
    #[error("unexpected text after an IPv6 literal")]
    TrailingIpv6Garbage,
    #[error("URI fragments are not allowed")]
    Fragment,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Uri(#[from] UriError),
    #[error("a result callback requires a confirmable message")]
    CallbackRequiresConfirmable,
    #[error("message id {0} is still awaiting acknowledgement")]
    MessageIdInFlight(u16),
}

/// The terminal outcome of a confirmable message, handed to its result callback exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitResult {
    /// a matching Ack arrived
    Acknowledged,
    /// the peer answered with a matching Reset
    Rejected,
    /// (re)transmission failed in the transport
    Failed(TransportError),
    /// no Ack arrived before the retransmission budget was spent
    RetriesExhausted,
}

impl TransmitResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransmitResult::Acknowledged)
    }
}
