//! A lightweight implementation of the Constrained Application Protocol's messaging layer over
//!  UDP: the binary message format with its compact option encoding, and the reliability layer
//!  that retransmits confirmable messages with exponential backoff until they are acknowledged.
//!
//! ## Scope
//!
//! * messages are encoded and decoded bit-exact, with options kept sorted by option number
//! * confirmable messages are retransmitted verbatim with a randomized initial timeout that
//!   doubles with every retransmission, until an Ack or Reset arrives or the retransmission
//!   budget is spent. The application learns the outcome through a callback, exactly once.
//! * requests are built from `coap://` URIs, leaving out Uri-Host / Uri-Port when they are
//!   redundant with the destination address
//! * malformed datagrams are dropped as noise rather than reported as errors
//! * explicitly *not* supported: DTLS, block-wise transfer, observe, proxying and caching,
//!   multicast, congestion control beyond the fixed backoff
//!
//! ## Wire format
//!
//! Every message is a single UDP datagram:
//!
//! ```ascii
//! 0: header (u32 BE): version (2 bits, always 1) | type (2 bits) | token length (4 bits)
//!     | code (8 bits: class 3 bits, detail 5 bits) | message id (u16)
//! 4: token (0-8 bytes)
//! *: options, sorted ascending by option number. Each option is
//!     (delta nibble | length nibble) (u8)
//!     delta extension (0-2 bytes)
//!     length extension (0-2 bytes)
//!     value
//!    The delta is the difference to the previous option's number. A nibble below 13 is the
//!     value itself, 13 means a 1-byte extension holding (value - 13), 14 a 2-byte BE extension
//!     holding (value - 269). 15 is reserved.
//! *: payload marker 0xFF followed by the payload (both omitted if there is no payload)
//! ```
//!
//! Message types are Confirmable (0), Non-confirmable (1), Acknowledgement (2) and Reset (3).
//!  The default port is 5683.
//!
//! ## Reliability
//!
//! ```ascii
//! send CON --> awaiting Ack --(Ack)--> acknowledged
//!                  |   ^    --(Reset)--> rejected
//!        (timeout) |   | (retransmit, timeout doubles)
//!                  v   |
//!             retransmitting --(more than MAX_RETRANSMIT retransmissions)--> retries exhausted
//!                          --(transport error)--> failed
//! ```

pub mod buffer;
pub mod varint;
pub mod option;
pub mod options_list;
pub mod header;
pub mod message;
pub mod token;
pub mod uri;
pub mod retransmission_queue;
pub mod endpoint;
pub mod transport;
pub mod message_handler;
pub mod config;
pub mod random;
pub mod error;
