//! Wire protocol for gridvoice client/server communication
//!
//! Every message is a length-prefixed record, identical over TCP and over
//! the WebRTC data channel:
//!
//! ```text
//! [length: u32 big-endian] [type: u8] [payload: length-1 bytes]
//! ```
//!
//! All integers are big-endian; strings are UTF-8 with an explicit length
//! prefix. The codec is pure functions over byte buffers; the `frame`
//! module adds async reads/writes over a stream.

mod error;
mod frame;
mod message;

pub use error::ProtocolError;
pub use frame::{decode_frame, encode_frame, read_message, write_message};
pub use message::{AuthCode, Message, MessageType, PlayerSnapshot};
