//! Wire protocol.
//!
//! - [`message`]: the [`Message`] datagram and its constants
//! - [`codec`]: binary frame encode/decode
//! - [`text`]: delimiter-separated text payload helpers

pub mod codec;
mod message;
mod text;

pub use codec::{decode, encode, CodecError};
pub use message::{
    Message, MessageType, ACK_PAYLOAD, BROADCAST_ID, DISCOVER_PAYLOAD, HEADER_LEN, MAX_FRAME_LEN,
    MAX_PAYLOAD,
};
pub use text::{field, field_f32, TextPayload, DEFAULT_SEPARATOR};
