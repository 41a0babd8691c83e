//! Binary frame codec.
//!
//! # Frame layout
//!
//! | Offset | Size | Field         |
//! |--------|------|---------------|
//! | 0      | 1    | `msg_type`    |
//! | 1      | 2    | `source_id`   |
//! | 3      | 2    | `dest_id`     |
//! | 5      | 2    | `msg_id`      |
//! | 7      | 1    | `ttl`         |
//! | 8      | 2    | `payload_len` |
//! | 10     | N    | payload       |
//!
//! Multi-byte fields are big-endian. Decoding is lenient about the payload
//! length: a declared length larger than the buffer (or than
//! [`MAX_PAYLOAD`]) is clamped and the excess is simply not copied.
//! Encoding is strict and refuses oversize payloads.

use super::message::{Message, HEADER_LEN, MAX_PAYLOAD};
use std::fmt;

/// Codec failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than a frame header.
    Truncated {
        /// Bytes available.
        len: usize,
    },
    /// Output buffer cannot hold the encoded frame.
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
    /// Declared payload length exceeds the payload capacity.
    PayloadOverflow {
        /// Declared length.
        len: usize,
        /// Capacity.
        max: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => {
                write!(f, "truncated frame: {} bytes (header is {})", len, HEADER_LEN)
            }
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {} bytes, have {}", needed, available)
            }
            Self::PayloadOverflow { len, max } => {
                write!(f, "payload too large: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode `msg` into `out`, returning the number of bytes written.
pub fn encode(msg: &Message, out: &mut [u8]) -> Result<usize, CodecError> {
    let payload_len = msg.payload_len as usize;
    if payload_len > MAX_PAYLOAD {
        return Err(CodecError::PayloadOverflow {
            len: payload_len,
            max: MAX_PAYLOAD,
        });
    }

    let needed = HEADER_LEN + payload_len;
    if out.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    out[0] = msg.msg_type;
    out[1..3].copy_from_slice(&msg.source_id.to_be_bytes());
    out[3..5].copy_from_slice(&msg.dest_id.to_be_bytes());
    out[5..7].copy_from_slice(&msg.msg_id.to_be_bytes());
    out[7] = msg.ttl;
    out[8..10].copy_from_slice(&msg.payload_len.to_be_bytes());
    out[HEADER_LEN..needed].copy_from_slice(&msg.payload[..payload_len]);

    Ok(needed)
}

/// Decode a frame.
///
/// Fails only when the header itself is incomplete.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated { len: bytes.len() });
    }

    let declared = u16::from_be_bytes([bytes[8], bytes[9]]) as usize;
    let body = &bytes[HEADER_LEN..];
    let payload_len = declared.min(MAX_PAYLOAD).min(body.len());

    let mut msg = Message {
        msg_type: bytes[0],
        source_id: u16::from_be_bytes([bytes[1], bytes[2]]),
        dest_id: u16::from_be_bytes([bytes[3], bytes[4]]),
        msg_id: u16::from_be_bytes([bytes[5], bytes[6]]),
        ttl: bytes[7],
        payload_len: payload_len as u16,
        payload: [0u8; MAX_PAYLOAD],
    };
    msg.payload[..payload_len].copy_from_slice(&body[..payload_len]);

    Ok(msg)
}
