//! Link-layer datagram.
//!
//! A [`Message`] is what travels in a single LoRa packet: a fixed 10-byte
//! header followed by up to [`MAX_PAYLOAD`] payload bytes. The payload lives
//! in a fixed-size array so that building and decoding a message never
//! allocates.

use std::fmt;

/// Maximum payload carried by one frame.
pub const MAX_PAYLOAD: usize = 240;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 10;

/// Largest possible encoded frame.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

/// Destination address reaching every node.
pub const BROADCAST_ID: u16 = 0xFFFF;

/// Payload carried by discovery broadcasts.
pub const DISCOVER_PAYLOAD: &[u8] = b"DISCOVER";

/// Payload carried by acknowledgment frames.
pub const ACK_PAYLOAD: &[u8] = b"ACK";

/// Message type tag.
///
/// The wire field is a plain byte, so unknown tags are kept as
/// [`MessageType::Other`] instead of being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Data,
    Ack,
    Command,
    Broadcast,
    Ping,
    Pong,
    /// Tag not known to this implementation.
    Other(u8),
}

impl From<u8> for MessageType {
    fn from(tag: u8) -> Self {
        match tag {
            0 => Self::Data,
            1 => Self::Ack,
            2 => Self::Command,
            3 => Self::Broadcast,
            4 => Self::Ping,
            5 => Self::Pong,
            other => Self::Other(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Data => 0,
            MessageType::Ack => 1,
            MessageType::Command => 2,
            MessageType::Broadcast => 3,
            MessageType::Ping => 4,
            MessageType::Pong => 5,
            MessageType::Other(tag) => tag,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "DATA"),
            Self::Ack => write!(f, "ACK"),
            Self::Command => write!(f, "COMMAND"),
            Self::Broadcast => write!(f, "BROADCAST"),
            Self::Ping => write!(f, "PING"),
            Self::Pong => write!(f, "PONG"),
            Self::Other(tag) => write!(f, "TYPE({})", tag),
        }
    }
}

/// A single link-layer datagram.
///
/// Fields mirror the wire header one to one. `payload_len` is public so a
/// caller can build a frame by hand; the codec refuses to encode a message
/// whose `payload_len` exceeds [`MAX_PAYLOAD`].
#[derive(Clone)]
pub struct Message {
    /// Raw message type tag, see [`MessageType`].
    pub msg_type: u8,
    /// Sender address.
    pub source_id: u16,
    /// Receiver address, [`BROADCAST_ID`] for everyone.
    pub dest_id: u16,
    /// Per-source sequence number. Zero means "assign on send".
    pub msg_id: u16,
    /// Remaining hop budget.
    pub ttl: u8,
    /// Number of valid bytes in `payload`.
    pub payload_len: u16,
    /// Payload storage.
    pub payload: [u8; MAX_PAYLOAD],
}

impl Message {
    /// Create a message, truncating `payload` to [`MAX_PAYLOAD`] bytes.
    pub fn new(kind: MessageType, source_id: u16, dest_id: u16, ttl: u8, payload: &[u8]) -> Self {
        let mut msg = Self {
            msg_type: kind.into(),
            source_id,
            dest_id,
            msg_id: 0,
            ttl,
            payload_len: 0,
            payload: [0u8; MAX_PAYLOAD],
        };
        msg.set_payload(payload);
        msg
    }

    /// Build the acknowledgment frame answering `received`.
    ///
    /// The reply carries the same `msg_id`, is addressed back to the sender
    /// and has a payload of `"ACK"`, so it satisfies both acknowledgment
    /// policies of the delivery manager.
    pub fn ack_for(received: &Message, own_id: u16) -> Self {
        let mut ack = Self::new(MessageType::Ack, own_id, received.source_id, 1, ACK_PAYLOAD);
        ack.msg_id = received.msg_id;
        ack
    }

    /// Decoded message type.
    pub fn kind(&self) -> MessageType {
        MessageType::from(self.msg_type)
    }

    /// Valid payload bytes.
    ///
    /// Clamped to the buffer so a hand-edited `payload_len` cannot cause an
    /// out-of-bounds slice.
    pub fn payload(&self) -> &[u8] {
        let len = (self.payload_len as usize).min(MAX_PAYLOAD);
        &self.payload[..len]
    }

    /// Payload interpreted as UTF-8, lossily.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.payload())
    }

    /// Replace the payload, truncating to [`MAX_PAYLOAD`] bytes.
    ///
    /// Returns the number of bytes kept.
    pub fn set_payload(&mut self, data: &[u8]) -> usize {
        let len = data.len().min(MAX_PAYLOAD);
        self.payload = [0u8; MAX_PAYLOAD];
        self.payload[..len].copy_from_slice(&data[..len]);
        self.payload_len = len as u16;
        len
    }

    /// Whether the message is addressed to every node.
    pub fn is_broadcast(&self) -> bool {
        self.dest_id == BROADCAST_ID
    }

    /// Encoded size of this message.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new(MessageType::Data, 0, 0, 1, &[])
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.msg_type == other.msg_type
            && self.source_id == other.source_id
            && self.dest_id == other.dest_id
            && self.msg_id == other.msg_id
            && self.ttl == other.ttl
            && self.payload_len == other.payload_len
            && self.payload() == other.payload()
    }
}

impl Eq for Message {}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("msg_type", &self.kind())
            .field("source_id", &self.source_id)
            .field("dest_id", &self.dest_id)
            .field("msg_id", &self.msg_id)
            .field("ttl", &self.ttl)
            .field("payload_len", &self.payload_len)
            .field("payload", &self.payload_str())
            .finish()
    }
}
