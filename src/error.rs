//! Link-layer error type.
//!
//! The public link API reports failures as `false`/`None`, because every
//! condition here is expected in a polling loop. The `try_*` variants return
//! [`LinkError`] so callers that care can tell the cases apart.

use crate::link::Mode;
use crate::lora::{ConfigError, TransportError};
use crate::protocol::CodecError;
use std::fmt;

/// Why a link operation did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Transport not initialized.
    NotReady,
    /// Half-duplex gate is closed for this direction.
    DuplexBlocked,
    /// Operation requires another operating mode.
    WrongMode {
        /// Mode the operation needs.
        required: Mode,
        /// Mode the link is in.
        current: Mode,
    },
    /// Nothing staged to send.
    EmptyPayload,
    /// Frame could not be encoded or decoded.
    Codec(CodecError),
    /// Transceiver failure.
    Transport(TransportError),
    /// Rejected configuration.
    Config(ConfigError),
    /// No acknowledgment after every attempt.
    AckTimeout {
        /// Transmissions made.
        attempts: u32,
    },
    /// No reply at all after every attempt.
    NoResponse {
        /// Transmissions made.
        attempts: u32,
    },
    /// Message may not be relayed (TTL exhausted or addressed to us).
    NotRelayable,
    /// Wait aborted through its cancellation token.
    Cancelled,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "link not ready"),
            Self::DuplexBlocked => write!(f, "half-duplex gate closed"),
            Self::WrongMode { required, current } => {
                write!(f, "operation requires {} mode, link is in {} mode", required, current)
            }
            Self::EmptyPayload => write!(f, "nothing to send"),
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Config(e) => write!(f, "config error: {}", e),
            Self::AckTimeout { attempts } => {
                write!(f, "no acknowledgment after {} attempts", attempts)
            }
            Self::NoResponse { attempts } => write!(f, "no response after {} attempts", attempts),
            Self::NotRelayable => write!(f, "message not relayable"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for LinkError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ConfigError> for LinkError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
