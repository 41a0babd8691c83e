//! LoRa radio support.
//!
//! This module contains:
//! - [`config`]: link configuration, radio defaults and region presets
//! - [`transport`]: the [`RadioTransport`] trait the link layer drives
//! - [`sim`]: an in-memory shared medium implementing the trait

mod config;
mod sim;
mod transport;

pub use config::{
    ConfigError, LinkConfig, Pins, Region, ACK_TIMEOUT, BANDWIDTH_HZ, BROADCAST_TTL,
    DISCOVERY_TTL, FREQUENCY_HZ, MAX_RETRIES, POLL_INTERVAL, PREAMBLE_LENGTH, SPREADING_FACTOR,
    SUPPORTED_BANDWIDTHS_HZ, SWITCH_INTERVAL, SYNC_WORD, TX_POWER,
};
pub use sim::{RadioSettings, Responder, ScriptedReply, SimMedium, SimTransport};
pub use transport::{RadioTransport, TransportError};
