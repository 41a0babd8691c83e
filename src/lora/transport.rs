//! Transceiver abstraction.
//!
//! The link layer never talks to hardware directly. It drives a
//! [`RadioTransport`], a byte-oriented packet interface in the style of the
//! common Arduino LoRa drivers: open a packet, write bytes, close it to
//! transmit; poll for a packet, then drain its bytes.
//!
//! Board support crates implement this trait for their driver. The crate
//! ships [`SimTransport`](super::SimTransport) for tests and host simulation.

use super::config::Pins;
use std::fmt;

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transceiver did not respond during start-up.
    InitFailed,
    /// A packet could not be opened (radio busy or asleep).
    Busy,
    /// Packet exceeds the transceiver FIFO.
    PacketTooLarge { size: usize, max: usize },
    /// Transmission did not complete.
    TxFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed => write!(f, "transceiver init failed"),
            Self::Busy => write!(f, "transceiver busy"),
            Self::PacketTooLarge { size, max } => {
                write!(f, "packet too large: {} bytes (max {})", size, max)
            }
            Self::TxFailed => write!(f, "transmission failed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Byte-oriented packet radio.
///
/// Implementations own the physical transceiver. Methods are called from a
/// single task and must not block for longer than one packet's airtime.
pub trait RadioTransport {
    /// Assign control pins. Called before [`begin`](Self::begin) when the
    /// configuration carries pins.
    fn set_pins(&mut self, _pins: Pins) {}

    /// Start the transceiver on `frequency` Hz.
    fn begin(&mut self, frequency: u32) -> Result<(), TransportError>;

    /// Shut the transceiver down.
    fn end(&mut self) {}

    /// Open an outgoing packet.
    fn begin_packet(&mut self) -> Result<(), TransportError>;

    /// Append one byte to the open packet. Returns bytes accepted.
    fn write(&mut self, byte: u8) -> usize;

    /// Append a slice to the open packet. Returns bytes accepted.
    fn write_all(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().map(|b| self.write(*b)).sum()
    }

    /// Close and transmit the open packet.
    fn end_packet(&mut self) -> Result<(), TransportError>;

    /// Check for a received packet; returns its size, 0 when none is ready.
    fn parse_packet(&mut self) -> usize;

    /// Bytes left to read from the current received packet.
    fn available(&mut self) -> usize;

    /// Next byte of the current received packet.
    fn read(&mut self) -> Option<u8>;

    fn set_spreading_factor(&mut self, sf: u8);
    fn set_signal_bandwidth(&mut self, bandwidth_hz: u32);
    fn set_tx_power(&mut self, dbm: u8);
    fn set_sync_word(&mut self, sync_word: u8);
    fn set_preamble_length(&mut self, symbols: u16);
    fn enable_crc(&mut self);
    fn disable_crc(&mut self);

    fn sleep(&mut self) {}
    fn idle(&mut self) {}

    /// RSSI of the last received packet in dBm.
    fn packet_rssi(&self) -> i16 {
        0
    }

    /// SNR of the last received packet in dB.
    fn packet_snr(&self) -> f32 {
        0.0
    }
}
