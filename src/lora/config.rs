//! Radio and link configuration.
//!
//! [`LinkConfig`] holds every parameter the link layer pushes down to the
//! transceiver, plus this node's address. Defaults match a US 915 MHz
//! deployment with SF7 at 125 kHz.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ==================== Radio Defaults ====================

/// Carrier frequency in Hz.
pub const FREQUENCY_HZ: u32 = 915_000_000;

/// Spreading factor (SF7, shortest airtime).
pub const SPREADING_FACTOR: u8 = 7;

/// Bandwidth in Hz.
pub const BANDWIDTH_HZ: u32 = 125_000;

/// TX power in dBm.
pub const TX_POWER: u8 = 17;

/// Sync word for a private network.
pub const SYNC_WORD: u8 = 0x12;

/// Preamble length in symbols.
pub const PREAMBLE_LENGTH: u16 = 8;

// ==================== Link Defaults ====================

/// Dwell time per half-duplex state.
pub const SWITCH_INTERVAL: Duration = Duration::from_millis(1000);

/// Time to wait for a reply after each transmission.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Transmissions attempted by the reliable send primitives.
pub const MAX_RETRIES: u32 = 3;

/// Hop budget of broadcasts.
pub const BROADCAST_TTL: u8 = 3;

/// Hop budget of discovery broadcasts.
pub const DISCOVERY_TTL: u8 = 2;

/// Delay between transport polls inside the blocking wait loops.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Bandwidths supported by SX127x-class transceivers, in Hz.
pub const SUPPORTED_BANDWIDTHS_HZ: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

/// Frequency band region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// EU 863-870 MHz band.
    Eu868,
    /// US 902-928 MHz band.
    Us915,
    /// Asia 433 MHz ISM band.
    As433,
}

impl Region {
    /// Operating frequency for this region in Hz.
    pub fn frequency(self) -> u32 {
        match self {
            Self::Eu868 => 868_100_000,
            Self::Us915 => FREQUENCY_HZ,
            Self::As433 => 433_000_000,
        }
    }

    /// Parse a region name such as `eu868`, case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "eu868" => Some(Self::Eu868),
            "us915" => Some(Self::Us915),
            "as433" => Some(Self::As433),
            _ => None,
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::Us915
    }
}

/// Transceiver control pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pins {
    /// Chip select (NSS).
    pub cs: u8,
    /// Reset line.
    pub reset: u8,
    /// Interrupt line (DIO0).
    pub irq: u8,
}

/// Link-layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// This node's address.
    pub node_id: u16,
    /// Carrier frequency in Hz.
    pub frequency: u32,
    /// Spreading factor (6-12).
    pub spread_factor: u8,
    /// Signal bandwidth in Hz.
    pub bandwidth: u32,
    /// TX power in dBm.
    pub tx_power: u8,
    /// Sync word.
    pub sync_word: u8,
    /// Preamble length in symbols.
    pub preamble_len: u16,
    /// Whether packets carry a CRC.
    pub crc: bool,
    /// Pin assignment, when the transport needs one.
    pub pins: Option<Pins>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            frequency: FREQUENCY_HZ,
            spread_factor: SPREADING_FACTOR,
            bandwidth: BANDWIDTH_HZ,
            tx_power: TX_POWER,
            sync_word: SYNC_WORD,
            preamble_len: PREAMBLE_LENGTH,
            crc: true,
            pins: None,
        }
    }
}

impl LinkConfig {
    /// Default configuration tuned to a region's frequency.
    pub fn for_region(region: Region) -> Self {
        Self {
            frequency: region.frequency(),
            ..Default::default()
        }
    }

    pub fn with_node_id(mut self, node_id: u16) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn with_pins(mut self, cs: u8, reset: u8, irq: u8) -> Self {
        self.pins = Some(Pins { cs, reset, irq });
        self
    }

    /// Validate radio parameters against transceiver limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(137_000_000..=1_020_000_000).contains(&self.frequency) {
            return Err(ConfigError::FrequencyOutOfRange(self.frequency));
        }
        if !(6..=12).contains(&self.spread_factor) {
            return Err(ConfigError::InvalidSpreadingFactor(self.spread_factor));
        }
        if !SUPPORTED_BANDWIDTHS_HZ.contains(&self.bandwidth) {
            return Err(ConfigError::UnsupportedBandwidth(self.bandwidth));
        }
        if !(2..=20).contains(&self.tx_power) {
            return Err(ConfigError::TxPowerOutOfRange(self.tx_power));
        }
        if self.preamble_len < 6 {
            return Err(ConfigError::PreambleTooShort(self.preamble_len));
        }
        Ok(())
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Frequency outside 137-1020 MHz.
    FrequencyOutOfRange(u32),
    /// Spreading factor outside 6-12.
    InvalidSpreadingFactor(u8),
    /// Bandwidth not one of [`SUPPORTED_BANDWIDTHS_HZ`].
    UnsupportedBandwidth(u32),
    /// TX power outside 2-20 dBm.
    TxPowerOutOfRange(u8),
    /// Preamble shorter than 6 symbols.
    PreambleTooShort(u16),
    /// Malformed serialized configuration.
    InvalidFormat(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrequencyOutOfRange(hz) => write!(f, "frequency out of range: {} Hz", hz),
            Self::InvalidSpreadingFactor(sf) => write!(f, "invalid spreading factor: SF{}", sf),
            Self::UnsupportedBandwidth(hz) => write!(f, "unsupported bandwidth: {} Hz", hz),
            Self::TxPowerOutOfRange(dbm) => write!(f, "tx power out of range: {} dBm", dbm),
            Self::PreambleTooShort(len) => write!(f, "preamble too short: {} symbols", len),
            Self::InvalidFormat(msg) => write!(f, "invalid config format: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.frequency, 915_000_000);
        assert_eq!(config.spread_factor, 7);
        assert_eq!(config.bandwidth, 125_000);
        assert_eq!(config.tx_power, 17);
        assert_eq!(config.sync_word, 0x12);
        assert_eq!(config.preamble_len, 8);
        assert!(config.crc);
        assert!(config.pins.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_link_defaults() {
        assert_eq!(SWITCH_INTERVAL, Duration::from_millis(1000));
        assert_eq!(ACK_TIMEOUT, Duration::from_millis(1000));
        assert_eq!(MAX_RETRIES, 3);
        assert_eq!(BROADCAST_TTL, 3);
        assert_eq!(DISCOVERY_TTL, 2);
    }

    #[test]
    fn test_region_frequencies() {
        assert_eq!(Region::Eu868.frequency(), 868_100_000);
        assert_eq!(Region::Us915.frequency(), 915_000_000);
        assert_eq!(Region::As433.frequency(), 433_000_000);
        assert_eq!(LinkConfig::for_region(Region::Eu868).frequency, 868_100_000);
        assert_eq!(Region::default(), Region::Us915);
        assert_eq!(Region::from_name("EU868"), Some(Region::Eu868));
        assert_eq!(Region::from_name("as433"), Some(Region::As433));
        assert_eq!(Region::from_name("mars"), None);
    }

    #[test]
    fn test_builders() {
        let config = LinkConfig::default().with_node_id(42).with_pins(18, 14, 26);
        assert_eq!(config.node_id, 42);
        assert_eq!(
            config.pins,
            Some(Pins {
                cs: 18,
                reset: 14,
                irq: 26
            })
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            (
                LinkConfig {
                    frequency: 2_400_000_000,
                    ..Default::default()
                },
                ConfigError::FrequencyOutOfRange(2_400_000_000),
            ),
            (
                LinkConfig {
                    spread_factor: 13,
                    ..Default::default()
                },
                ConfigError::InvalidSpreadingFactor(13),
            ),
            (
                LinkConfig {
                    bandwidth: 100_000,
                    ..Default::default()
                },
                ConfigError::UnsupportedBandwidth(100_000),
            ),
            (
                LinkConfig {
                    tx_power: 30,
                    ..Default::default()
                },
                ConfigError::TxPowerOutOfRange(30),
            ),
            (
                LinkConfig {
                    preamble_len: 4,
                    ..Default::default()
                },
                ConfigError::PreambleTooShort(4),
            ),
        ];
        for (config, expected) in bad {
            assert_eq!(config.validate(), Err(expected));
        }
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = LinkConfig::from_json(r#"{"node_id": 7, "spread_factor": 9}"#).unwrap();
        assert_eq!(config.node_id, 7);
        assert_eq!(config.spread_factor, 9);
        assert_eq!(config.bandwidth, BANDWIDTH_HZ);
    }

    #[test]
    fn test_from_json_rejects_garbage_and_invalid() {
        assert!(matches!(
            LinkConfig::from_json("not json"),
            Err(ConfigError::InvalidFormat(_))
        ));
        assert_eq!(
            LinkConfig::from_json(r#"{"tx_power": 1}"#),
            Err(ConfigError::TxPowerOutOfRange(1))
        );
    }
}
