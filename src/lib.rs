//! LoRa point-to-point and mesh link layer.
//!
//! Short datagrams over one shared half-duplex LoRa channel, with optional
//! acknowledgment and retry, node addressing and TTL-bounded flooding relay.
//!
//! - [`protocol`]: wire frame, codec and text payload helpers
//! - [`lora`]: radio configuration, the transport trait and a simulated medium
//! - [`link`]: the [`LoRaLink`] endpoint, duplex scheduling and delivery
//! - [`mesh`]: known-node table and relay decisions
//! - [`stats`]: link counters and the optional HTTP endpoint
//!
//! The library is platform independent. Hardware drivers implement
//! [`RadioTransport`]; everything here runs and is tested on the host.

pub mod error;
pub mod link;
pub mod lora;
pub mod mesh;
pub mod protocol;
pub mod stats;

// Re-export commonly used items
pub use error::LinkError;
pub use link::{AckMatch, LoRaLink, Mode, SharedLink};
pub use lora::{LinkConfig, RadioTransport, Region, SimMedium, SimTransport};
pub use protocol::{Message, MessageType};
pub use stats::LinkStats;
