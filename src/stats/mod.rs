//! Link activity counters.
//!
//! [`LinkStats`] is shared between a link and whoever reports on it (the
//! HTTP endpoint in [`server`], a log line, a test). Every field is atomic so
//! readers never lock the link.

#[cfg(feature = "stats-server")]
pub mod server;

use serde::Serialize;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::time::Instant;

/// Counters for one link.
#[derive(Debug)]
pub struct LinkStats {
    start_time: Instant,
    node_id: AtomicU16,
    /// Frames handed to the transport.
    pub frames_sent: AtomicUsize,
    /// Packets read from the transport.
    pub frames_received: AtomicUsize,
    /// Received packets too short to decode.
    pub decode_errors: AtomicUsize,
    /// Sends refused by the half-duplex gate.
    pub duplex_blocked: AtomicUsize,
    /// Retransmissions made by the reliable send primitives.
    pub retransmissions: AtomicUsize,
    /// Acknowledgments accepted.
    pub acks_received: AtomicUsize,
    /// Reliable sends that ran out of attempts.
    pub ack_timeouts: AtomicUsize,
    /// Frames relayed for other nodes.
    pub relayed: AtomicUsize,
    /// Frames not relayed because they were relayed already.
    pub duplicates_dropped: AtomicUsize,
    /// Entries in the known-node table.
    pub known_nodes: AtomicUsize,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub node_id: u16,
    pub frames_sent: usize,
    pub frames_received: usize,
    pub decode_errors: usize,
    pub duplex_blocked: usize,
    pub retransmissions: usize,
    pub acks_received: usize,
    pub ack_timeouts: usize,
    pub relayed: usize,
    pub duplicates_dropped: usize,
    pub known_nodes: usize,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            node_id: AtomicU16::new(0),
            frames_sent: AtomicUsize::new(0),
            frames_received: AtomicUsize::new(0),
            decode_errors: AtomicUsize::new(0),
            duplex_blocked: AtomicUsize::new(0),
            retransmissions: AtomicUsize::new(0),
            acks_received: AtomicUsize::new(0),
            ack_timeouts: AtomicUsize::new(0),
            relayed: AtomicUsize::new(0),
            duplicates_dropped: AtomicUsize::new(0),
            known_nodes: AtomicUsize::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn node_id(&self) -> u16 {
        self.node_id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_node_id(&self, node_id: u16) {
        self.node_id.store(node_id, Ordering::Relaxed);
    }

    pub(crate) fn set_known_nodes(&self, count: usize) {
        self.known_nodes.store(count, Ordering::Relaxed);
    }

    /// Bump a counter by one.
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            node_id: self.node_id(),
            frames_sent: load(&self.frames_sent),
            frames_received: load(&self.frames_received),
            decode_errors: load(&self.decode_errors),
            duplex_blocked: load(&self.duplex_blocked),
            retransmissions: load(&self.retransmissions),
            acks_received: load(&self.acks_received),
            ack_timeouts: load(&self.ack_timeouts),
            relayed: load(&self.relayed),
            duplicates_dropped: load(&self.duplicates_dropped),
            known_nodes: load(&self.known_nodes),
        }
    }

    /// Serialize a snapshot to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}
