//! Mesh routing.
//!
//! Flooding with a hop budget: each frame carries a TTL, relays decrement it,
//! and a frame with one hop left (or addressed to the relay itself) stops.
//! There are no routes. Nodes are learned from the source address of every
//! frame heard and kept in a small fixed table.

mod known_nodes;
mod recent;
mod router;

pub use known_nodes::{InsertOutcome, KnownNodeTable, MAX_KNOWN_NODES};
pub use recent::{RecentFrames, RECENT_FRAMES};
pub use router::{MeshRouter, RouteDecision};
