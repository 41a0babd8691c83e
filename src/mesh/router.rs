//! Relay decisions and mesh message construction.

use super::known_nodes::{InsertOutcome, KnownNodeTable};
use super::recent::RecentFrames;
use crate::link::NodeIdentity;
use crate::protocol::{Message, MessageType, BROADCAST_ID, DISCOVER_PAYLOAD};
use log::{debug, trace};

/// What [`MeshRouter::route`] decided for an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    /// Hand the frame to the application.
    pub deliver: bool,
    /// Rebroadcast the frame with one hop less.
    pub relay: bool,
    /// Frame would have been relayed but was relayed already.
    pub duplicate: bool,
}

/// TTL-bounded flooding router.
///
/// Nodes are learned passively from the source address of every frame
/// received. Relaying is plain flooding: any frame not addressed to this node
/// with hops left is rebroadcast once.
#[derive(Debug, Clone, Default)]
pub struct MeshRouter {
    known: KnownNodeTable,
    recent: RecentFrames,
}

impl MeshRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_nodes(&self) -> &KnownNodeTable {
        &self.known
    }

    /// Forget learned nodes and relay history.
    pub fn reset(&mut self) {
        self.known.clear();
        self.recent.clear();
    }

    /// Learn the sender of a received frame.
    pub fn observe(&mut self, msg: &Message, own_id: u16) -> InsertOutcome {
        let source = msg.source_id;
        if source == own_id || source == BROADCAST_ID {
            return InsertOutcome::Ignored;
        }
        let outcome = self.known.insert(source);
        match outcome {
            InsertOutcome::Added => debug!("learned node {:#06x}", source),
            InsertOutcome::TableFull => trace!("known-node table full, dropping {:#06x}", source),
            _ => {}
        }
        outcome
    }

    /// A frame is relayed only with hops left and when not addressed to us.
    pub fn should_relay(msg: &Message, own_id: u16) -> bool {
        msg.ttl > 1 && msg.dest_id != own_id
    }

    /// Consume one hop. Returns false, leaving `msg` untouched, when the
    /// frame may not be relayed.
    pub fn prepare_relay(msg: &mut Message, own_id: u16) -> bool {
        if !Self::should_relay(msg, own_id) {
            return false;
        }
        msg.ttl -= 1;
        true
    }

    /// Decide what to do with an inbound frame, recording it as relayed when
    /// the answer is to relay. Echoes of this node's own frames are neither
    /// delivered nor relayed.
    pub fn route(&mut self, msg: &Message, own_id: u16) -> RouteDecision {
        let mut decision = RouteDecision {
            deliver: false,
            relay: false,
            duplicate: false,
        };
        if msg.source_id == own_id {
            return decision;
        }
        decision.deliver = msg.dest_id == own_id || msg.is_broadcast();
        if !Self::should_relay(msg, own_id) {
            return decision;
        }
        if self.recent.remember(msg.source_id, msg.msg_id) {
            decision.relay = true;
        } else {
            decision.duplicate = true;
        }
        decision
    }

    /// Broadcast frame from this node. `msg_id` is left for the sender to
    /// assign.
    pub fn broadcast_message(identity: &NodeIdentity, payload: &[u8], ttl: u8) -> Message {
        Message::new(
            MessageType::Broadcast,
            identity.node_id(),
            BROADCAST_ID,
            ttl,
            payload,
        )
    }

    /// `DISCOVER` broadcast.
    pub fn discovery_message(identity: &NodeIdentity, ttl: u8) -> Message {
        Self::broadcast_message(identity, DISCOVER_PAYLOAD, ttl)
    }

    /// Addressed frame from this node.
    pub fn directed_message(
        identity: &NodeIdentity,
        dest_id: u16,
        payload: &[u8],
        kind: MessageType,
        ttl: u8,
    ) -> Message {
        Message::new(kind, identity.node_id(), dest_id, ttl, payload)
    }

    /// TTL covering `hops` hops, saturating at the field's maximum.
    pub fn ttl_for_hops(hops: usize) -> u8 {
        u8::try_from(hops).unwrap_or(u8::MAX)
    }

    /// Whether a frame is a discovery request.
    pub fn is_discovery(msg: &Message) -> bool {
        msg.kind() == MessageType::Broadcast && msg.payload() == DISCOVER_PAYLOAD
    }
}
