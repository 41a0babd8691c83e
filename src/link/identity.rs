//! Node address and message-id sequence.

use rand_core::{OsRng, RngCore};

/// This node's address and its outgoing message-id counter.
///
/// Ids increase by one per message and wrap at 65536. Zero is skipped on
/// wraparound because a zero `msg_id` on an outgoing message means "assign
/// one for me".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: u16,
    last_msg_id: u16,
}

impl NodeIdentity {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id,
            last_msg_id: 0,
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub fn set_node_id(&mut self, node_id: u16) {
        self.node_id = node_id;
    }

    /// Last id handed out.
    pub fn last_message_id(&self) -> u16 {
        self.last_msg_id
    }

    /// Restart the sequence so the next id is `start + 1`.
    ///
    /// Seeding from a random value keeps ids from colliding with those a
    /// node used before a reboot.
    pub fn seed(&mut self, start: u16) {
        self.last_msg_id = start;
    }

    /// Seed the sequence from the operating system RNG.
    pub fn seed_random(&mut self) {
        self.seed(OsRng.next_u32() as u16);
    }

    /// Allocate the next message id.
    pub fn next_message_id(&mut self) -> u16 {
        self.last_msg_id = match self.last_msg_id.wrapping_add(1) {
            0 => 1,
            id => id,
        };
        self.last_msg_id
    }
}
