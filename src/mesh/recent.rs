//! Ring of frames already relayed.

/// Number of `(source, msg_id)` pairs remembered.
pub const RECENT_FRAMES: usize = 32;

/// Fixed-size ring of `(source_id, msg_id)` pairs.
///
/// On a shared channel every neighbour hears a rebroadcast, so the same frame
/// comes back to a relay several times. The oldest entry is overwritten once
/// the ring is full.
#[derive(Debug, Clone)]
pub struct RecentFrames {
    entries: [(u16, u16); RECENT_FRAMES],
    len: usize,
    next: usize,
}

impl RecentFrames {
    pub fn new() -> Self {
        Self {
            entries: [(0, 0); RECENT_FRAMES],
            len: 0,
            next: 0,
        }
    }

    pub fn contains(&self, source_id: u16, msg_id: u16) -> bool {
        self.entries[..self.len].contains(&(source_id, msg_id))
    }

    /// Remember a frame. Returns false if it was already present.
    pub fn remember(&mut self, source_id: u16, msg_id: u16) -> bool {
        if self.contains(source_id, msg_id) {
            return false;
        }
        self.entries[self.next] = (source_id, msg_id);
        self.next = (self.next + 1) % RECENT_FRAMES;
        self.len = (self.len + 1).min(RECENT_FRAMES);
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.next = 0;
    }
}

impl Default for RecentFrames {
    fn default() -> Self {
        Self::new()
    }
}
