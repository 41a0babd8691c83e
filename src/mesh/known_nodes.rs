//! Bounded table of nodes heard on the channel.

/// Maximum number of nodes remembered.
pub const MAX_KNOWN_NODES: usize = 32;

/// Result of [`KnownNodeTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum InsertOutcome {
    /// Id appended.
    Added,
    /// Id already present.
    AlreadyKnown,
    /// Table full; id dropped.
    TableFull,
    /// Own id or the broadcast address; never stored.
    Ignored,
}

/// Insertion-ordered, duplicate-free set of node ids with fixed capacity.
///
/// There is no eviction: once full, new ids are dropped until the table is
/// cleared.
#[derive(Debug, Clone)]
pub struct KnownNodeTable {
    ids: [u16; MAX_KNOWN_NODES],
    len: usize,
}

impl KnownNodeTable {
    pub fn new() -> Self {
        Self {
            ids: [0; MAX_KNOWN_NODES],
            len: 0,
        }
    }

    pub fn insert(&mut self, id: u16) -> InsertOutcome {
        if self.contains(id) {
            return InsertOutcome::AlreadyKnown;
        }
        if self.len == MAX_KNOWN_NODES {
            return InsertOutcome::TableFull;
        }
        self.ids[self.len] = id;
        self.len += 1;
        InsertOutcome::Added
    }

    pub fn contains(&self, id: u16) -> bool {
        self.as_slice().contains(&id)
    }

    /// Id at `index` in insertion order.
    pub fn get(&self, index: usize) -> Option<u16> {
        self.as_slice().get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == MAX_KNOWN_NODES
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ids[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.as_slice().iter().copied()
    }
}

impl Default for KnownNodeTable {
    fn default() -> Self {
        Self::new()
    }
}
