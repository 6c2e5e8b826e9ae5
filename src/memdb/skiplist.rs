//! Arena-backed skiplist
//!
//! Nodes live in a `Vec` and are addressed by index; a node's forward links
//! are a contiguous run of `links`. Keys and values are appended to a byte
//! arena and never freed, so node indices and spans stay valid for the life
//! of the list.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::Rng;

use crate::comparer::Comparer;

/// Maximum number of levels a node can take part in.
pub const MAX_HEIGHT: usize = 12;

/// One in `BRANCHING` nodes is promoted to each further level.
const BRANCHING: u32 = 4;

/// Index of a node in the arena.
pub(super) type NodeId = usize;

/// The head sentinel. Nothing ever links back to it, so its id doubles as the
/// end-of-list marker.
pub(super) const HEAD: NodeId = 0;
pub(super) const NIL: NodeId = 0;

/// A byte range in the arena.
#[derive(Debug, Clone, Copy)]
struct Span {
    offset: usize,
    len: usize,
}

/// Value slot of a node. Deleting a key keeps the node and marks the slot.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Live(Span),
    Tombstone,
}

#[derive(Debug)]
struct Node {
    key: Span,
    value: Slot,
    /// First index of this node's links in `Skiplist::links`.
    tower: usize,
    height: usize,
}

pub(super) struct Skiplist {
    /// Number of levels currently in use, at least 1.
    height: usize,
    arena: Vec<u8>,
    nodes: Vec<Node>,
    /// `links[node.tower + h]` is the next node at level `h`.
    links: Vec<NodeId>,
    rng: StdRng,
}

impl Skiplist {
    pub(super) fn new(rng: StdRng) -> Self {
        let head = Node {
            key: Span { offset: 0, len: 0 },
            value: Slot::Tombstone,
            tower: 0,
            height: MAX_HEIGHT,
        };
        let mut nodes = Vec::with_capacity(256);
        nodes.push(head);
        Self {
            height: 1,
            arena: Vec::with_capacity(4096),
            nodes,
            links: vec![NIL; MAX_HEIGHT],
            rng,
        }
    }

    fn bytes(&self, span: Span) -> &[u8] {
        &self.arena[span.offset..span.offset + span.len]
    }

    fn save(&mut self, bytes: &[u8]) -> Span {
        let span = Span {
            offset: self.arena.len(),
            len: bytes.len(),
        };
        self.arena.extend_from_slice(bytes);
        span
    }

    pub(super) fn next(&self, node: NodeId, level: usize) -> NodeId {
        let n = &self.nodes[node];
        debug_assert!(level < n.height);
        self.links[n.tower + level]
    }

    fn set_next(&mut self, node: NodeId, level: usize, to: NodeId) {
        let tower = self.nodes[node].tower;
        self.links[tower + level] = to;
    }

    pub(super) fn key(&self, node: NodeId) -> &[u8] {
        self.bytes(self.nodes[node].key)
    }

    /// The node's value, or `None` if it is a tombstone.
    pub(super) fn value(&self, node: NodeId) -> Option<&[u8]> {
        match self.nodes[node].value {
            Slot::Live(span) => Some(self.bytes(span)),
            Slot::Tombstone => None,
        }
    }

    pub(super) fn first(&self) -> NodeId {
        self.next(HEAD, 0)
    }

    /// Returns the first node whose key is >= `key` (or `NIL`) and whether
    /// its key equals `key`. Tombstones are not skipped.
    ///
    /// When `prev` is given, its first `self.height` slots receive the
    /// predecessor of the result at each level.
    pub(super) fn find_node(
        &self,
        cmp: &dyn Comparer,
        key: &[u8],
        mut prev: Option<&mut [NodeId; MAX_HEIGHT]>,
    ) -> (NodeId, bool) {
        let mut p = HEAD;
        let mut n = NIL;
        let mut exact = false;
        for level in (0..self.height).rev() {
            n = self.next(p, level);
            loop {
                if n == NIL {
                    exact = false;
                    break;
                }
                match cmp.compare(self.key(n), key) {
                    Ordering::Less => {
                        p = n;
                        n = self.next(n, level);
                    }
                    ord => {
                        exact = ord == Ordering::Equal;
                        break;
                    }
                }
            }
            if let Some(prev) = prev.as_deref_mut() {
                prev[level] = p;
            }
        }
        (n, exact)
    }

    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }

    /// Insert or overwrite `key`.
    pub(super) fn insert(&mut self, cmp: &dyn Comparer, key: &[u8], value: &[u8]) {
        let mut prev = [HEAD; MAX_HEIGHT];
        let (n, exact) = self.find_node(cmp, key, Some(&mut prev));
        if exact {
            let span = self.save(value);
            self.nodes[n].value = Slot::Live(span);
            return;
        }

        let height = self.random_height();
        // Levels above the old height start from the head; `prev` already
        // holds HEAD there.
        self.height = self.height.max(height);

        let id = self.nodes.len();
        let tower = self.links.len();
        let key = self.save(key);
        let value = self.save(value);
        for (level, &p) in prev.iter().enumerate().take(height) {
            let succ = self.next(p, level);
            self.links.push(succ);
            self.set_next(p, level, id);
        }
        self.nodes.push(Node {
            key,
            value: Slot::Live(value),
            tower,
            height,
        });
    }

    /// Tombstone `key`. Returns false if the key is absent or already deleted.
    pub(super) fn remove(&mut self, cmp: &dyn Comparer, key: &[u8]) -> bool {
        let (n, exact) = self.find_node(cmp, key, None);
        if !exact || matches!(self.nodes[n].value, Slot::Tombstone) {
            return false;
        }
        self.nodes[n].value = Slot::Tombstone;
        true
    }

    pub(super) fn arena_len(&self) -> usize {
        self.arena.len()
    }

    /// Number of nodes (live or tombstoned), excluding the head.
    pub(super) fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    #[cfg(test)]
    pub(super) fn heights(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes[1..].iter().map(|n| n.height)
    }

    #[cfg(test)]
    pub(super) fn height(&self) -> usize {
        self.height
    }
}
