//! Graph Nodes
//!
//! This module defines the fixed-shape storage cell that backs every signal
//! and every computed, plus the link records that make up a node's observer
//! list.
//!
//! A node never holds a typed value. The value and its equality policy live
//! in the typed handle ([`Signal`](crate::Signal), [`Computed`](crate::Computed));
//! the node carries only what the graph needs: a version counter, the head
//! and tail of its observer list, and the free-list link used while it sits
//! in the pool.

use std::fmt;
use std::rc::Weak;

use crate::reactive::EffectId;

/// Handle to a pooled node.
///
/// The generation is bumped every time the slot is released, so a `NodeId`
/// kept by an effect after its signal was dropped no longer matches the slot
/// and is ignored by every pool operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the pool.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Reuse counter of the slot at the time this id was handed out.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}.{}", self.index, self.generation)
    }
}

/// Index of an observer link inside the pool's link arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LinkId(pub(crate) u32);

impl LinkId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One membership of an effect in a node's observer list.
///
/// While the link is free, `next` threads the link free list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub(crate) effect: EffectId,
    pub(crate) prev: Option<LinkId>,
    pub(crate) next: Option<LinkId>,
}

/// Head of an intrusive, insertion-ordered observer list.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ObserverList {
    pub(crate) head: Option<LinkId>,
    pub(crate) tail: Option<LinkId>,
    pub(crate) len: usize,
}

impl ObserverList {
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A value derived from other nodes that can bring itself up to date on
/// demand. Computeds register themselves on their synthetic node so that a
/// dependent effect's staleness check can pull them first.
pub(crate) trait Derived {
    fn refresh(&self);
}

/// A pooled reactive storage cell.
pub(crate) struct ReactiveNode {
    pub(crate) generation: u32,
    pub(crate) live: bool,
    pub(crate) version: u64,
    pub(crate) observers: ObserverList,
    pub(crate) derived: Option<Weak<dyn Derived>>,
    /// Free-list link. Only meaningful while the node is free.
    pub(crate) next: Option<u32>,
}

impl ReactiveNode {
    pub(crate) fn vacant(next: Option<u32>) -> Self {
        Self {
            generation: 0,
            live: false,
            version: 0,
            observers: ObserverList::default(),
            derived: None,
            next,
        }
    }

    pub(crate) fn matches(&self, id: NodeId) -> bool {
        self.live && self.generation == id.generation
    }
}

impl fmt::Debug for ReactiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveNode")
            .field("generation", &self.generation)
            .field("live", &self.live)
            .field("version", &self.version)
            .field("observers", &self.observers.len)
            .field("derived", &self.derived.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacant_node_matches_nothing() {
        let node = ReactiveNode::vacant(None);
        assert!(!node.matches(NodeId::new(0, 0)));
        assert!(node.observers.is_empty());
    }

    #[test]
    fn generation_mismatch_is_stale() {
        let mut node = ReactiveNode::vacant(None);
        node.live = true;
        node.generation = 3;
        assert!(node.matches(NodeId::new(0, 3)));
        assert!(!node.matches(NodeId::new(0, 2)));
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::new(7, 2).to_string(), "n7.2");
    }
}
