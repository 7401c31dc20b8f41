//! Node Pool
//!
//! Allocates reactive nodes in bulk and recycles them through a free list,
//! so creating a signal is an index pop rather than a heap allocation.
//!
//! # Layout
//!
//! ```text
//! nodes:  [ n0 | n1 | n2 | ... ]     free_head -> n5 -> n6 -> ... -> None
//! links:  [ l0 | l1 | l2 | ... ]     free_link -> l3 -> None
//! ```
//!
//! Observer lists are doubly linked through the `links` arena. A node's list
//! stores only `head`/`tail`; each link knows its effect and its neighbours,
//! which makes both insertion and removal O(1) without owning pointers in
//! either direction.

use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::debug;

use super::node::{Derived, Link, LinkId, NodeId, ReactiveNode};
use crate::reactive::EffectId;

/// Snapshot of a node's observers, in subscription order.
pub(crate) type ObserverSnapshot = SmallVec<[EffectId; 8]>;

/// A free-list backed arena of reactive nodes and observer links.
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<ReactiveNode>,
    links: Vec<Link>,
    free_head: Option<u32>,
    free_link: Option<u32>,
    batch_size: usize,
    live: usize,
}

impl NodePool {
    /// Create an empty pool. Nothing is allocated until the first acquire.
    pub fn new(batch_size: usize) -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            free_head: None,
            free_link: None,
            batch_size: batch_size.max(1),
            live: 0,
        }
    }

    /// Take a node off the free list, growing the pool if it is empty.
    ///
    /// The returned node has version 0, no observers and no derived hook.
    pub fn acquire(&mut self) -> NodeId {
        let index = match self.free_head {
            Some(index) => index,
            None => self.grow(),
        };

        let node = &mut self.nodes[index as usize];
        self.free_head = node.next.take();
        node.live = true;
        node.version = 0;
        node.derived = None;
        self.live += 1;

        NodeId::new(index, node.generation)
    }

    /// Return a node to the free list.
    ///
    /// Its observer links are freed and its generation bumped, so effects
    /// that still remember the id stop matching it. Returns `false` if the id
    /// was already stale.
    pub fn release(&mut self, id: NodeId) -> bool {
        let free_head = self.free_head;
        let Some(node) = self.node_mut(id) else {
            return false;
        };

        let observers = std::mem::take(&mut node.observers);
        node.derived = None;
        node.version = 0;
        node.live = false;
        node.generation = node.generation.wrapping_add(1);
        node.next = free_head;

        self.free_head = Some(id.index() as u32);
        self.live -= 1;

        let mut cursor = observers.head;
        while let Some(link) = cursor {
            cursor = self.links[link.index()].next;
            self.free_link(link);
        }
        true
    }

    /// Allocate one batch of nodes and splice it onto the free list in a
    /// single pass. Returns the index of the first new node.
    fn grow(&mut self) -> u32 {
        let start = self.nodes.len();
        let count = self.batch_size;
        self.nodes.reserve(count);

        for offset in 0..count {
            let next = if offset + 1 < count {
                Some((start + offset + 1) as u32)
            } else {
                self.free_head
            };
            self.nodes.push(ReactiveNode::vacant(next));
        }

        debug!(start, count, total = self.nodes.len(), "node pool grew");
        self.free_head = Some(start as u32);
        start as u32
    }

    fn node(&self, id: NodeId) -> Option<&ReactiveNode> {
        self.nodes.get(id.index()).filter(|node| node.matches(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut ReactiveNode> {
        self.nodes.get_mut(id.index()).filter(|node| node.matches(id))
    }

    /// Whether `id` still refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn version(&self, id: NodeId) -> Option<u64> {
        self.node(id).map(|node| node.version)
    }

    /// Increment the node's version and return the new value.
    pub fn bump_version(&mut self, id: NodeId) -> Option<u64> {
        self.node_mut(id).map(|node| {
            node.version = node.version.wrapping_add(1);
            node.version
        })
    }

    pub fn observer_count(&self, id: NodeId) -> usize {
        self.node(id).map_or(0, |node| node.observers.len)
    }

    pub(crate) fn has_observers(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|node| !node.observers.is_empty())
    }

    /// Append `effect` to the node's observer list.
    pub(crate) fn link(&mut self, id: NodeId, effect: EffectId) -> Option<LinkId> {
        let tail = self.node(id)?.observers.tail;
        let link = self.alloc_link(Link {
            effect,
            prev: tail,
            next: None,
        });

        match tail {
            Some(tail) => self.links[tail.index()].next = Some(link),
            None => {
                if let Some(node) = self.node_mut(id) {
                    node.observers.head = Some(link);
                }
            }
        }

        let node = self.node_mut(id)?;
        node.observers.tail = Some(link);
        node.observers.len += 1;
        Some(link)
    }

    /// Remove one link from the node's observer list.
    ///
    /// A stale node id is a no-op: its links were already freed on release.
    pub(crate) fn unlink(&mut self, id: NodeId, link: LinkId) -> bool {
        if !self.contains(id) {
            return false;
        }

        let Link { prev, next, .. } = self.links[link.index()];
        match prev {
            Some(prev) => self.links[prev.index()].next = next,
            None => {
                if let Some(node) = self.node_mut(id) {
                    node.observers.head = next;
                }
            }
        }
        match next {
            Some(next) => self.links[next.index()].prev = prev,
            None => {
                if let Some(node) = self.node_mut(id) {
                    node.observers.tail = prev;
                }
            }
        }
        if let Some(node) = self.node_mut(id) {
            node.observers.len -= 1;
        }

        self.free_link(link);
        true
    }

    /// Observers of a node, in the order they subscribed.
    pub(crate) fn observers(&self, id: NodeId) -> ObserverSnapshot {
        let mut out = ObserverSnapshot::new();
        let Some(node) = self.node(id) else {
            return out;
        };

        let mut cursor = node.observers.head;
        while let Some(link) = cursor {
            let link = &self.links[link.index()];
            out.push(link.effect);
            cursor = link.next;
        }
        out
    }

    pub(crate) fn set_derived(&mut self, id: NodeId, derived: Weak<dyn Derived>) {
        if let Some(node) = self.node_mut(id) {
            node.derived = Some(derived);
        }
    }

    pub(crate) fn derived(&self, id: NodeId) -> Option<Rc<dyn Derived>> {
        self.node(id)?.derived.as_ref()?.upgrade()
    }

    fn alloc_link(&mut self, link: Link) -> LinkId {
        match self.free_link {
            Some(index) => {
                self.free_link = self.links[index as usize].next.map(|next| next.0);
                self.links[index as usize] = link;
                LinkId(index)
            }
            None => {
                self.links.push(link);
                LinkId((self.links.len() - 1) as u32)
            }
        }
    }

    fn free_link(&mut self, link: LinkId) {
        let slot = &mut self.links[link.index()];
        slot.prev = None;
        slot.next = self.free_link.map(LinkId);
        self.free_link = Some(link.0);
    }

    /// Nodes currently owned by a signal or computed.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Nodes sitting on the free list.
    pub fn free(&self) -> usize {
        self.nodes.len() - self.live
    }

    /// Total nodes ever allocated.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_POOL_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(n: u32) -> EffectId {
        EffectId::new(n, 0)
    }

    #[test]
    fn acquire_grows_in_batches() {
        let mut pool = NodePool::new(4);
        assert_eq!(pool.capacity(), 0);

        let ids: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.live(), 5);
        assert_eq!(pool.free(), 3);

        for id in &ids {
            assert_eq!(pool.version(*id), Some(0));
        }
    }

    #[test]
    fn release_recycles_slot_with_new_generation() {
        let mut pool = NodePool::new(2);
        let first = pool.acquire();
        pool.bump_version(first);

        assert!(pool.release(first));
        assert!(!pool.contains(first));
        assert!(!pool.release(first));

        let second = pool.acquire();
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert_eq!(pool.version(second), Some(0));
    }

    #[test]
    fn observers_keep_subscription_order() {
        let mut pool = NodePool::new(1);
        let node = pool.acquire();

        pool.link(node, effect(3));
        pool.link(node, effect(1));
        pool.link(node, effect(2));

        assert_eq!(pool.observers(node).as_slice(), &[effect(3), effect(1), effect(2)]);
    }

    #[test]
    fn unlink_from_middle_head_and_tail() {
        let mut pool = NodePool::new(1);
        let node = pool.acquire();

        let a = pool.link(node, effect(0)).unwrap();
        let b = pool.link(node, effect(1)).unwrap();
        let c = pool.link(node, effect(2)).unwrap();

        assert!(pool.unlink(node, b));
        assert_eq!(pool.observers(node).as_slice(), &[effect(0), effect(2)]);

        assert!(pool.unlink(node, a));
        assert_eq!(pool.observers(node).as_slice(), &[effect(2)]);

        assert!(pool.unlink(node, c));
        assert!(pool.observers(node).is_empty());
        assert!(!pool.has_observers(node));
    }

    #[test]
    fn links_are_reused_after_unlink() {
        let mut pool = NodePool::new(1);
        let node = pool.acquire();

        let first = pool.link(node, effect(0)).unwrap();
        pool.unlink(node, first);
        let second = pool.link(node, effect(1)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn stale_unlink_does_not_touch_new_occupant() {
        let mut pool = NodePool::new(1);
        let old = pool.acquire();
        let old_link = pool.link(old, effect(0)).unwrap();
        pool.release(old);

        let new = pool.acquire();
        pool.link(new, effect(9));

        assert!(!pool.unlink(old, old_link));
        assert_eq!(pool.observers(new).as_slice(), &[effect(9)]);
    }
}
