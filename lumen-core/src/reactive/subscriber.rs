//! Subscriber types for the reactive system.
//!
//! Effects are the only subscribers in the graph (a computed subscribes
//! through its internal effect). This module holds their identity, the arena
//! that stores them, and the scheduler hook each one carries.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::{LinkId, NodeId};

/// Unique identifier for an effect.
///
/// Like [`NodeId`], it carries the generation of its arena slot so a handle
/// kept after `stop()` never addresses a different effect that reused the
/// slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId {
    index: u32,
    generation: u32,
}

impl EffectId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}.{}", self.index, self.generation)
    }
}

/// Identifier for a manual signal subscription.
///
/// Generated from a global counter, so ids are unique across signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending run of an effect, handed to custom schedulers.
pub struct Job {
    runtime: Runtime,
    id: EffectId,
}

impl Job {
    pub(crate) fn new(runtime: Runtime, id: EffectId) -> Self {
        Self { runtime, id }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run the effect now. Panics are caught and reported like a flush.
    pub fn run(&self) {
        self.runtime.run_guarded(self.id);
    }

    /// Hand the effect to the default queue instead.
    pub fn enqueue(&self) {
        self.runtime.queue_job(self.id);
    }
}

/// Decides what happens when one of an effect's dependencies changes.
#[derive(Clone, Default)]
pub enum Scheduler {
    /// Add the effect to the job queue and flush later (or at the end of the
    /// enclosing batch).
    #[default]
    Queue,
    /// Run the effect synchronously inside the write that triggered it.
    Sync,
    /// Call a user hook with the pending [`Job`].
    Custom(Rc<dyn Fn(&Job)>),
}

impl Scheduler {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Job) + 'static,
    {
        Scheduler::Custom(Rc::new(f))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduler::Queue => f.write_str("Queue"),
            Scheduler::Sync => f.write_str("Sync"),
            Scheduler::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub(crate) type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

/// Registered with [`Runtime::on_cleanup`]; runs before the next run or on stop.
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// Type-erased effect body. The typed closure and its cached result live in
/// the [`Effect`](super::Effect) handle's cell.
pub(crate) trait EffectBody {
    fn execute(&self);
}

/// Where an effect is subscribed, and the version it saw.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dependency {
    pub(crate) link: LinkId,
    pub(crate) version: u64,
}

/// Everything the runtime knows about one effect.
pub(crate) struct EffectSlot {
    generation: u32,
    live: bool,
    next_free: Option<u32>,
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) body: Option<Rc<dyn EffectBody>>,
    pub(crate) scheduler: Scheduler,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) deps: IndexMap<NodeId, Dependency>,
    pub(crate) cleanups: Vec<Cleanup>,
    pub(crate) is_running: bool,
    pub(crate) is_static: bool,
    /// Run on the next request regardless of dependency versions. Set until
    /// the first run completes, and again after a run panicked.
    pub(crate) force_run: bool,
    pub(crate) run_count: u64,
}

/// Fields needed to create a slot.
pub(crate) struct NewEffect {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) body: Rc<dyn EffectBody>,
    pub(crate) scheduler: Scheduler,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) is_static: bool,
}

/// Parts of a removed slot that must be released outside the arena borrow:
/// the body may own signals whose drop re-enters the runtime.
pub(crate) struct RemovedEffect {
    pub(crate) deps: IndexMap<NodeId, Dependency>,
    pub(crate) body: Option<Rc<dyn EffectBody>>,
    pub(crate) cleanups: Vec<Cleanup>,
}

/// Slab of effect slots with a free list.
#[derive(Default)]
pub(crate) struct EffectTable {
    slots: Vec<EffectSlot>,
    free: Option<u32>,
    live: usize,
}

impl EffectTable {
    pub(crate) fn insert(&mut self, new: NewEffect) -> EffectId {
        let NewEffect {
            name,
            body,
            scheduler,
            on_error,
            is_static,
        } = new;

        let index = match self.free {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                self.free = slot.next_free.take();
                index
            }
            None => {
                self.slots.push(EffectSlot {
                    generation: 0,
                    live: false,
                    next_free: None,
                    name: None,
                    body: None,
                    scheduler: Scheduler::Queue,
                    on_error: None,
                    deps: IndexMap::new(),
                    cleanups: Vec::new(),
                    is_running: false,
                    is_static: false,
                    force_run: true,
                    run_count: 0,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.live = true;
        slot.name = name;
        slot.body = Some(body);
        slot.scheduler = scheduler;
        slot.on_error = on_error;
        slot.is_static = is_static;
        slot.is_running = false;
        slot.force_run = true;
        slot.run_count = 0;
        self.live += 1;

        EffectId::new(index, slot.generation)
    }

    pub(crate) fn get(&self, id: EffectId) -> Option<&EffectSlot> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.live && slot.generation == id.generation)
    }

    pub(crate) fn get_mut(&mut self, id: EffectId) -> Option<&mut EffectSlot> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.live && slot.generation == id.generation)
    }

    /// Free the slot. The id and every copy of it become stale.
    pub(crate) fn remove(&mut self, id: EffectId) -> Option<RemovedEffect> {
        let free = self.free;
        let slot = self.get_mut(id)?;

        let removed = RemovedEffect {
            deps: std::mem::take(&mut slot.deps),
            body: slot.body.take(),
            cleanups: std::mem::take(&mut slot.cleanups),
        };
        slot.live = false;
        slot.is_running = false;
        slot.on_error = None;
        slot.scheduler = Scheduler::Queue;
        slot.name = None;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = free;

        self.free = Some(id.index() as u32);
        self.live -= 1;
        Some(removed)
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Ids of every live effect, in slot order.
    pub(crate) fn ids(&self) -> Vec<EffectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.live)
            .map(|(index, slot)| EffectId::new(index as u32, slot.generation))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl EffectBody for Noop {
        fn execute(&self) {}
    }

    fn new_effect() -> NewEffect {
        NewEffect {
            name: None,
            body: Rc::new(Noop),
            scheduler: Scheduler::Queue,
            on_error: None,
            is_static: false,
        }
    }

    #[test]
    fn subscription_ids_are_unique() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        let id3 = SubscriptionId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn removed_slot_is_reused_with_new_generation() {
        let mut table = EffectTable::default();
        let first = table.insert(new_effect());
        assert_eq!(table.live(), 1);

        assert!(table.remove(first).is_some());
        assert!(table.get(first).is_none());
        assert!(table.remove(first).is_none());

        let second = table.insert(new_effect());
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert!(table.get(second).is_some());
        assert!(table.get(second).is_some_and(|slot| slot.force_run));
        assert_eq!(table.ids(), vec![second]);
    }

    #[test]
    fn scheduler_defaults_to_queue() {
        assert!(matches!(Scheduler::default(), Scheduler::Queue));
        assert_eq!(format!("{:?}", Scheduler::custom(|_| {})), "Custom(..)");
    }
}
