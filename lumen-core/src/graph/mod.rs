//! Dependency Graph Storage
//!
//! This module holds the type-free data structures behind the reactive
//! primitives:
//!
//! - [`NodePool`]: bulk-allocated, recycled storage cells with intrusive
//!   observer lists
//! - [`JobQueue`]: the pending-effect set and scheduler flags
//!
//! # Design Decisions
//!
//! 1. Nodes and effects refer to each other only through indices. A node's
//!    observer list is a chain of links in an arena; an effect remembers the
//!    link it owns in each node. Detaching is an index removal, never a
//!    deallocation, so the pool can recycle slots freely.
//!
//! 2. Ids carry a generation. Releasing a node bumps it, which turns every
//!    id still held elsewhere into a harmless stale reference.
//!
//! 3. Notification order is subscription order. There is no topological
//!    ordering across independent effects.

mod node;
mod pool;
mod scheduler;

pub use node::NodeId;
pub(crate) use node::{Derived, LinkId};
pub use pool::NodePool;
pub use scheduler::{JobQueue, SchedulerState};
