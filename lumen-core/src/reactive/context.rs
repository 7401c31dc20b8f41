//! Reactive Context
//!
//! The reactive context tracks which effect is currently running. This
//! enables automatic dependency tracking: when a signal is read, the runtime
//! links the current effect into the signal's observer list.
//!
//! # Implementation
//!
//! Each [`Runtime`] owns a stack of frames. Running an effect pushes its id;
//! [`untrack`](super::Runtime::untrack) pushes an empty frame so reads inside
//! it register nothing. Frames are pushed and popped only through
//! [`ContextGuard`], so the stack is restored even when an effect body
//! panics.

use super::runtime::Runtime;
use super::EffectId;

/// Stack of running effects. `None` frames suspend tracking.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: Vec<Option<EffectId>>,
}

impl ContextStack {
    fn push(&mut self, frame: Option<EffectId>) {
        self.frames.push(frame);
    }

    fn pop(&mut self) -> Option<Option<EffectId>> {
        self.frames.pop()
    }

    /// The effect reads should be attributed to, if any.
    pub(crate) fn current(&self) -> Option<EffectId> {
        self.frames.last().copied().flatten()
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Guard that pops the context frame when dropped.
pub(crate) struct ContextGuard<'a> {
    runtime: &'a Runtime,
    frame: Option<EffectId>,
}

impl<'a> ContextGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, frame: Option<EffectId>) -> Self {
        runtime.context().borrow_mut().push(frame);
        Self { runtime, frame }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.runtime.context().borrow_mut().pop();

        // Verify we're popping the right frame.
        debug_assert_eq!(
            popped,
            Some(self.frame),
            "reactive context mismatch: expected {:?}, got {:?}",
            self.frame,
            popped
        );
    }
}
