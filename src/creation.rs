//! Creation context stacks
//!
//! Propagates a creator's precision tag to the object it is constructing.
//! Each thread gets its own LIFO stack of [`CreationFrame`]s: a frame is
//! pushed just before an instrumented `new` and claimed by exactly one of
//! two consumers: the constructor-entry event (unconditional pop) or the
//! after-creation event (pop only when the creator matches).
//!
//! The dual consumption points are a best-effort reconciliation for
//! constructors of untracked types running between the push and the true
//! constructor entry. Deeply interleaved tracked/untracked construction on
//! one thread can still mis-attribute a tag; that limitation is inherited
//! from the protocol's design and deliberately kept.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use crate::reaper::TrackHandle;
use crate::registry::ObjId;
use crate::runtime::{Runtime, Tracked};

/// Transient record pairing a creator with the precision and size it stamps
/// onto the object under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationFrame {
    pub creator: ObjId,
    pub approx: bool,
    pub precise_size: u64,
    pub approx_size: u64,
}

/// Per-thread frame stacks keyed by thread identity.
///
/// One thread never touches another's stack, so the outer mutex only
/// serializes the map itself.
#[derive(Debug, Default)]
pub struct CreationStacks {
    stacks: Mutex<HashMap<ThreadId, Vec<CreationFrame>>>,
}

impl CreationStacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame on the calling thread's stack. Always succeeds.
    pub fn push(&self, frame: CreationFrame) {
        if let Ok(mut stacks) = self.stacks.lock() {
            stacks.entry(thread::current().id()).or_default().push(frame);
        }
    }

    /// Pop the calling thread's top frame unconditionally.
    pub fn pop(&self) -> Option<CreationFrame> {
        match self.stacks.lock() {
            Ok(mut stacks) => stacks.get_mut(&thread::current().id())?.pop(),
            Err(_) => None,
        }
    }

    /// Pop the calling thread's top frame only if it was pushed by
    /// `creator`; otherwise leave the stack untouched.
    pub fn pop_if_creator(&self, creator: ObjId) -> Option<CreationFrame> {
        match self.stacks.lock() {
            Ok(mut stacks) => {
                let stack = stacks.get_mut(&thread::current().id())?;
                if stack.last()?.creator == creator {
                    stack.pop()
                } else {
                    // The frame was already claimed by a matching
                    // enter_constructor for an intervening object.
                    None
                }
            }
            Err(_) => None,
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        self.stacks
            .lock()
            .map(|stacks| {
                stacks
                    .get(&thread::current().id())
                    .map(Vec::len)
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

impl Runtime {
    /// Announce an imminent instrumented object creation on this thread.
    pub fn before_creation(
        &self,
        creator: ObjId,
        approx: bool,
        precise_size: u64,
        approx_size: u64,
    ) {
        self.creations().push(CreationFrame {
            creator,
            approx,
            precise_size,
            approx_size,
        });
    }

    /// Register the object whose constructor body is starting, using the
    /// top creation frame of this thread.
    ///
    /// Returns `None` when the stack is absent or empty: the object was
    /// constructed by code outside the instrumented program and stays
    /// untracked.
    pub fn enter_constructor(&self) -> Option<TrackHandle> {
        let frame = self.creations().pop()?;
        Some(self.register(frame.approx, true, frame.precise_size, frame.approx_size))
    }

    /// Register a created object after its constructor returned, if this
    /// thread's top frame still belongs to `creator`.
    ///
    /// A non-matching frame means an intervening `enter_constructor`
    /// already claimed it; the stack is left untouched and `None` is
    /// returned.
    pub fn after_creation(&self, creator: ObjId) -> Option<TrackHandle> {
        let frame = self.creations().pop_if_creator(creator)?;
        Some(self.register(frame.approx, true, frame.precise_size, frame.approx_size))
    }

    /// Convenience wrapper around [`Runtime::after_creation`] that carries
    /// the constructed value through.
    pub fn wrapped_new<T>(&self, value: T, creator: ObjId) -> Tracked<T> {
        Tracked::with_handle(value, self.after_creation(creator))
    }

    /// Register a freshly initialized array.
    ///
    /// `dims` holds the length of each dimension; the element count is
    /// their product, stopping early at a zero-length dimension. A precise
    /// array folds its approximate element size into the precise bucket.
    pub fn new_array(
        &self,
        dims: &[usize],
        approx: bool,
        precise_el_size: u64,
        approx_el_size: u64,
    ) -> TrackHandle {
        let mut elems: u64 = 1;
        for &dim in dims {
            if dim == 0 {
                elems = 0;
                break;
            }
            elems *= dim as u64;
        }

        let (mut precise_el, mut approx_el) = (precise_el_size, approx_el_size);
        if !approx {
            precise_el += approx_el;
            approx_el = 0;
        }

        self.register(false, true, precise_el * elems, approx_el * elems)
    }
}
