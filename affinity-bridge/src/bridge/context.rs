// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Per-thread bridge context.
//!
//! Two slots per thread:
//! - the loop the thread is currently driving (set by [`EventLoop`]),
//! - the home loop of the async caller that handed the thread a blocking
//!   operation (set by [`AsyncToSync`] on executor threads).
//!
//! Both are written only by the owning thread, through guards that restore the
//! previous value when dropped.
//!
//! [`EventLoop`]: crate::bridge::EventLoop
//! [`AsyncToSync`]: crate::bridge::AsyncToSync

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::bridge::event_loop::LoopHandle;

thread_local! {
    static DRIVING: RefCell<Option<LoopHandle>> = RefCell::new(None);
    static HOME: RefCell<Option<LoopHandle>> = RefCell::new(None);
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Driving,
    Home,
}

impl Slot {
    fn replace(self, value: Option<LoopHandle>) -> Option<LoopHandle> {
        match self {
            Slot::Driving => DRIVING.with(|slot| slot.replace(value)),
            Slot::Home => HOME.with(|slot| slot.replace(value)),
        }
    }
}

/// Restores the previous slot value on drop. Bound to the thread it was
/// created on.
#[must_use = "the context is reset as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    slot: Slot,
    previous: Option<LoopHandle>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.slot.replace(self.previous.take());
    }
}

fn enter(slot: Slot, handle: LoopHandle) -> ContextGuard {
    let previous = slot.replace(Some(handle));
    ContextGuard {
        slot,
        previous,
        _not_send: PhantomData,
    }
}

pub(crate) fn enter_loop(handle: LoopHandle) -> ContextGuard {
    enter(Slot::Driving, handle)
}

/// The loop this thread is driving right now, if any.
pub fn driving_loop() -> Option<LoopHandle> {
    DRIVING.with(|slot| slot.borrow().clone())
}

/// True while the calling thread is inside a running event loop.
pub fn is_driving_loop() -> bool {
    DRIVING.with(|slot| slot.borrow().as_ref().is_some_and(LoopHandle::is_running))
}

/// The home loop recorded for this thread by an async caller.
pub fn recorded_home() -> Option<LoopHandle> {
    HOME.with(|slot| slot.borrow().clone())
}

/// Explicit form of the per-thread context, for passing along a call chain.
#[derive(Debug, Clone, Default)]
pub struct BridgeContext {
    home: Option<LoopHandle>,
}

impl BridgeContext {
    /// Context of the calling thread: the loop it drives, else the home loop
    /// recorded for it.
    pub fn current() -> Self {
        Self {
            home: driving_loop().or_else(recorded_home),
        }
    }

    pub fn with_home(home: LoopHandle) -> Self {
        Self { home: Some(home) }
    }

    pub fn home(&self) -> Option<&LoopHandle> {
        self.home.as_ref()
    }

    /// Records this context's home loop on the calling thread until the guard
    /// is dropped.
    pub fn enter(&self) -> Option<ContextGuard> {
        self.home.clone().map(|home| enter(Slot::Home, home))
    }
}
