#![forbid(unsafe_code)]

//! Versioned state container acting as the root of a subscription tree.
//!
//! # Design
//!
//! [`Store<T>`] wraps a value in shared, reference-counted storage. When the
//! value changes (determined by `PartialEq`), the version is bumped and every
//! subscriber is notified through a [`ListenerCollection`], so the whole
//! downstream fan-out runs inside one batch.
//!
//! # Performance
//!
//! | Operation     | Complexity                 |
//! |---------------|----------------------------|
//! | `get()`       | O(1) + clone               |
//! | `set()`       | O(S) where S = subscribers |
//! | `subscribe()` | O(1)                       |
//!
//! # Failure Modes
//!
//! - **Re-entrant set**: allowed. The value borrow is released before
//!   notification, so a listener may call `set()`; the nested notification
//!   runs inside the outer batch.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::batch::SharedBatch;
use crate::listener::{Listener, Source, Unsubscribe};
use crate::listeners::ListenerCollection;

struct StoreState<T> {
    value: T,
    version: u64,
}

struct StoreInner<T> {
    state: RefCell<StoreState<T>>,
    listeners: ListenerCollection,
}

/// A shared, version-tracked value that notifies subscribers on change.
///
/// Cloning a `Store` creates a new handle to the **same** inner state.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing mutation.
/// 2. `set(v)` where `v == current` is a no-op.
/// 3. Subscribers are notified in registration order.
pub struct Store<T> {
    inner: Rc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Store")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("subscriber_count", &self.inner.listeners.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Store<T> {
    /// Create a store with the given initial value at version 0.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_listeners(value, ListenerCollection::new())
    }

    /// Create a store whose notifications run through `batch`.
    #[must_use]
    pub fn with_batch(value: T, batch: SharedBatch) -> Self {
        Self::with_listeners(value, ListenerCollection::with_batch(batch))
    }

    fn with_listeners(value: T, listeners: ListenerCollection) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(StoreState { value, version: 0 }),
                listeners,
            }),
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.state.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.state.borrow().value)
    }

    /// Replace the value, notifying subscribers if it changed.
    pub fn set(&self, value: T) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.value == value {
                return;
            }
            state.value = value;
            state.version += 1;
        }
        self.inner.listeners.notify();
    }

    /// Modify the value in place, notifying subscribers if it changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            let old = state.value.clone();
            f(&mut state.value);
            if state.value != old {
                state.version += 1;
                true
            } else {
                false
            }
        };
        if changed {
            self.inner.listeners.notify();
        }
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.state.borrow().version
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl<T> Source for Store<T> {
    fn subscribe(&self, listener: Listener) -> Unsubscribe {
        self.inner.listeners.subscribe(listener)
    }
}
