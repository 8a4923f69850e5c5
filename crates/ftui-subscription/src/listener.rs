#![forbid(unsafe_code)]

//! Callback and handle types shared by every layer of the subscription tree.
//!
//! - [`Listener`]: a shared, argument-less change callback.
//! - [`Unsubscribe`]: a one-shot, clonable removal handle.
//! - [`SubscriptionGuard`]: RAII wrapper that unsubscribes on drop.
//! - [`Source`]: anything a root [`Subscription`](crate::Subscription) can
//!   attach to.
//!
//! # Invariants
//!
//! 1. An `Unsubscribe` runs its removal at most once, no matter how many
//!    clones of it are called or how often.
//! 2. The removal closure runs outside any internal borrow, so it may
//!    re-enter the registry it removes from.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A change callback. Listeners take no arguments: they only learn that
/// *something* changed upstream.
pub type Listener = Rc<dyn Fn()>;

/// Wrap a closure as a [`Listener`].
pub fn listener(f: impl Fn() + 'static) -> Listener {
    Rc::new(f)
}

type Removal = Box<dyn FnOnce()>;

/// Idempotent removal handle returned by every `subscribe`-shaped call.
///
/// Cloning shares the underlying one-shot state: once any clone has been
/// called, every clone is inert. Dropping a handle does **not** unsubscribe;
/// use [`Unsubscribe::into_guard`] for that.
#[derive(Clone)]
pub struct Unsubscribe {
    removal: Rc<RefCell<Option<Removal>>>,
}

impl Unsubscribe {
    /// Create a handle that runs `f` the first time it is called.
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self {
            removal: Rc::new(RefCell::new(Some(Box::new(f)))),
        }
    }

    /// A handle that does nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            removal: Rc::new(RefCell::new(None)),
        }
    }

    /// Run the removal if it has not run yet. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        let removal = self.removal.borrow_mut().take();
        if let Some(removal) = removal {
            removal();
        }
    }

    /// Whether the removal is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.removal.borrow().is_some()
    }

    /// Convert into a guard that unsubscribes when dropped.
    #[must_use]
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard { handle: Some(self) }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// RAII guard for a registration.
///
/// Dropping the guard calls the wrapped [`Unsubscribe`]. Use
/// [`SubscriptionGuard::forget`] to keep the registration alive past the
/// guard.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    handle: Option<Unsubscribe>,
}

impl SubscriptionGuard {
    /// Release the guard without unsubscribing, returning the raw handle.
    pub fn forget(mut self) -> Unsubscribe {
        self.handle.take().unwrap_or_else(Unsubscribe::noop)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unsubscribe();
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard").finish_non_exhaustive()
    }
}

/// An upstream change source a root subscription attaches to.
///
/// Implementations must invoke `listener` with no arguments whenever their
/// state changes and return a handle that detaches it. The handle should be
/// idempotent; [`Unsubscribe`] already is.
pub trait Source {
    /// Register `listener` for change notifications.
    fn subscribe(&self, listener: Listener) -> Unsubscribe;
}

impl<F> Source for F
where
    F: Fn(Listener) -> Unsubscribe,
{
    fn subscribe(&self, listener: Listener) -> Unsubscribe {
        self(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn unsubscribe_runs_once() {
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let handle = Unsubscribe::new(move || c.set(c.get() + 1));

        assert!(handle.is_pending());
        handle.unsubscribe();
        handle.unsubscribe();
        assert_eq!(count.get(), 1);
        assert!(!handle.is_pending());
    }

    #[test]
    fn clones_share_one_shot_state() {
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let a = Unsubscribe::new(move || c.set(c.get() + 1));
        let b = a.clone();

        b.unsubscribe();
        a.unsubscribe();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn removal_may_reenter_its_handle() {
        let slot: Rc<RefCell<Option<Unsubscribe>>> = Rc::new(RefCell::new(None));
        let inner = Rc::clone(&slot);
        let handle = Unsubscribe::new(move || {
            // Calling ourselves again from inside the removal is a no-op.
            if let Some(h) = inner.borrow().as_ref() {
                h.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(handle.clone());
        handle.unsubscribe();
        assert!(!handle.is_pending());
    }

    #[test]
    fn dropping_handle_keeps_registration() {
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        drop(Unsubscribe::new(move || c.set(c.get() + 1)));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn guard_unsubscribes_on_drop() {
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let guard = Unsubscribe::new(move || c.set(c.get() + 1)).into_guard();
        assert_eq!(count.get(), 0);
        drop(guard);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn forgotten_guard_keeps_registration() {
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let guard = Unsubscribe::new(move || c.set(c.get() + 1)).into_guard();
        let handle = guard.forget();
        assert_eq!(count.get(), 0);
        handle.unsubscribe();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn closures_are_sources() {
        let seen = Rc::new(Cell::new(0u32));
        let s = Rc::clone(&seen);
        let source = move |l: Listener| {
            l();
            let s = Rc::clone(&s);
            Unsubscribe::new(move || s.set(s.get() + 10))
        };
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let handle = Source::subscribe(&source, listener(move || f.set(true)));
        assert!(fired.get());
        handle.unsubscribe();
        assert_eq!(seen.get(), 10);
    }
}
