#![forbid(unsafe_code)]

//! Subscription nodes: lazily attached, nestable change relays.
//!
//! # Design
//!
//! A [`Subscription`] owns one [`ListenerCollection`] and knows its upstream:
//! either a root [`Source`] or a parent `Subscription`. It attaches upstream
//! only when something needs it, by registering its stable change handler
//! ([`Subscription::handle_change_wrapper`]). When upstream fires, the handler
//! calls the node's `on_change` hook, which is normally
//! [`Subscription::notify_nested_subs`].
//!
//! A parent's registry entry for a child *is* the child's change handler, so
//! a notification recurses depth-first through the tree from inside the
//! parent's walk:
//!
//! ```text
//! store ──► P.handle_change ──► P.notify
//!                                 ├─► L_P            (leaf listener)
//!                                 └─► C.handle_change ──► C.notify
//!                                                           └─► L_C
//! ```
//!
//! Every listener registered on P before C's handler finishes before any of
//! C's listeners starts.
//!
//! # Attachment
//!
//! | Call                     | Effect                                      |
//! |--------------------------|---------------------------------------------|
//! | `try_subscribe()`        | pin the node, attach if detached            |
//! | `add_nested_sub(l)`      | attach if detached, count one nested reason |
//! | nested `unsubscribe()`   | drop one reason, detach when none remain    |
//! | `try_unsubscribe_self()` | unpin, detach when no nested reasons remain |
//! | `try_unsubscribe()`      | detach now, forget every reason             |
//!
//! # Invariants
//!
//! 1. `unsubscribe_from_upstream.is_some()` iff the node is attached iff its
//!    registry is live.
//! 2. The upstream is fixed at construction.
//! 3. `handle_change_wrapper()` returns the same `Rc` for the node's lifetime.
//! 4. Nested handles issued before a detach never release reasons of a later
//!    attachment.
//! 5. Dropping the last handle to an attached node detaches it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::batch::{ScopedBatch, SharedBatch};
use crate::listener::{Listener, Source, Unsubscribe};
use crate::listeners::ListenerCollection;

/// Where a [`Subscription`] attaches.
#[derive(Clone)]
pub enum Upstream {
    /// The true state source at the top of the tree.
    Root(Rc<dyn Source>),
    /// Another subscription node.
    Parent(Subscription),
}

impl Upstream {
    /// Wrap a root source.
    pub fn root(source: impl Source + 'static) -> Self {
        Self::Root(Rc::new(source))
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(_) => f.write_str("Root"),
            Self::Parent(parent) => f.debug_tuple("Parent").field(&parent.label()).finish(),
        }
    }
}

/// Configuration for a subscription node.
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// Name reported in log events and errors.
    pub label: Option<String>,
    /// Batching primitive used for this node's notifications.
    pub batch: SharedBatch,
    /// Install `notify_nested_subs` as the `on_change` hook on construction.
    pub live: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            label: None,
            batch: Rc::new(ScopedBatch),
            live: false,
        }
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("label", &self.label)
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

impl SubscriptionConfig {
    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the batching primitive.
    #[must_use]
    pub fn with_batch(mut self, batch: SharedBatch) -> Self {
        self.batch = batch;
        self
    }

    /// Make the node live on construction.
    #[must_use]
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }
}

struct NodeState {
    unsubscribe_from_upstream: Option<Unsubscribe>,
    listeners: ListenerCollection,
    /// Live registrations made through `add_nested_sub`.
    nested: usize,
    /// Set by an explicit `try_subscribe`.
    self_subscribed: bool,
    /// Bumped on every attach.
    generation: u64,
}

struct SubscriptionInner {
    upstream: Upstream,
    label: Option<Rc<str>>,
    batch: SharedBatch,
    state: RefCell<NodeState>,
    on_change: RefCell<Option<Listener>>,
    handle_change: Listener,
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(unsubscribe) = state.unsubscribe_from_upstream.take() {
            tracing::debug!(label = self.label.as_deref(), "dropped while attached, detaching");
            unsubscribe.unsubscribe();
            state.listeners.clear();
        }
    }
}

/// A node in a subscription tree.
///
/// Cloning yields another handle to the **same** node. The node detaches
/// when its last handle is dropped.
///
/// A hook installed with [`set_on_change`](Self::set_on_change) that captures
/// a handle to its own node keeps that node alive; [`make_live`](Self::make_live)
/// does not.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Subscription")
            .field("label", &self.inner.label)
            .field("upstream", &self.inner.upstream)
            .field("subscribed", &state.unsubscribe_from_upstream.is_some())
            .field("nested", &state.nested)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl Subscription {
    /// A root node attached to `source`, with default configuration.
    pub fn root(source: impl Source + 'static) -> Self {
        Self::with_config(Upstream::root(source), SubscriptionConfig::default())
    }

    /// A child of `parent`, sharing its batching primitive.
    #[must_use]
    pub fn nested(parent: &Subscription) -> Self {
        let config = SubscriptionConfig::default().with_batch(Rc::clone(&parent.inner.batch));
        Self::with_config(Upstream::Parent(parent.clone()), config)
    }

    /// A node with explicit upstream and configuration.
    #[must_use]
    pub fn with_config(upstream: Upstream, config: SubscriptionConfig) -> Self {
        let label: Option<Rc<str>> = config.label.map(Rc::from);
        let batch = config.batch;
        let inner = Rc::new_cyclic(|weak: &Weak<SubscriptionInner>| {
            let weak = weak.clone();
            let handle_change: Listener = Rc::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let hook = inner.on_change.borrow().clone();
                if let Some(hook) = hook {
                    hook();
                }
            });
            SubscriptionInner {
                upstream,
                label: label.clone(),
                batch,
                state: RefCell::new(NodeState {
                    unsubscribe_from_upstream: None,
                    listeners: ListenerCollection::detached().labeled(label),
                    nested: 0,
                    self_subscribed: false,
                    generation: 0,
                }),
                on_change: RefCell::new(None),
                handle_change,
            }
        });
        let sub = Self { inner };
        if config.live {
            sub.make_live();
        }
        sub
    }

    /// Register `listener` for this node's notifications, attaching upstream
    /// first if needed.
    ///
    /// The returned handle removes the listener and releases the node's
    /// nested reason for staying attached.
    pub fn add_nested_sub(&self, listener: Listener) -> Unsubscribe {
        self.attach();
        let (listeners, generation) = {
            let mut state = self.inner.state.borrow_mut();
            state.nested += 1;
            (state.listeners.clone(), state.generation)
        };
        let remove = listeners.subscribe(listener);
        let node = Rc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            remove.unsubscribe();
            if let Some(inner) = node.upgrade() {
                Subscription { inner }.release_nested(generation);
            }
        })
    }

    /// Notify every listener registered on this node.
    pub fn notify_nested_subs(&self) {
        let listeners = self.inner.state.borrow().listeners.clone();
        listeners.notify();
    }

    /// The stable callback this node registers upstream. Invoking it runs
    /// the `on_change` hook, if any.
    #[must_use]
    pub fn handle_change_wrapper(&self) -> Listener {
        Rc::clone(&self.inner.handle_change)
    }

    /// Replace the `on_change` hook.
    pub fn set_on_change(&self, hook: Option<Listener>) {
        *self.inner.on_change.borrow_mut() = hook;
    }

    /// The current `on_change` hook.
    #[must_use]
    pub fn on_change(&self) -> Option<Listener> {
        self.inner.on_change.borrow().clone()
    }

    /// Route upstream changes to this node's listeners.
    pub fn make_live(&self) {
        let node = Rc::downgrade(&self.inner);
        self.set_on_change(Some(Rc::new(move || {
            if let Some(inner) = node.upgrade() {
                Subscription { inner }.notify_nested_subs();
            }
        })));
    }

    /// Whether the node is attached upstream.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner.state.borrow().unsubscribe_from_upstream.is_some()
    }

    /// Pin the node and attach it upstream if it is not attached yet.
    ///
    /// An already attached node is not re-attached, but it is still pinned:
    /// it stays attached after its last nested registration goes away, until
    /// [`try_unsubscribe_self`](Self::try_unsubscribe_self) or
    /// [`try_unsubscribe`](Self::try_unsubscribe).
    pub fn try_subscribe(&self) {
        self.inner.state.borrow_mut().self_subscribed = true;
        self.attach();
    }

    /// Detach from upstream, clear the registry and install the sentinel.
    /// No-op when already detached.
    pub fn try_unsubscribe(&self) {
        let (unsubscribe, listeners) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(unsubscribe) = state.unsubscribe_from_upstream.take() else {
                return;
            };
            state.nested = 0;
            state.self_subscribed = false;
            let sentinel = ListenerCollection::detached().labeled(self.inner.label.clone());
            (unsubscribe, std::mem::replace(&mut state.listeners, sentinel))
        };
        unsubscribe.unsubscribe();
        listeners.clear();
        tracing::debug!(
            label = self.inner.label.as_deref(),
            root = self.is_root(),
            "subscription detached"
        );
    }

    /// Drop the pin set by [`try_subscribe`](Self::try_subscribe); detaches
    /// if no nested registrations remain.
    pub fn try_unsubscribe_self(&self) {
        let detach = {
            let mut state = self.inner.state.borrow_mut();
            std::mem::replace(&mut state.self_subscribed, false) && state.nested == 0
        };
        if detach {
            self.try_unsubscribe();
        }
    }

    /// The current registry: live while attached, the sentinel otherwise.
    #[must_use]
    pub fn get_listeners(&self) -> ListenerCollection {
        self.inner.state.borrow().listeners.clone()
    }

    /// The parent node, if this is not a root.
    #[must_use]
    pub fn parent(&self) -> Option<Subscription> {
        match &self.inner.upstream {
            Upstream::Parent(parent) => Some(parent.clone()),
            Upstream::Root(_) => None,
        }
    }

    /// The configured label.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Number of live registrations made through `add_nested_sub`.
    #[must_use]
    pub fn nested_count(&self) -> usize {
        self.inner.state.borrow().nested
    }

    /// Whether the node was pinned by an explicit `try_subscribe`.
    #[must_use]
    pub fn is_self_subscribed(&self) -> bool {
        self.inner.state.borrow().self_subscribed
    }

    /// Whether both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn is_root(&self) -> bool {
        matches!(self.inner.upstream, Upstream::Root(_))
    }

    fn attach(&self) {
        if self.is_subscribed() {
            return;
        }
        let handler = self.handle_change_wrapper();
        let unsubscribe = match &self.inner.upstream {
            Upstream::Parent(parent) => parent.add_nested_sub(handler),
            Upstream::Root(source) => source.subscribe(handler),
        };
        {
            let mut state = self.inner.state.borrow_mut();
            state.unsubscribe_from_upstream = Some(unsubscribe);
            state.listeners = ListenerCollection::with_batch(Rc::clone(&self.inner.batch))
                .labeled(self.inner.label.clone());
            state.generation += 1;
        }
        tracing::debug!(
            label = self.inner.label.as_deref(),
            root = self.is_root(),
            "subscription attached"
        );
    }

    fn release_nested(&self, generation: u64) {
        let detach = {
            let mut state = self.inner.state.borrow_mut();
            if state.generation != generation || state.unsubscribe_from_upstream.is_none() {
                return;
            }
            state.nested = state.nested.saturating_sub(1);
            state.nested == 0 && !state.self_subscribed
        };
        if detach {
            self.try_unsubscribe();
        }
    }
}
