#![forbid(unsafe_code)]

//! Nested change-subscription trees for FrankenTUI state.
//!
//! # Role in FrankenTUI
//! `ftui-subscription` sits between a state source (a [`Store`] or any
//! [`Source`]) and the widgets that read it. Each widget-level consumer owns
//! a [`Subscription`] node whose parent is the nearest ancestor consumer, so
//! a single state change propagates top-down through the tree.
//!
//! # Primary responsibilities
//! - **ListenerCollection**: ordered listener registry with O(1) removal that
//!   tolerates mutation during notification.
//! - **Subscription**: lazily attached node relaying upstream changes to its
//!   own listeners, including child nodes.
//! - **Batching**: every notification pass runs inside a [`Batch`]; the
//!   default opens a thread-local [`BatchScope`] so effects deferred during a
//!   fan-out flush once.
//!
//! # Ordering
//! For any node, every listener registered before a child's change handler
//! runs to completion before the child's own listeners start. Removing a
//! listener that has not been reached yet during a pass means it is skipped.
//!
//! # Example
//! ```ignore
//! use ftui_subscription::{Store, Subscription, listener};
//!
//! let store = Store::new(0);
//! let parent = Subscription::root(store.clone());
//! parent.make_live();
//!
//! let child = Subscription::nested(&parent);
//! child.make_live();
//! let handle = child.add_nested_sub(listener(|| println!("changed")));
//!
//! store.set(1); // prints "changed"
//! handle.unsubscribe(); // detaches child, then parent
//! ```
//!
//! # Threading
//! All types are `!Send`. A tree lives on the thread that built it.

pub mod batch;
pub mod error;
pub mod listener;
pub mod listeners;
pub mod store;
pub mod subscription;

pub use batch::{
    Batch, BatchScope, ImmediateBatch, ScopedBatch, SharedBatch, batch, defer, defer_once,
    is_batching,
};
pub use error::SubscriptionError;
pub use listener::{Listener, Source, SubscriptionGuard, Unsubscribe, listener};
pub use listeners::ListenerCollection;
pub use store::Store;
pub use subscription::{Subscription, SubscriptionConfig, Upstream};
