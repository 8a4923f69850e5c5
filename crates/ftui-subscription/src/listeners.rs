#![forbid(unsafe_code)]

//! Ordered listener registry backed by a doubly-linked list.
//!
//! # Design
//!
//! [`ListenerCollection`] keeps its listeners in a linked chain of
//! `Rc<RefCell<ListenerNode>>`: `next` links are strong, `prev` links are
//! `Weak`, so the chain never forms a reference cycle. Appending and
//! unlinking are O(1) and touch only the affected node's neighbours.
//!
//! Notification walks the chain head to tail, cloning each callback out of
//! its node before calling it. No borrow is held while user code runs, so a
//! callback may subscribe or unsubscribe anything, including itself.
//!
//! ```text
//! first ──► [cb1] ──► [cb2] ──► [cb3] ◄── last
//!             ◄┄┄┄┄┄┄┄┄┄ ◄┄┄┄┄┄┄┄┄┄        (weak prev links)
//!
//! unsubscribe(cb2) during the walk, cursor on cb2:
//! first ──► [cb1] ──► [cb3] ◄── last
//!                     ▲
//!           [cb2] ────┘   cb2 keeps its own `next`, the walk continues
//! ```
//!
//! # Performance
//!
//! | Operation     | Complexity |
//! |---------------|------------|
//! | `subscribe()` | O(1)       |
//! | unsubscribe   | O(1)       |
//! | `notify()`    | O(L)       |
//! | `get()`       | O(L)       |
//! | `clear()`     | O(1)       |
//!
//! # Invariants
//!
//! 1. Walking `next` from `first` visits every linked node in registration
//!    order and ends at `last`.
//! 2. `len` equals the number of linked nodes.
//! 3. An unsubscribe handle unlinks its node at most once, and never after
//!    the registry was cleared (tracked by `epoch`).
//! 4. A node unlinked mid-walk keeps its `next`, so the walk still reaches
//!    every node that was not removed. Unlinked nodes are never called.
//! 5. Sequence numbers strictly increase along the chain. When a stale `next`
//!    runs out, the walk resumes at the first node appended after the last
//!    one it visited.
//!
//! # Failure Modes
//!
//! - **Panicking callback**: propagates out of `notify()`; listeners after it
//!   are not called for that pass. The chain itself stays consistent.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::batch::{ScopedBatch, SharedBatch};
use crate::error::SubscriptionError;
use crate::listener::{Listener, Unsubscribe};

type Link = Rc<RefCell<ListenerNode>>;

struct ListenerNode {
    callback: Listener,
    linked: bool,
    seq: u64,
    next: Option<Link>,
    prev: Option<Weak<RefCell<ListenerNode>>>,
}

// Unwind the strong `next` chain iteratively so long lists cannot overflow
// the stack on drop.
impl Drop for ListenerNode {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(link) = next {
            match Rc::try_unwrap(link) {
                Ok(cell) => {
                    let mut node = cell.into_inner();
                    next = node.next.take();
                }
                Err(_) => break,
            }
        }
    }
}

#[derive(Default)]
struct ListenerChain {
    first: Option<Link>,
    last: Option<Link>,
    len: usize,
    epoch: u64,
    next_seq: u64,
}

impl ListenerChain {
    fn unlink(&mut self, node: &Link) {
        let (prev, next) = {
            let mut n = node.borrow_mut();
            n.linked = false;
            (n.prev.as_ref().and_then(Weak::upgrade), n.next.clone())
        };
        match &next {
            Some(next) => next.borrow_mut().prev = prev.as_ref().map(Rc::downgrade),
            None => self.last = prev.clone(),
        }
        match &prev {
            Some(prev) => prev.borrow_mut().next = next,
            None => self.first = next,
        }
        self.len -= 1;
    }

    /// First linked node appended after `seq`, found by walking back from
    /// `last`. Linked nodes always have a live `prev`.
    fn first_after(&self, seq: u64) -> Option<Link> {
        let mut found = None;
        let mut cursor = self.last.clone();
        while let Some(node) = cursor {
            let prev = {
                let n = node.borrow();
                if n.seq <= seq {
                    break;
                }
                n.prev.as_ref().and_then(Weak::upgrade)
            };
            found = Some(node);
            cursor = prev;
        }
        found
    }
}

/// An ordered, reentrancy-safe collection of change listeners.
///
/// Cloning yields another handle to the **same** registry. A collection is
/// either *live* or the *detached* sentinel returned by
/// [`ListenerCollection::detached`]; the sentinel ignores `notify`, reports
/// no listeners and rejects registrations.
#[derive(Clone)]
pub struct ListenerCollection {
    chain: Option<Rc<RefCell<ListenerChain>>>,
    batch: SharedBatch,
    label: Option<Rc<str>>,
}

impl fmt::Debug for ListenerCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerCollection")
            .field("label", &self.label)
            .field("live", &self.is_live())
            .field("len", &self.len())
            .finish()
    }
}

impl Default for ListenerCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerCollection {
    /// Create an empty live registry notifying through [`ScopedBatch`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_batch(Rc::new(ScopedBatch))
    }

    /// Create an empty live registry notifying through `batch`.
    #[must_use]
    pub fn with_batch(batch: SharedBatch) -> Self {
        Self {
            chain: Some(Rc::new(RefCell::new(ListenerChain::default()))),
            batch,
            label: None,
        }
    }

    /// The detached sentinel.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            chain: None,
            batch: Rc::new(ScopedBatch),
            label: None,
        }
    }

    /// Attach a label reported in log events and errors.
    #[must_use]
    pub(crate) fn labeled(mut self, label: Option<Rc<str>>) -> Self {
        self.label = label;
        self
    }

    /// Whether this is a live registry rather than the detached sentinel.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.chain.is_some()
    }

    /// Number of linked listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.as_ref().map_or(0, |chain| chain.borrow().len)
    }

    /// Whether no listeners are linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `callback` at the tail.
    ///
    /// On the detached sentinel this logs a warning and returns an inert
    /// handle; use [`subscribe_checked`](Self::subscribe_checked) to observe
    /// that case as an error.
    pub fn subscribe(&self, callback: Listener) -> Unsubscribe {
        self.subscribe_checked(callback).unwrap_or_else(|err| {
            tracing::warn!(label = self.label.as_deref(), "{err}; listener dropped");
            Unsubscribe::noop()
        })
    }

    /// Append `callback` at the tail, failing on the detached sentinel.
    pub fn subscribe_checked(&self, callback: Listener) -> Result<Unsubscribe, SubscriptionError> {
        let Some(chain) = &self.chain else {
            return Err(SubscriptionError::Detached {
                label: self.label.as_deref().map(str::to_owned),
            });
        };

        let (epoch, node) = {
            let mut c = chain.borrow_mut();
            let seq = c.next_seq;
            c.next_seq += 1;
            let node = Rc::new(RefCell::new(ListenerNode {
                callback,
                linked: true,
                seq,
                next: None,
                prev: c.last.as_ref().map(Rc::downgrade),
            }));
            let prev_last = c.last.replace(Rc::clone(&node));
            match prev_last {
                Some(last) => last.borrow_mut().next = Some(Rc::clone(&node)),
                None => c.first = Some(Rc::clone(&node)),
            }
            c.len += 1;
            (c.epoch, Rc::downgrade(&node))
        };

        let chain = Rc::downgrade(chain);
        Ok(Unsubscribe::new(move || {
            let (Some(chain), Some(node)) = (chain.upgrade(), node.upgrade()) else {
                return;
            };
            let mut c = chain.borrow_mut();
            if c.first.is_none() || c.epoch != epoch || !node.borrow().linked {
                return;
            }
            c.unlink(&node);
        }))
    }

    /// Call every listener in registration order inside one batch.
    ///
    /// Listeners appended during the walk are reached in the same pass, even
    /// when the listener that appended them has just removed itself from the
    /// tail.
    pub fn notify(&self) {
        let Some(chain) = &self.chain else {
            return;
        };
        tracing::trace!(
            label = self.label.as_deref(),
            listeners = chain.borrow().len,
            "notify"
        );
        self.batch.batch(&mut || {
            let mut cursor = chain.borrow().first.clone();
            let mut visited: Option<u64> = None;
            loop {
                let node = match cursor.take() {
                    Some(node) => node,
                    None => {
                        let Some(seq) = visited else { break };
                        let resumed = chain.borrow().first_after(seq);
                        match resumed {
                            Some(node) => node,
                            None => break,
                        }
                    }
                };
                let callback = {
                    let n = node.borrow();
                    visited = Some(n.seq);
                    n.linked.then(|| Rc::clone(&n.callback))
                };
                if let Some(callback) = callback {
                    callback();
                }
                cursor = node.borrow().next.clone();
            }
        });
    }

    /// Snapshot of the linked listeners in registration order.
    #[must_use]
    pub fn get(&self) -> Vec<Listener> {
        let Some(chain) = &self.chain else {
            return Vec::new();
        };
        let chain = chain.borrow();
        let mut out = Vec::with_capacity(chain.len);
        let mut cursor = chain.first.clone();
        while let Some(node) = cursor {
            let n = node.borrow();
            out.push(Rc::clone(&n.callback));
            cursor = n.next.clone();
        }
        out
    }

    /// Forget every listener without running any unsubscribe handle.
    /// Outstanding handles become no-ops.
    pub fn clear(&self) {
        let Some(chain) = &self.chain else {
            return;
        };
        let old_first = {
            let mut c = chain.borrow_mut();
            c.last = None;
            c.len = 0;
            c.epoch += 1;
            c.first.take()
        };
        // Release the chain borrow before the old nodes drop.
        drop(old_first);
    }
}
