#![forbid(unsafe_code)]

//! Batching primitive for change propagation.
//!
//! A registry never schedules work itself; it hands its notification walk to
//! a [`Batch`] implementation. The default, [`ScopedBatch`], opens a
//! [`BatchScope`] around the walk. Effects the embedding layer schedules with
//! [`defer`] or [`defer_once`] while any scope is open are held back until the
//! outermost scope closes, so a root change that fans out through a deep
//! subscription tree produces a single flush.
//!
//! # Invariants
//!
//! 1. Scopes nest; only the outermost scope flushes.
//! 2. Deferred effects run in FIFO order, once each.
//! 3. Effects deferred while flushing run in the same flush.
//! 4. `defer_once` keeps the first effect queued under a key and drops later
//!    ones until the flush.
//! 5. A scope dropped during a panic discards its pending effects instead of
//!    running them.
//!
//! # Failure Modes
//!
//! - **Panicking effect**: propagates out of the scope's `drop`; effects
//!   queued behind it are discarded.

use std::cell::RefCell;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Executes a notification walk, possibly coalescing the effects it causes.
///
/// `batch` must run `work` synchronously, exactly once, before returning.
pub trait Batch {
    /// Run `work` inside this batching context.
    fn batch(&self, work: &mut dyn FnMut());
}

impl<F> Batch for F
where
    F: Fn(&mut dyn FnMut()),
{
    fn batch(&self, work: &mut dyn FnMut()) {
        self(work)
    }
}

/// Shared handle to a batching primitive.
pub type SharedBatch = Rc<dyn Batch>;

/// Runs work inside a thread-local [`BatchScope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedBatch;

impl Batch for ScopedBatch {
    fn batch(&self, work: &mut dyn FnMut()) {
        let _scope = BatchScope::new();
        work();
    }
}

/// Runs work directly with no scope. Deferred effects run immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateBatch;

impl Batch for ImmediateBatch {
    fn batch(&self, work: &mut dyn FnMut()) {
        work();
    }
}

type Effect = Box<dyn FnOnce()>;

#[derive(Default)]
struct BatchContext {
    depth: usize,
    queue: VecDeque<Effect>,
    keys: HashSet<u64>,
}

thread_local! {
    static CONTEXT: RefCell<BatchContext> = RefCell::new(BatchContext::default());
}

/// RAII guard marking a batch. Effects deferred while any guard is alive run
/// when the outermost guard drops.
#[must_use = "the batch closes as soon as the scope is dropped"]
pub struct BatchScope {
    // Thread-local state: the scope must drop on the thread that opened it.
    _not_send: PhantomData<Rc<()>>,
}

impl BatchScope {
    /// Open a (possibly nested) batch on the current thread.
    pub fn new() -> Self {
        CONTEXT.with(|ctx| ctx.borrow_mut().depth += 1);
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchScope")
            .field("depth", &depth())
            .finish()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let outermost = CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            ctx.depth = ctx.depth.saturating_sub(1);
            ctx.depth == 0
        });
        if !outermost {
            return;
        }
        if std::thread::panicking() {
            let dropped = CONTEXT.with(|ctx| {
                let mut ctx = ctx.borrow_mut();
                ctx.keys.clear();
                std::mem::take(&mut ctx.queue)
            });
            if !dropped.is_empty() {
                tracing::debug!(dropped = dropped.len(), "discarding deferred effects");
            }
            return;
        }
        flush();
    }
}

/// Drain the queue. Runs with depth 0, so anything the effects defer runs
/// immediately instead of queueing.
fn flush() {
    CONTEXT.with(|ctx| ctx.borrow_mut().keys.clear());
    let mut ran = 0usize;
    loop {
        let next = CONTEXT.with(|ctx| ctx.borrow_mut().queue.pop_front());
        let Some(effect) = next else { break };
        effect();
        ran += 1;
    }
    if ran > 0 {
        tracing::trace!(effects = ran, "batch flushed");
    }
}

/// Run `f` inside a batch and return its result.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _scope = BatchScope::new();
    f()
}

/// Whether a batch is currently open on this thread.
#[must_use]
pub fn is_batching() -> bool {
    depth() > 0
}

/// Current nesting depth of open batches on this thread.
#[must_use]
pub fn depth() -> usize {
    CONTEXT.with(|ctx| ctx.borrow().depth)
}

/// Run `effect` when the outermost open batch closes, or now if none is open.
pub fn defer(effect: impl FnOnce() + 'static) {
    let effect: Effect = Box::new(effect);
    let pending = CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        if ctx.depth == 0 {
            Some(effect)
        } else {
            ctx.queue.push_back(effect);
            None
        }
    });
    if let Some(effect) = pending {
        effect();
    }
}

/// Like [`defer`], but an effect whose `key` is already queued in the
/// current batch is dropped.
pub fn defer_once(key: u64, effect: impl FnOnce() + 'static) {
    let effect: Effect = Box::new(effect);
    let pending = CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        if ctx.depth == 0 {
            return Some(effect);
        }
        if ctx.keys.insert(key) {
            ctx.queue.push_back(effect);
        }
        None
    });
    if let Some(effect) = pending {
        effect();
    }
}
