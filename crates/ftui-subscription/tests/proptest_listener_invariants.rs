//! Property-based invariant tests for the listener registry.
//!
//! 1. After any sequence of subscribe/unsubscribe/notify, `get()` returns
//!    exactly the still-subscribed callbacks and a notification pass calls
//!    them, both in registration order.
//! 2. Unsubscribing the same handle repeatedly removes one listener.
//! 3. Listeners removed mid-pass are skipped only if not yet reached; every
//!    survivor is still called.
//! 4. Handles issued before `clear` never affect later registrations.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use ftui_subscription::{ImmediateBatch, Listener, ListenerCollection, Unsubscribe, listener};
use proptest::prelude::*;

type Log = Rc<RefCell<Vec<usize>>>;

fn registry() -> ListenerCollection {
    ListenerCollection::with_batch(Rc::new(ImmediateBatch))
}

fn recording_listener(log: &Log, id: usize) -> Listener {
    let log = Rc::clone(log);
    listener(move || log.borrow_mut().push(id))
}

fn recording(reg: &ListenerCollection, log: &Log, id: usize) -> Unsubscribe {
    reg.subscribe(recording_listener(log, id))
}

fn drain(log: &Log) -> Vec<usize> {
    std::mem::take(&mut *log.borrow_mut())
}

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Subscribe,
    /// Index into handles issued so far (modulo their count).
    Unsubscribe(usize),
    Notify,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Subscribe),
        2 => any::<usize>().prop_map(Op::Unsubscribe),
        1 => Just(Op::Notify),
    ]
}

fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 1..=max_len)
}

// ── Properties ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn snapshot_matches_model(ops in ops_strategy(64)) {
        let reg = registry();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut handles: Vec<(usize, Unsubscribe)> = Vec::new();
        let mut model: Vec<(usize, Listener)> = Vec::new();
        let mut next_id = 0usize;

        for op in ops {
            match op {
                Op::Subscribe => {
                    let callback = recording_listener(&log, next_id);
                    handles.push((next_id, reg.subscribe(Rc::clone(&callback))));
                    model.push((next_id, callback));
                    next_id += 1;
                }
                Op::Unsubscribe(i) => {
                    if !handles.is_empty() {
                        let (id, handle) = &handles[i % handles.len()];
                        handle.unsubscribe();
                        model.retain(|(m, _)| m != id);
                    }
                }
                Op::Notify => {
                    reg.notify();
                    let ids: Vec<usize> = model.iter().map(|(id, _)| *id).collect();
                    prop_assert_eq!(drain(&log), ids);
                }
            }
            prop_assert_eq!(reg.len(), model.len());
            let snapshot = reg.get();
            prop_assert_eq!(snapshot.len(), model.len());
            for (got, (_, expected)) in snapshot.iter().zip(&model) {
                prop_assert!(Rc::ptr_eq(got, expected));
            }
        }

        reg.notify();
        let ids: Vec<usize> = model.iter().map(|(id, _)| *id).collect();
        prop_assert_eq!(drain(&log), ids);
    }

    #[test]
    fn repeated_unsubscribe_is_idempotent(count in 1usize..=32, pick in any::<usize>(), repeats in 1usize..=5) {
        let reg = registry();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let handles: Vec<Unsubscribe> = (0..count).map(|id| recording(&reg, &log, id)).collect();

        let target = pick % count;
        for _ in 0..repeats {
            handles[target].clone().unsubscribe();
        }
        prop_assert_eq!(reg.len(), count - 1);

        reg.notify();
        let expected: Vec<usize> = (0..count).filter(|&id| id != target).collect();
        prop_assert_eq!(drain(&log), expected);
    }

    #[test]
    fn removal_during_notify_never_skips_survivors(
        count in 2usize..=24,
        killer_pick in any::<usize>(),
        targets in proptest::collection::btree_set(0usize..24, 0..=8),
    ) {
        let reg = registry();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let killer = killer_pick % count;
        let targets: BTreeSet<usize> = targets.into_iter().filter(|&t| t < count).collect();

        let slots: Rc<RefCell<Vec<Unsubscribe>>> = Rc::new(RefCell::new(Vec::new()));
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            if id == killer {
                let log = Rc::clone(&log);
                let slots = Rc::clone(&slots);
                handles.push(reg.subscribe(listener(move || {
                    log.borrow_mut().push(id);
                    for h in slots.borrow().iter() {
                        h.unsubscribe();
                    }
                })));
            } else {
                handles.push(recording(&reg, &log, id));
            }
        }
        slots.borrow_mut().extend(targets.iter().map(|&t| handles[t].clone()));

        reg.notify();
        let first_pass: Vec<usize> = (0..count)
            .filter(|&id| id <= killer || !targets.contains(&id))
            .collect();
        prop_assert_eq!(drain(&log), first_pass);

        reg.notify();
        let survivors: Vec<usize> = (0..count).filter(|id| !targets.contains(id)).collect();
        prop_assert_eq!(drain(&log), survivors);
        prop_assert_eq!(reg.len(), count - targets.len());
    }

    #[test]
    fn stale_handles_after_clear_are_inert(before in 1usize..=16, after in 1usize..=16) {
        let reg = registry();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let stale: Vec<Unsubscribe> = (0..before).map(|id| recording(&reg, &log, id)).collect();

        reg.clear();
        prop_assert!(reg.is_empty());

        let fresh: Vec<usize> = (0..after).map(|i| 1000 + i).collect();
        let _handles: Vec<Unsubscribe> = fresh.iter().map(|&id| recording(&reg, &log, id)).collect();
        for h in &stale {
            h.unsubscribe();
        }

        prop_assert_eq!(reg.len(), after);
        reg.notify();
        prop_assert_eq!(drain(&log), fresh);
    }
}
