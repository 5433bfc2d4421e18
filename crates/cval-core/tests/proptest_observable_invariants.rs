//! Property-based invariant tests for `Observable`.
//!
//! Random sequences of writes, in-place updates, subscriptions and detaches
//! must preserve:
//!
//! 1. `version` counts exactly the notifying mutations.
//! 2. Every live subscriber sees every notification, in registration order.
//! 3. A detached subscriber sees nothing after detaching.
//! 4. `get_versioned` agrees with `get` and `version`.

use std::sync::{Arc, Mutex};

use cval_core::{Observable, Subscription};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Set(u8),
    Bump,
    Subscribe,
    Detach(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..8).prop_map(Op::Set),
        2 => Just(Op::Bump),
        2 => Just(Op::Subscribe),
        1 => (0usize..8).prop_map(Op::Detach),
    ]
}

type Log = Arc<Mutex<Vec<(usize, u8)>>>;

struct Model {
    value: u8,
    version: u64,
    /// Subscriber ids still attached, in registration order.
    live: Vec<usize>,
    expected: Vec<(usize, u8)>,
}

// ═════════════════════════════════════════════════════════════════════════
// 1–4. Observable tracks a simple model
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn observable_matches_model(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let obs = Observable::new(0u8);
        let log: Log = Arc::default();
        let mut subs: Vec<Option<Subscription>> = Vec::new();
        let mut model = Model { value: 0, version: 0, live: Vec::new(), expected: Vec::new() };

        for op in &ops {
            match *op {
                Op::Set(v) => {
                    let changed = obs.set(v);
                    prop_assert_eq!(changed, v != model.value);
                    if changed {
                        model.value = v;
                        model.version += 1;
                        for &id in &model.live {
                            model.expected.push((id, v));
                        }
                    }
                }
                Op::Bump => {
                    obs.update(|v| *v = v.wrapping_add(1) % 8);
                    model.value = model.value.wrapping_add(1) % 8;
                    model.version += 1;
                    for &id in &model.live {
                        model.expected.push((id, model.value));
                    }
                }
                Op::Subscribe => {
                    let id = subs.len();
                    let sink = Arc::clone(&log);
                    subs.push(Some(obs.subscribe(move |v| sink.lock().unwrap().push((id, *v)))));
                    model.live.push(id);
                }
                Op::Detach(n) => {
                    if let Some(slot) = subs.get_mut(n) {
                        if let Some(sub) = slot.take() {
                            sub.unsubscribe();
                            model.live.retain(|&id| id != n);
                        }
                    }
                }
            }

            prop_assert_eq!(obs.get(), model.value);
            prop_assert_eq!(obs.version(), model.version);
            prop_assert_eq!(obs.get_versioned(), (model.value, model.version));
            prop_assert_eq!(obs.subscriber_count(), model.live.len());
        }

        let seen = log.lock().unwrap().clone();
        prop_assert_eq!(seen, model.expected);
    }
}
