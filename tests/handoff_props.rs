//! Property-based tests for the handoff slot
//!
//! Random sequences of slot operations are checked against a two-field
//! reference model, and a concurrent producer/consumer race is checked for
//! exactly-once delivery.
//!
//! Run with: cargo test --test handoff_props

use crabsurface::Handoff;
use proptest::prelude::*;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[derive(Debug, Clone)]
enum Op {
    Put(u32),
    Consume,
    Clear,
    Withdraw,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u32>().prop_map(Op::Put),
        4 => Just(Op::Consume),
        1 => Just(Op::Clear),
        1 => Just(Op::Withdraw),
    ]
}

/// Reference behaviour: one optional value, one optional consumer
#[derive(Default)]
struct Model {
    value: Option<u32>,
    consumer: Option<usize>,
    deliveries: Vec<(usize, u32)>,
}

impl Model {
    fn apply(&mut self, op: &Op, consumer_id: usize) {
        match op {
            Op::Put(v) => match self.consumer.take() {
                Some(id) => self.deliveries.push((id, *v)),
                None => self.value = Some(*v),
            },
            Op::Consume => match self.value.take() {
                Some(v) => self.deliveries.push((consumer_id, v)),
                None => self.consumer = Some(consumer_id),
            },
            Op::Clear => self.value = None,
            Op::Withdraw => self.consumer = None,
        }
    }
}

proptest! {
    /// Every delivery the slot makes is the one the model predicts
    #[test]
    fn slot_matches_reference_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let handoff = Handoff::new("prop");
        let deliveries = Arc::new(Mutex::new(Vec::new()));
        let mut model = Model::default();

        for (id, op) in ops.iter().enumerate() {
            model.apply(op, id);
            match op {
                Op::Put(v) => handoff.put(*v),
                Op::Consume => {
                    let sink = deliveries.clone();
                    handoff.consume(move |v: u32| sink.lock().unwrap().push((id, v)));
                }
                Op::Clear => {
                    handoff.clear();
                }
                Op::Withdraw => {
                    handoff.withdraw();
                }
            }

            prop_assert_eq!(handoff.has_pending_value(), model.value.is_some());
            prop_assert_eq!(handoff.has_waiting_consumer(), model.consumer.is_some());
        }

        prop_assert_eq!(&*deliveries.lock().unwrap(), &model.deliveries);
    }

    /// No consumer ever runs twice, whatever the sequence
    #[test]
    fn consumers_run_at_most_once(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let handoff = Handoff::new("prop");
        let deliveries = Arc::new(Mutex::new(Vec::new()));

        for (id, op) in ops.iter().enumerate() {
            match op {
                Op::Put(v) => handoff.put(*v),
                Op::Consume => {
                    let sink = deliveries.clone();
                    handoff.consume(move |_v: u32| sink.lock().unwrap().push(id));
                }
                Op::Clear => {
                    handoff.clear();
                }
                Op::Withdraw => {
                    handoff.withdraw();
                }
            }
        }

        let mut ids = deliveries.lock().unwrap().clone();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
    }

    /// With no consumer in between, only the last of several puts is delivered
    #[test]
    fn last_unconsumed_put_wins(values in prop::collection::vec(any::<u32>(), 1..16)) {
        let handoff = Handoff::new("prop");
        for v in &values {
            handoff.put(*v);
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        handoff.consume(move |v: u32| sink.lock().unwrap().push(v));

        prop_assert_eq!(&*seen.lock().unwrap(), &vec![*values.last().unwrap()]);
        prop_assert!(!handoff.has_pending_value());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A producer and a consumer racing on two threads meet exactly once
    #[test]
    fn concurrent_put_and_consume_deliver_once(value in any::<u32>(), consumer_first in any::<bool>()) {
        let handoff = Arc::new(Handoff::new("race"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let barrier = Arc::new(Barrier::new(2));

        let producer = {
            let handoff = handoff.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                handoff.put(value);
            })
        };

        let consumer = {
            let handoff = handoff.clone();
            let barrier = barrier.clone();
            let sink = seen.clone();
            thread::spawn(move || {
                if !consumer_first {
                    barrier.wait();
                }
                handoff.consume(move |v: u32| sink.lock().unwrap().push(v));
                if consumer_first {
                    barrier.wait();
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();

        prop_assert_eq!(&*seen.lock().unwrap(), &vec![value]);
        prop_assert!(!handoff.has_pending_value());
        prop_assert!(!handoff.has_waiting_consumer());
    }
}
