//! Property tests through the engine facade.

use eddy_core::{DataType, EventTypeBuilder, RowKey, Value};
use eddy_engine::{Engine, EngineConfig, StatementSpec, StreamSpec};
use eddy_join::{Condition, JoinEdge, JoinKind};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn engine() -> Engine {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    for (name, field) in [("S0", "p00"), ("S1", "p10")] {
        engine
            .register_event_type(
                EventTypeBuilder::new(name)
                    .unwrap()
                    .field("id", DataType::Int32)
                    .unwrap()
                    .field(field, DataType::String)
                    .unwrap()
                    .build(),
            )
            .unwrap();
    }
    engine
}

#[derive(Clone, Debug)]
enum Op {
    S0(u8),
    S1(u8),
    Advance(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3).prop_map(Op::S0),
        (0u8..3).prop_map(Op::S1),
        (1i64..800).prop_map(Op::Advance),
    ]
}

fn kind() -> impl Strategy<Value = JoinKind> {
    prop_oneof![
        Just(JoinKind::Inner),
        Just(JoinKind::Left),
        Just(JoinKind::Right),
        Just(JoinKind::Full),
    ]
}

fn window() -> impl Strategy<Value = eddy_window::WindowPolicy> {
    use eddy_window::WindowPolicy;
    prop_oneof![
        Just(WindowPolicy::KeepAll),
        (1usize..4).prop_map(|size| WindowPolicy::Length { size }),
        (200i64..1000).prop_map(|span_ms| WindowPolicy::Time { span_ms }),
        (200i64..1000).prop_map(|span_ms| WindowPolicy::TimeBatch { span_ms }),
    ]
}

proptest! {
    #[test]
    fn deliveries_replay_to_current_result(
        kind in kind(),
        left in window(),
        right in window(),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let engine = engine();
        let id = engine
            .create_statement(
                StatementSpec::new("replay")
                    .stream(StreamSpec::event_type("a", "S0").window(left))
                    .stream(StreamSpec::event_type("b", "S1").window(right))
                    .join(JoinEdge::new("a", kind, "b", vec![Condition::equals("p00", "p10")])),
            )
            .unwrap();

        let replay: Arc<Mutex<BTreeMap<RowKey, i32>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let sink = replay.clone();
        engine
            .subscribe(id, move |batch| {
                let mut rows = sink.lock().unwrap();
                for row in &batch.removed {
                    *rows.entry(row.key()).or_insert(0) -= 1;
                }
                for row in &batch.inserted {
                    *rows.entry(row.key()).or_insert(0) += 1;
                }
            })
            .unwrap();

        let mut now = 0;
        for (n, op) in ops.into_iter().enumerate() {
            let event_id = Value::from(n as i32);
            match op {
                Op::S0(k) => {
                    engine.send("S0", vec![event_id, format!("K{}", k).into()]).unwrap();
                }
                Op::S1(k) => {
                    engine.send("S1", vec![event_id, format!("K{}", k).into()]).unwrap();
                }
                Op::Advance(step) => {
                    now += step;
                    engine.advance_time(now).unwrap();
                }
            }
        }

        let replayed: Vec<RowKey> = replay
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, count)| **count != 0)
            .map(|(key, count)| {
                assert_eq!(*count, 1, "row {:?} replayed {} times", key, count);
                key.clone()
            })
            .collect();
        let mut current: Vec<RowKey> = engine.rows(id).unwrap().iter().map(|r| r.key()).collect();
        current.sort();
        prop_assert_eq!(replayed, current);
        prop_assert!(engine.errors(id).unwrap().is_empty());
    }
}
