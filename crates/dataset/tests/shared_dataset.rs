//! Concurrency and index lifecycle tests for shared datasets.

use eddy_core::{DataType, Delta, Event, EventType, EventTypeBuilder, SharedEvent, Value};
use eddy_dataset::{
    AggregateColumn, AggregateFunction, DatasetRegistry, PredicateShape, Probe, WriterSpec,
};
use eddy_index::{KeyRange, KeyShape};
use eddy_window::{Window, WindowPolicy};
use std::sync::Arc;
use std::thread;

fn support_bean() -> Arc<EventType> {
    EventTypeBuilder::new("SupportBean")
        .unwrap()
        .field("theString", DataType::String)
        .unwrap()
        .field("intPrimitive", DataType::Int32)
        .unwrap()
        .field("longPrimitive", DataType::Int64)
        .unwrap()
        .build()
}

fn bean(ty: &Arc<EventType>, s: &str, i: i32, l: i64) -> SharedEvent {
    Arc::new(Event::new(ty.clone(), vec![s.into(), Value::Int32(i), Value::Int64(l)]).unwrap())
}

#[test]
fn test_three_writers_share_one_aggregation_table() {
    let ty = support_bean();
    let registry = DatasetRegistry::new();
    let table = registry
        .create_aggregate_table(
            "MyTable",
            ty.clone(),
            vec![
                AggregateColumn::new("window", AggregateFunction::Window, None),
                AggregateColumn::new("total", AggregateFunction::Sum, Some("intPrimitive")),
            ],
        )
        .unwrap();

    let workers: Vec<_> = (0..3)
        .map(|t| {
            let writer = registry
                .register_writer("MyTable", WriterSpec::new(format!("writer-{t}"), ty.clone()))
                .unwrap();
            let ty = ty.clone();
            thread::spawn(move || {
                let mut window = Window::new(WindowPolicy::Length { size: 3 }, &ty).unwrap();
                for i in 0..10 {
                    let event = bean(&ty, &format!("E{t}"), i, t);
                    let output = window.admit(event, 0).unwrap();
                    let deltas: Vec<_> = output
                        .inserted
                        .into_iter()
                        .map(Delta::insert)
                        .chain(output.expired.into_iter().map(Delta::delete))
                        .collect();
                    writer.contribute(&deltas).unwrap();
                }
                writer.contributed()
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), 3);
    }

    let snapshot = table.aggregate_snapshot().unwrap();
    let events = snapshot.get("window").unwrap().as_events().unwrap();
    assert_eq!(events.len(), 9);
    // each writer keeps intPrimitive 7, 8 and 9
    assert_eq!(
        snapshot.get("total").unwrap().as_scalar(),
        Some(&Value::Int64(3 * (7 + 8 + 9)))
    );
    assert_eq!(table.writer_count(), 0);
}

#[test]
fn test_concurrent_writers_keep_index_consistent() {
    let ty = support_bean();
    let registry = DatasetRegistry::new();
    let ds = registry
        .create_dataset("Beans", ty.clone(), WindowPolicy::KeepAll)
        .unwrap();
    let reader = ds
        .register_reader(PredicateShape::new(["theString"], Vec::<String>::new()))
        .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let writer = ds
                .register_writer(WriterSpec::new(format!("w{t}"), ty.clone()))
                .unwrap();
            let ty = ty.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    writer.insert(&[bean(&ty, &format!("S{}", i % 5), i, t)]).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(ds.len(), 200);
    for s in 0..5 {
        let rows = reader
            .lookup(&Probe::new(vec![format!("S{s}").into()], vec![]))
            .unwrap();
        assert_eq!(rows.len(), 40);
    }
}

#[test]
fn test_fifty_deleters_share_one_index() {
    let ty = support_bean();
    let registry = DatasetRegistry::new();
    let ds = registry
        .create_dataset("Beans", ty.clone(), WindowPolicy::KeepAll)
        .unwrap();
    for i in 0..100 {
        ds.insert(vec![format!("E{}", i % 10).into(), Value::Int32(i), Value::Int64(0)])
            .unwrap();
    }
    assert_eq!(ds.index_count(), 0);

    let shape = PredicateShape::new(["theString"], ["intPrimitive"]);
    let readers: Vec<_> = (0..50)
        .map(|_| registry.register_reader("Beans", shape.clone()).unwrap())
        .collect();
    let key = KeyShape::new(["theString"], Some("intPrimitive"));
    assert_eq!(ds.index_count(), 1);
    assert_eq!(ds.index_ref_count(&key), Some(50));

    // an equality-only reader is served by the ranged index as well
    let equality = registry
        .register_reader("Beans", PredicateShape::new(["theString"], Vec::<String>::new()))
        .unwrap();
    assert_eq!(ds.index_count(), 1);
    assert_eq!(ds.index_ref_count(&key), Some(51));

    let change = readers[0]
        .delete(&Probe::new(
            vec!["E3".into()],
            vec![KeyRange::lower_bound(Value::Int32(50), false)],
        ))
        .unwrap();
    assert_eq!(change.removed.len(), 5);
    assert_eq!(
        equality
            .lookup(&Probe::new(vec!["E3".into()], vec![]))
            .unwrap()
            .len(),
        5
    );

    assert!(registry.drop_dataset("Beans").is_err());
    drop(readers);
    assert_eq!(ds.index_ref_count(&key), Some(1));
    drop(equality);
    assert_eq!(ds.index_count(), 0);
    assert!(registry.drop_dataset("Beans").is_ok());
    assert!(registry.get("Beans").is_err());
}

#[test]
fn test_residual_range_terms_filter_rows() {
    let ty = support_bean();
    let ds = DatasetRegistry::new()
        .create_dataset("Beans", ty, WindowPolicy::KeepAll)
        .unwrap();
    for i in 0..10 {
        ds.insert(vec!["A".into(), Value::Int32(i), Value::Int64(i as i64 * 10)])
            .unwrap();
    }
    let reader = ds
        .register_reader(PredicateShape::new(["theString"], ["intPrimitive", "longPrimitive"]))
        .unwrap();
    let rows = reader
        .lookup(&Probe::new(
            vec!["A".into()],
            vec![
                KeyRange::bound(Value::Int32(2), Value::Int32(8), false, false),
                KeyRange::upper_bound(Value::Int64(50), true),
            ],
        ))
        .unwrap();
    let ints: Vec<_> = rows.iter().map(|r| r.get(1).cloned().unwrap()).collect();
    assert_eq!(ints, vec![Value::Int32(2), Value::Int32(3), Value::Int32(4)]);
}

#[test]
fn test_probe_type_mismatch_is_reported() {
    let ty = support_bean();
    let ds = DatasetRegistry::new()
        .create_dataset("Beans", ty, WindowPolicy::KeepAll)
        .unwrap();
    let reader = ds
        .register_reader(PredicateShape::new(["intPrimitive"], Vec::<String>::new()))
        .unwrap();
    let err = reader
        .lookup(&Probe::new(vec!["five".into()], vec![]))
        .unwrap_err();
    assert!(matches!(err, eddy_core::Error::TypeMismatch { .. }));
}

fn pair() -> Arc<EventType> {
    EventTypeBuilder::new("Pair")
        .unwrap()
        .field("id", DataType::Int32)
        .unwrap()
        .field("p00", DataType::String)
        .unwrap()
        .field("p01", DataType::String)
        .unwrap()
        .build()
}

#[test]
fn test_in_list_over_two_fields_unions_two_indexes() {
    let ds = DatasetRegistry::new()
        .create_dataset("Pairs", pair(), WindowPolicy::KeepAll)
        .unwrap();
    for (id, p00, p01) in [(1, "a", "b"), (2, "b", "a"), (3, "c", "a"), (4, "c", "d")] {
        ds.insert(vec![Value::Int32(id), p00.into(), p01.into()]).unwrap();
    }

    let mut reader = ds
        .register_reader(PredicateShape::default().with_in(["p00", "p01"]))
        .unwrap();
    assert_eq!(ds.index_count(), 2);
    assert_eq!(reader.index_shapes().len(), 2);

    // row 2 matches through both fields and is returned once
    let ids: Vec<_> = reader
        .lookup(&Probe::default().with_in(vec!["a".into()]))
        .unwrap()
        .iter()
        .map(|r| r.get(0).cloned().unwrap())
        .collect();
    assert_eq!(ids, vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]);

    assert!(reader
        .lookup(&Probe::default().with_in(vec![Value::Null]))
        .unwrap()
        .is_empty());
    assert!(reader.lookup(&Probe::default()).is_err());

    reader.release().unwrap();
    assert_eq!(ds.index_count(), 0);
}

#[test]
fn test_in_list_over_one_field_looks_up_each_value() {
    let ds = DatasetRegistry::new()
        .create_dataset("Pairs", pair(), WindowPolicy::KeepAll)
        .unwrap();
    for (id, p00) in [(1, "a"), (2, "b"), (3, "c"), (4, "a")] {
        ds.insert(vec![Value::Int32(id), p00.into(), "x".into()]).unwrap();
    }

    let reader = ds
        .register_reader(
            PredicateShape::new(Vec::<String>::new(), ["id"])
                .with_in(["p00"])
                .with_in(["p01"]),
        )
        .unwrap();
    assert_eq!(ds.index_count(), 1);

    let rows = reader
        .lookup(
            &Probe::new(vec![], vec![KeyRange::lower_bound(Value::Int32(2), true)])
                .with_in(vec!["a".into(), "c".into(), Value::Null, "a".into()])
                .with_in(vec!["x".into()]),
        )
        .unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.get(0).cloned().unwrap()).collect();
    assert_eq!(ids, vec![Value::Int32(3), Value::Int32(4)]);

    let none = reader
        .lookup(
            &Probe::new(vec![], vec![KeyRange::lower_bound(Value::Int32(0), true)])
                .with_in(vec!["a".into()])
                .with_in(vec!["y".into()]),
        )
        .unwrap();
    assert!(none.is_empty());

    drop(reader);
    assert_eq!(ds.index_count(), 0);
}
