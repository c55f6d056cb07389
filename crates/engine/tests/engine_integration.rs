//! End-to-end scenarios through the engine facade.

use eddy_core::{DataType, Error, EventTypeBuilder, Row, Value};
use eddy_dataset::{AggregateColumn, AggregateFunction, AggregateValue};
use eddy_engine::{Engine, EngineConfig, OnDemandSpec, StatementId, StatementSpec, StreamSpec};
use eddy_index::KeyShape;
use eddy_join::{CompareOp, Condition, JoinEdge, JoinKind};
use eddy_output::{DeliveredBatch, DeliveryDescriptor};
use eddy_window::WindowPolicy;
use std::sync::{Arc, Mutex};

fn engine() -> Engine {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine
        .register_event_type(
            EventTypeBuilder::new("SupportBean")
                .unwrap()
                .field("theString", DataType::String)
                .unwrap()
                .field("intPrimitive", DataType::Int32)
                .unwrap()
                .build(),
        )
        .unwrap();
    for (name, field) in [("SupportBean_S0", "p00"), ("SupportBean_S1", "p10")] {
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

fn collect(engine: &Engine, id: StatementId) -> Arc<Mutex<Vec<DeliveredBatch>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine
        .subscribe(id, move |batch| sink.lock().unwrap().push(batch.clone()))
        .unwrap();
    seen
}

fn bean(engine: &Engine, s: &str, i: i32) {
    engine.send("SupportBean", vec![s.into(), i.into()]).unwrap();
}

fn s0(engine: &Engine, id: i32, p00: impl Into<Value>) {
    engine.send("SupportBean_S0", vec![id.into(), p00.into()]).unwrap();
}

fn s1(engine: &Engine, id: i32, p10: &str) {
    engine.send("SupportBean_S1", vec![id.into(), p10.into()]).unwrap();
}

/// Slot ids of a row over the S0/S1 types.
fn ids(row: &Row) -> Vec<Option<i64>> {
    row.slots()
        .iter()
        .map(|s| s.as_ref().and_then(|e| e.get(0)).and_then(Value::as_i64))
        .collect()
}

fn strings(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|r| r.slot(0).and_then(|e| e.get(0)).and_then(Value::as_str).unwrap_or("").to_string())
        .collect()
}

#[test]
fn left_outer_join_retracts_and_replaces_null_rows() {
    let engine = engine();
    let id = engine
        .create_statement(
            StatementSpec::new("outer")
                .stream(StreamSpec::event_type("s0", "SupportBean_S0"))
                .stream(StreamSpec::event_type("s1", "SupportBean_S1"))
                .join(JoinEdge::new(
                    "s0",
                    JoinKind::Left,
                    "s1",
                    vec![Condition::equals("p00", "p10")],
                )),
        )
        .unwrap();
    let seen = collect(&engine, id);

    s0(&engine, 1, "A");
    s1(&engine, 2, "A");
    s1(&engine, 3, "B");
    s1(&engine, 4, "A");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].inserted.iter().map(ids).collect::<Vec<_>>(), vec![vec![Some(1), None]]);
    assert!(seen[0].removed.is_empty());
    assert_eq!(seen[1].inserted.iter().map(ids).collect::<Vec<_>>(), vec![vec![Some(1), Some(2)]]);
    assert_eq!(seen[1].removed.iter().map(ids).collect::<Vec<_>>(), vec![vec![Some(1), None]]);
    assert_eq!(seen[2].inserted.iter().map(ids).collect::<Vec<_>>(), vec![vec![Some(1), Some(4)]]);
    assert!(seen[2].removed.is_empty());
    assert_eq!(engine.rows(id).unwrap().len(), 2);
}

#[test]
fn grouped_delivery_splits_each_boundary() {
    let engine = engine();
    let id = engine
        .create_statement(
            StatementSpec::new("grouped")
                .stream(
                    StreamSpec::event_type("s0", "SupportBean")
                        .window(WindowPolicy::LengthBatch { size: 4 }),
                )
                .delivery(DeliveryDescriptor::grouped(["theString"])),
        )
        .unwrap();
    let seen = collect(&engine, id);

    for s in ["E1", "E2", "E1", "E1"] {
        bean(&engine, s, 0);
    }
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].group, Some(vec![Value::from("E1")]));
        assert_eq!(strings(&seen[0].inserted), vec!["E1", "E1", "E1"]);
        assert_eq!(seen[1].group, Some(vec![Value::from("E2")]));
        assert_eq!(strings(&seen[1].inserted), vec!["E2"]);
    }

    for s in ["E2", "E2", "E3", "E3"] {
        bean(&engine, s, 0);
    }
    let seen = seen.lock().unwrap();
    let groups: Vec<_> = seen[2..].iter().map(|b| b.group.clone().unwrap()).collect();
    assert_eq!(
        groups,
        vec![vec![Value::from("E2")], vec![Value::from("E3")], vec![Value::from("E1")]]
    );
    assert_eq!((seen[2].inserted.len(), seen[2].removed.len()), (2, 1));
    assert_eq!((seen[3].inserted.len(), seen[3].removed.len()), (2, 0));
    assert_eq!((seen[4].inserted.len(), seen[4].removed.len()), (0, 3));
}

#[test]
fn concurrent_writers_share_one_aggregation_table() {
    let engine = engine();
    let totals = engine
        .create_aggregate_table(
            "Totals",
            "SupportBean",
            vec![
                AggregateColumn::new("n", AggregateFunction::Count, None),
                AggregateColumn::new("total", AggregateFunction::Sum, Some("intPrimitive")),
                AggregateColumn::new("theEvents", AggregateFunction::Window, None),
            ],
        )
        .unwrap();
    let read = engine
        .create_on_demand(OnDemandSpec::read_table(
            "read",
            StreamSpec::event_type("s0", "SupportBean_S0"),
            "Totals",
            ["theEvents", "n"],
        ))
        .unwrap();
    let rows = collect(&engine, read);
    s0(&engine, 0, "before");
    // an empty window still answers with one row
    assert_eq!(rows.lock().unwrap()[0].inserted.len(), 1);
    assert!(rows.lock().unwrap()[0].inserted[0].is_null(1));
    for i in 0..3 {
        let key = format!("E{}", i);
        engine
            .create_statement(
                StatementSpec::new(format!("writer{}", i))
                    .stream(
                        StreamSpec::event_type("s0", "SupportBean")
                            .window(WindowPolicy::Length { size: 3 })
                            .filter("theString", CompareOp::Eq, key.as_str()),
                    )
                    .into_dataset("Totals"),
            )
            .unwrap();
    }
    assert_eq!(totals.writer_count(), 3);

    std::thread::scope(|scope| {
        for i in 0..3 {
            let engine = &engine;
            scope.spawn(move || {
                let key = format!("E{}", i);
                for v in 1..=5 {
                    bean(engine, &key, v);
                }
            });
        }
    });

    let snapshot = totals.aggregate_snapshot().unwrap();
    assert_eq!(snapshot.get("n").and_then(AggregateValue::as_scalar), Some(&Value::Int64(9)));
    assert_eq!(
        snapshot.get("total").and_then(AggregateValue::as_scalar),
        Some(&Value::Int64(36))
    );

    s0(&engine, 1, "after");
    let rows = rows.lock().unwrap();
    let read_rows = &rows[1].inserted;
    assert_eq!(read_rows.len(), 9);
    assert!(read_rows.iter().all(|r| r.derived() == [Value::Int64(9)]));
    let mut kept: Vec<(String, i32)> = read_rows
        .iter()
        .filter_map(|r| r.slot(1))
        .map(|e| {
            (
                e.get(0).and_then(Value::as_str).unwrap_or("").to_string(),
                e.get(1).and_then(Value::as_i64).unwrap_or(0) as i32,
            )
        })
        .collect();
    kept.sort();
    let expected: Vec<(String, i32)> = (0..3)
        .flat_map(|i| (3..=5).map(move |v| (format!("E{}", i), v)))
        .collect();
    assert_eq!(kept, expected);
    drop(rows);

    engine.destroy_statement(read).unwrap();
    assert_eq!(totals.reader_count(), 0);
}

#[test]
fn table_reads_reject_row_datasets_and_predicates() {
    let engine = engine();
    engine
        .create_dataset("W", "SupportBean", WindowPolicy::KeepAll)
        .unwrap();
    let totals = engine
        .create_aggregate_table(
            "Totals",
            "SupportBean",
            vec![
                AggregateColumn::new("a", AggregateFunction::Window, None),
                AggregateColumn::new("b", AggregateFunction::Window, None),
            ],
        )
        .unwrap();
    let trigger = || StreamSpec::event_type("s0", "SupportBean_S0");

    let from_rows = OnDemandSpec::read_table("r", trigger(), "W", ["a"]);
    assert!(matches!(engine.create_on_demand(from_rows), Err(Error::Config { .. })));
    let keyed = OnDemandSpec::read_table("r", trigger(), "Totals", ["a"]).equals("theString", "p00");
    assert!(engine.create_on_demand(keyed).is_err());
    let two_windows = OnDemandSpec::read_table("r", trigger(), "Totals", ["a", "b"]);
    assert!(engine.create_on_demand(two_windows).is_err());
    let unknown = OnDemandSpec::read_table("r", trigger(), "Totals", ["c"]);
    assert!(matches!(engine.create_on_demand(unknown), Err(Error::UnknownField { .. })));
    let select = OnDemandSpec::select("r", trigger(), "Totals", vec![]);
    assert!(engine.create_on_demand(select).is_err());

    assert_eq!(totals.reader_count(), 0);
}

#[test]
fn in_list_predicates_use_one_index_per_dataset_field() {
    let engine = engine();
    for (name, fields) in [("Pair_S0", ["p00", "p01"]), ("Pair_S1", ["p10", "p11"])] {
        engine
            .register_event_type(
                EventTypeBuilder::new(name)
                    .unwrap()
                    .field("id", DataType::Int32)
                    .unwrap()
                    .field(fields[0], DataType::String)
                    .unwrap()
                    .field(fields[1], DataType::String)
                    .unwrap()
                    .build(),
            )
            .unwrap();
    }
    let window = engine
        .create_dataset("MW", "Pair_S0", WindowPolicy::KeepAll)
        .unwrap();
    engine
        .create_statement(
            StatementSpec::new("feed")
                .stream(StreamSpec::event_type("s0", "Pair_S0"))
                .into_dataset("MW"),
        )
        .unwrap();
    for (id, p00, p01) in [(1, "a", "x"), (2, "b", "y"), (3, "c", "a")] {
        engine
            .send("Pair_S0", vec![id.into(), p00.into(), p01.into()])
            .unwrap();
    }
    let sum_of_ids = |name: &str| {
        OnDemandSpec::select(
            name,
            StreamSpec::event_type("s1", "Pair_S1"),
            "MW",
            vec![AggregateColumn::new("total", AggregateFunction::Sum, Some("id"))],
        )
    };
    let total = |seen: &Arc<Mutex<Vec<DeliveredBatch>>>| {
        seen.lock().unwrap().last().map(|b| b.inserted[0].derived().to_vec())
    };

    // p00 in (p10, p11): one index, one lookup per trigger value
    let field_in = engine
        .create_on_demand(sum_of_ids("field_in").field_in("p00", ["p10", "p11"]))
        .unwrap();
    assert_eq!(window.index_count(), 1);
    let seen = collect(&engine, field_in);
    engine
        .send("Pair_S1", vec![10.into(), "a".into(), "b".into()])
        .unwrap();
    assert_eq!(total(&seen), Some(vec![Value::Int64(3)]));
    engine.destroy_statement(field_in).unwrap();
    assert_eq!(window.index_count(), 0);

    // p10 in (p00, p01): one index per dataset field, results unioned
    let value_in = engine
        .create_on_demand(sum_of_ids("value_in").value_in("p10", ["p00", "p01"]))
        .unwrap();
    assert_eq!(window.index_count(), 2);
    let seen = collect(&engine, value_in);
    engine
        .send("Pair_S1", vec![11.into(), "a".into(), "zz".into()])
        .unwrap();
    assert_eq!(total(&seen), Some(vec![Value::Int64(4)]));
    engine.destroy_statement(value_in).unwrap();
    assert_eq!(window.index_count(), 0);
}

#[test]
fn fifty_on_demand_deleters_share_one_index() {
    let engine = engine();
    let window = engine
        .create_dataset("W", "SupportBean", WindowPolicy::KeepAll)
        .unwrap();
    let feed = engine
        .create_statement(
            StatementSpec::new("feed")
                .stream(StreamSpec::event_type("s0", "SupportBean"))
                .into_dataset("W"),
        )
        .unwrap();

    let deleters: Vec<StatementId> = (0..50)
        .map(|i| {
            engine
                .create_on_demand(
                    OnDemandSpec::delete(
                        format!("delete{}", i),
                        StreamSpec::event_type("s0", "SupportBean_S0"),
                        "W",
                    )
                    .equals("theString", "p00"),
                )
                .unwrap()
        })
        .collect();
    let shape = KeyShape::equality(["theString"]);
    assert_eq!(window.index_count(), 1);
    assert_eq!(window.index_ref_count(&shape), Some(50));

    let deleted = collect(&engine, deleters[0]);
    for s in ["E1", "E2", "E3"] {
        bean(&engine, s, 0);
    }
    assert_eq!(window.len(), 3);
    s0(&engine, 1, "E2");
    assert_eq!(window.len(), 2);
    assert_eq!(strings(&deleted.lock().unwrap()[0].inserted), vec!["E2"]);

    for id in deleters {
        engine.destroy_statement(id).unwrap();
    }
    assert_eq!(window.index_count(), 0);
    assert!(engine.drop_dataset("W").is_err());
    engine.destroy_statement(feed).unwrap();
    engine.drop_dataset("W").unwrap();
    assert!(matches!(engine.dataset("W"), Err(Error::UnknownDataset { .. })));
}

#[test]
fn dataset_inputs_see_commits_and_start_from_current_rows() {
    let engine = engine();
    engine
        .create_dataset("W", "SupportBean", WindowPolicy::Length { size: 2 })
        .unwrap();
    engine
        .create_statement(
            StatementSpec::new("feed")
                .stream(StreamSpec::event_type("s0", "SupportBean"))
                .into_dataset("W"),
        )
        .unwrap();
    let watch = engine
        .create_statement(StatementSpec::new("watch").stream(StreamSpec::dataset("w", "W")))
        .unwrap();
    let seen = collect(&engine, watch);

    for (s, i) in [("E1", 1), ("E2", 2), ("E3", 3)] {
        bean(&engine, s, i);
    }
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(strings(&seen[2].inserted), vec!["E3"]);
        assert_eq!(strings(&seen[2].removed), vec!["E1"]);
    }

    let late = engine
        .create_statement(StatementSpec::new("late").stream(StreamSpec::dataset("w", "W")))
        .unwrap();
    let late_seen = collect(&engine, late);
    let mut current = strings(&engine.rows(late).unwrap());
    current.sort();
    assert_eq!(current, vec!["E2", "E3"]);
    assert!(late_seen.lock().unwrap().is_empty());
}

#[test]
fn runtime_errors_stay_with_their_statement() {
    let engine = engine();
    let join = engine
        .create_statement(
            StatementSpec::new("join")
                .stream(StreamSpec::event_type("s0", "SupportBean_S0"))
                .stream(StreamSpec::event_type("s1", "SupportBean_S1"))
                .join(JoinEdge::new(
                    "s0",
                    JoinKind::Inner,
                    "s1",
                    vec![Condition::equals("p00", "p10")],
                )),
        )
        .unwrap();
    let all = engine
        .create_statement(StatementSpec::new("all").stream(StreamSpec::event_type("s0", "SupportBean_S0")))
        .unwrap();

    s0(&engine, 1, 5);
    s0(&engine, 2, "A");
    s1(&engine, 3, "A");

    let errors = engine.errors(join).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].statement, "join");
    assert!(matches!(errors[0].error, Error::TypeMismatch { .. }));
    assert_eq!(engine.rows(join).unwrap().len(), 1);
    assert_eq!(engine.rows(all).unwrap().len(), 2);
    assert!(engine.errors(all).unwrap().is_empty());
}

#[test]
fn empty_boundaries_are_delivered_only_on_request() {
    let engine = engine();
    let spec = |name: &str| {
        StatementSpec::new(name)
            .stream(
                StreamSpec::event_type("s0", "SupportBean_S0")
                    .window(WindowPolicy::TimeBatch { span_ms: 1000 }),
            )
            .stream(StreamSpec::event_type("s1", "SupportBean_S1"))
            .join(JoinEdge::new(
                "s0",
                JoinKind::Inner,
                "s1",
                vec![Condition::equals("p00", "p10")],
            ))
    };
    let quiet = engine.create_statement(spec("quiet")).unwrap();
    let chatty = engine.create_statement(spec("chatty").deliver_empty(true)).unwrap();
    let quiet_seen = collect(&engine, quiet);
    let chatty_seen = collect(&engine, chatty);

    s0(&engine, 1, "A");
    engine.advance_time(1000).unwrap();

    assert!(quiet_seen.lock().unwrap().is_empty());
    let chatty_seen = chatty_seen.lock().unwrap();
    assert_eq!(chatty_seen.len(), 1);
    assert!(chatty_seen[0].is_empty());
}

#[test]
fn engine_bootstraps_from_toml() {
    let config = EngineConfig::from_toml_str(
        r#"
        name = "bootstrap"
        initial_time = 500

        [[event_types]]
        name = "SupportBean"
        fields = [
            { name = "theString", type = "string" },
            { name = "intPrimitive", type = "int32" },
        ]

        [[datasets]]
        name = "MyWindow"
        event_type = "SupportBean"
        retention = { kind = "length", size = 3 }

        [[datasets]]
        name = "Totals"
        event_type = "SupportBean"
        aggregate = [{ name = "n", function = "count" }]
        "#,
    )
    .unwrap();
    let engine = Engine::new(config).unwrap();

    assert_eq!(engine.name(), "bootstrap");
    assert_eq!(engine.current_time(), 500);
    assert_eq!(engine.dataset_names(), vec!["MyWindow", "Totals"]);
    assert_eq!(
        engine.dataset("MyWindow").unwrap().retention(),
        &WindowPolicy::Length { size: 3 }
    );
    assert!(engine.dataset("Totals").unwrap().is_aggregate());
}

#[test]
fn failed_creation_leaves_nothing_registered() {
    let engine = engine();
    let window = engine
        .create_dataset("W", "SupportBean", WindowPolicy::KeepAll)
        .unwrap();

    let bad_order = StatementSpec::new("bad")
        .stream(StreamSpec::event_type("s0", "SupportBean"))
        .order_by(eddy_output::OrderKey::asc("missing"))
        .into_dataset("W");
    assert!(engine.create_statement(bad_order).is_err());

    let bad_trigger = OnDemandSpec::delete("bad", StreamSpec::event_type("s0", "SupportBean_S0"), "W")
        .equals("intPrimitive", "p00");
    assert!(matches!(
        engine.create_on_demand(bad_trigger),
        Err(Error::Config { .. })
    ));

    assert_eq!(window.writer_count(), 0);
    assert_eq!(window.reader_count(), 0);
    assert_eq!(window.index_count(), 0);
    assert!(engine.statement_names().is_empty());
    engine.drop_dataset("W").unwrap();
}
