//! End-to-end scenarios (spec §8 "End-to-end scenarios" A–F), each built
//! from a fresh `Catalog` of `MemoryTableStore`-backed tables and driven
//! through `Driver`/`BatchTransformStep` exactly as an embedder would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use trickle_pipe::catalog::{Catalog, DataTable};
use trickle_pipe::change_list::ChangeList;
use trickle_pipe::dataframe::{DataFrame, IndexFrame};
use trickle_pipe::driver::Driver;
use trickle_pipe::executor::SingleThreadExecutor;
use trickle_pipe::step::{BatchTransformFn, BatchTransformStep, Step, TransformResult};
use trickle_pipe::store::MemoryTableStore;
use trickle_pipe::value::{Column, Value};

fn table(catalog: &mut Catalog, name: &str, key: Column, data_columns: &[&str]) {
    let store = MemoryTableStore::new(
        name,
        vec![key],
        data_columns.iter().map(|c| c.to_string()).collect(),
    );
    catalog.register(DataTable::new(name, Box::new(store)));
}

fn ingest(catalog: &Catalog, table_name: &str, rows: Vec<Vec<Value>>, columns: &[&str], now: i64) {
    let df = DataFrame::from_rows(columns.to_vec(), rows);
    catalog.get(table_name).unwrap().store_chunk(&df, None, now).unwrap();
}

fn upper_step(catalog: &Catalog) -> Box<dyn Step> {
    let func: Box<BatchTransformFn> = Box::new(|inputs: &[DataFrame]| {
        let df = &inputs[0];
        let rows = df
            .rows()
            .map(|row| {
                let upper = match &row[1] {
                    Value::Text(s) => Value::Text(s.to_uppercase()),
                    other => other.clone(),
                };
                vec![row[0].clone(), upper]
            })
            .collect();
        Ok(TransformResult::Single(DataFrame::from_rows(df.columns().to_vec(), rows)))
    });
    Box::new(
        BatchTransformStep::build(
            catalog,
            "upper",
            vec!["src".to_string()],
            vec!["dst".to_string()],
            None,
            100,
            vec![],
            func,
        )
        .unwrap(),
    )
}

// Scenario A — create/update/delete propagation.
#[test]
fn scenario_a_create_update_delete_propagation() {
    let mut catalog = Catalog::new();
    table(&mut catalog, "src", Column::text("id"), &["text"]);
    table(&mut catalog, "dst", Column::text("id"), &["text"]);
    let steps = vec![upper_step(&catalog)];
    let executor = SingleThreadExecutor;

    ingest(
        &catalog,
        "src",
        vec![
            vec![Value::Text("0".into()), Value::Text("a".into())],
            vec![Value::Text("1".into()), Value::Text("b".into())],
        ],
        &["id", "text"],
        100,
    );
    Driver::run(&catalog, &steps, &executor, None, 100).unwrap();

    let dst = catalog.get("dst").unwrap();
    let read = dst.read_rows(None).unwrap();
    assert_eq!(read.len(), 2);

    let src = catalog.get("src").unwrap();
    let id0 = IndexFrame::new(vec!["id".into()], vec![vec!["0".into()]]);
    let meta0 = src.meta().get_metadata(&id0).unwrap()[&vec!["0".into()]];
    assert_eq!(meta0.create_ts, meta0.update_ts);

    // Re-ingest identical rows: dst unchanged, update_ts unchanged, process_ts advances.
    ingest(
        &catalog,
        "src",
        vec![
            vec![Value::Text("0".into()), Value::Text("a".into())],
            vec![Value::Text("1".into()), Value::Text("b".into())],
        ],
        &["id", "text"],
        200,
    );
    Driver::run(&catalog, &steps, &executor, None, 200).unwrap();
    let meta0_again = src.meta().get_metadata(&id0).unwrap()[&vec!["0".into()]];
    assert_eq!(meta0_again.update_ts, meta0.update_ts);
    assert!(meta0_again.process_ts > meta0.process_ts);

    // Change id "1"'s text: dst[1] updates, src_meta[0] untouched in update_ts.
    ingest(
        &catalog,
        "src",
        vec![
            vec![Value::Text("0".into()), Value::Text("a".into())],
            vec![Value::Text("1".into()), Value::Text("c".into())],
        ],
        &["id", "text"],
        300,
    );
    Driver::run(&catalog, &steps, &executor, None, 300).unwrap();
    let id1 = IndexFrame::new(vec!["id".into()], vec![vec!["1".into()]]);
    let meta1 = src.meta().get_metadata(&id1).unwrap()[&vec!["1".into()]];
    assert_eq!(meta1.update_ts, 300);
    let meta0_unchanged = src.meta().get_metadata(&id0).unwrap()[&vec!["0".into()]];
    assert_eq!(meta0_unchanged.update_ts, meta0.update_ts);

    let dst_read = dst.read_rows(Some(&id1)).unwrap();
    assert_eq!(dst_read.get(0, "text"), Some(&Value::Text("C".into())));

    // Remove id "0": dst has only id "1"; both metas tombstoned.
    src.mark_rows_deleted(&id0, 400).unwrap();
    Driver::run(&catalog, &steps, &executor, None, 400).unwrap();
    let dst_final = dst.read_rows(None).unwrap();
    assert_eq!(dst_final.len(), 1);
    assert_eq!(dst_final.get(0, "id"), Some(&Value::Text("1".into())));
    assert!(src.meta().get_metadata(&id0).unwrap()[&vec!["0".into()]].delete_ts.is_some());
    assert!(dst.meta().get_metadata(&id0).unwrap()[&vec!["0".into()]].delete_ts.is_some());
}

// Scenario B — multi-input join.
#[test]
fn scenario_b_multi_input_join_sees_update_on_one_side() {
    let mut catalog = Catalog::new();
    table(&mut catalog, "a", Column::text("id"), &["x"]);
    table(&mut catalog, "b", Column::text("id"), &["y"]);
    table(&mut catalog, "out", Column::text("id"), &["sum"]);

    let func: Box<BatchTransformFn> = Box::new(|inputs: &[DataFrame]| {
        let (a, b) = (&inputs[0], &inputs[1]);
        let mut rows = Vec::new();
        for i in 0..a.len() {
            let id = a.get(i, "id").unwrap().clone();
            let x = match a.get(i, "x") {
                Some(Value::Int(n)) => *n,
                _ => 0,
            };
            let y = b
                .rows()
                .find(|r| r[0] == id)
                .and_then(|r| match &r[1] {
                    Value::Int(n) => Some(*n),
                    _ => None,
                })
                .unwrap_or(0);
            rows.push(vec![id, Value::Int(x + y)]);
        }
        Ok(TransformResult::Single(DataFrame::from_rows(["id", "sum"], rows)))
    });
    let step: Box<dyn Step> = Box::new(
        BatchTransformStep::build(
            &catalog,
            "pair",
            vec!["a".to_string(), "b".to_string()],
            vec!["out".to_string()],
            None,
            100,
            vec![],
            func,
        )
        .unwrap(),
    );
    let steps = vec![step];
    let executor = SingleThreadExecutor;

    ingest(&catalog, "a", vec![vec![Value::Text("0".into()), Value::Int(1)]], &["id", "x"], 10);
    ingest(&catalog, "b", vec![vec![Value::Text("0".into()), Value::Int(10)]], &["id", "y"], 10);
    Driver::run(&catalog, &steps, &executor, None, 10).unwrap();

    let out = catalog.get("out").unwrap();
    let id0 = IndexFrame::new(vec!["id".into()], vec![vec!["0".into()]]);
    assert_eq!(out.read_rows(Some(&id0)).unwrap().get(0, "sum"), Some(&Value::Int(11)));

    ingest(&catalog, "a", vec![vec![Value::Text("0".into()), Value::Int(2)]], &["id", "x"], 20);
    Driver::run(&catalog, &steps, &executor, None, 20).unwrap();
    assert_eq!(out.read_rows(Some(&id0)).unwrap().get(0, "sum"), Some(&Value::Int(12)));
}

// Scenario C — full-refresh reset.
#[test]
fn scenario_c_reset_metadata_forces_full_rewrite() {
    let mut catalog = Catalog::new();
    table(&mut catalog, "src", Column::text("id"), &["text"]);
    table(&mut catalog, "dst", Column::text("id"), &["text"]);
    let steps = vec![upper_step(&catalog)];
    let executor = SingleThreadExecutor;

    ingest(
        &catalog,
        "src",
        vec![vec![Value::Text("0".into()), Value::Text("a".into())]],
        &["id", "text"],
        100,
    );
    Driver::run(&catalog, &steps, &executor, None, 100).unwrap();

    let dst = catalog.get("dst").unwrap();
    let id0 = IndexFrame::new(vec!["id".into()], vec![vec!["0".into()]]);
    let update_ts_before = dst.meta().get_metadata(&id0).unwrap()[&vec!["0".into()]].update_ts;

    steps[0].reset_metadata().unwrap();
    Driver::run(&catalog, &steps, &executor, None, 200).unwrap();

    let meta_after = dst.meta().get_metadata(&id0).unwrap()[&vec!["0".into()]];
    assert_eq!(meta_after.update_ts, update_ts_before);
    assert_eq!(meta_after.process_ts, 200);
}

// Scenario D — retry after transform error.
#[test]
fn scenario_d_retry_after_transform_error() {
    let mut catalog = Catalog::new();
    table(&mut catalog, "src", Column::text("id"), &["text"]);
    table(&mut catalog, "dst", Column::text("id"), &["text"]);

    let should_fail = Arc::new(AtomicBool::new(true));
    let should_fail_inner = should_fail.clone();
    let func: Box<BatchTransformFn> = Box::new(move |inputs: &[DataFrame]| {
        let df = &inputs[0];
        for i in 0..df.len() {
            if df.get(i, "id") == Some(&Value::Text("5".into())) && should_fail_inner.load(Ordering::SeqCst) {
                return Err("id 5 is cursed".to_string());
            }
        }
        Ok(TransformResult::Single(df.clone()))
    });
    let step: Box<dyn Step> = Box::new(
        BatchTransformStep::build(
            &catalog,
            "maybe_fail",
            vec!["src".to_string()],
            vec!["dst".to_string()],
            None,
            100,
            vec![],
            func,
        )
        .unwrap(),
    );
    let steps = vec![step];
    let executor = SingleThreadExecutor;

    ingest(
        &catalog,
        "src",
        vec![
            vec![Value::Text("4".into()), Value::Text("d".into())],
            vec![Value::Text("5".into()), Value::Text("e".into())],
        ],
        &["id", "text"],
        100,
    );
    Driver::run(&catalog, &steps, &executor, None, 100).unwrap();

    // The whole batch containing "5" fails together (single-input, single
    // transform-key step groups both rows into one batch here), so nothing
    // in this call is marked successful yet — "4" is held back along with it.
    let dst = catalog.get("dst").unwrap();
    assert!(dst.read_rows(None).unwrap().is_empty());

    should_fail.store(false, Ordering::SeqCst);
    Driver::run(&catalog, &steps, &executor, None, 200).unwrap();

    let id5 = IndexFrame::new(vec!["id".into()], vec![vec!["5".into()]]);
    assert_eq!(dst.read_rows(Some(&id5)).unwrap().len(), 1);
    assert_eq!(dst.read_rows(None).unwrap().len(), 2);
}

// Scenario E — change-list cascade.
#[test]
fn scenario_e_change_list_cascade_touches_only_seeded_keys() {
    let mut catalog = Catalog::new();
    table(&mut catalog, "a", Column::text("id"), &["v"]);
    table(&mut catalog, "b", Column::text("id"), &["v"]);
    table(&mut catalog, "c", Column::text("id"), &["v"]);

    let identity: Box<BatchTransformFn> = Box::new(|dfs: &[DataFrame]| Ok(TransformResult::Single(dfs[0].clone())));
    let step_ab: Box<dyn Step> = Box::new(
        BatchTransformStep::build(&catalog, "a_to_b", vec!["a".to_string()], vec!["b".to_string()], None, 100, vec![], identity)
            .unwrap(),
    );
    let identity2: Box<BatchTransformFn> = Box::new(|dfs: &[DataFrame]| Ok(TransformResult::Single(dfs[0].clone())));
    let step_bc: Box<dyn Step> = Box::new(
        BatchTransformStep::build(&catalog, "b_to_c", vec!["b".to_string()], vec!["c".to_string()], None, 100, vec![], identity2)
            .unwrap(),
    );
    let steps = vec![step_ab, step_bc];
    let executor = SingleThreadExecutor;

    ingest(
        &catalog,
        "a",
        vec![
            vec![Value::Text("x".into()), Value::Text("1".into())],
            vec![Value::Text("y".into()), Value::Text("2".into())],
        ],
        &["id", "v"],
        100,
    );
    Driver::run(&catalog, &steps, &executor, None, 100).unwrap();

    // Mutate only "x" in "a", seed a change list with exactly that PK.
    ingest(&catalog, "a", vec![vec![Value::Text("x".into()), Value::Text("1-changed".into())]], &["id", "v"], 200);
    let mut seed = ChangeList::new();
    seed.append("a", IndexFrame::new(vec!["id".into()], vec![vec!["x".into()]]));

    let c_table = catalog.get("c").unwrap();
    let id_y = IndexFrame::new(vec!["id".into()], vec![vec!["y".into()]]);
    let y_process_ts_before = c_table.meta().get_metadata(&id_y).unwrap()[&vec!["y".into()]].process_ts;

    Driver::run_changelist(&catalog, &steps, &executor, seed, None, 200).unwrap();

    let id_x = IndexFrame::new(vec!["id".into()], vec![vec!["x".into()]]);
    assert_eq!(c_table.read_rows(Some(&id_x)).unwrap().get(0, "v"), Some(&Value::Text("1-changed".into())));
    let y_process_ts_after = c_table.meta().get_metadata(&id_y).unwrap()[&vec!["y".into()]].process_ts;
    assert_eq!(y_process_ts_before, y_process_ts_after);
}

// Scenario F — deletion via shrunk transform output.
#[test]
fn scenario_f_shrunk_output_tombstones_dropped_pks() {
    let mut catalog = Catalog::new();
    table(&mut catalog, "src", Column::text("group_id"), &["member"]);
    table(&mut catalog, "dst", Column::text("group_id"), &["member"]);

    // The transform only ever keeps rows whose member is "keep" — a
    // within-batch shrink independent of which src rows are live.
    let func: Box<BatchTransformFn> = Box::new(|inputs: &[DataFrame]| {
        let df = &inputs[0];
        let rows = df.rows().filter(|r| r[1] == Value::Text("keep".into())).collect();
        Ok(TransformResult::Single(DataFrame::from_rows(df.columns().to_vec(), rows)))
    });
    let step: Box<dyn Step> = Box::new(
        BatchTransformStep::build(&catalog, "filter_keep", vec!["src".to_string()], vec!["dst".to_string()], None, 100, vec![], func)
            .unwrap(),
    );
    let steps = vec![step];
    let executor = SingleThreadExecutor;

    // First pass: both groups pass the filter, so both land as live rows in
    // `dst` (and get a row-meta entry there) before either is ever dropped.
    ingest(
        &catalog,
        "src",
        vec![
            vec![Value::Text("g1".into()), Value::Text("keep".into())],
            vec![Value::Text("g2".into()), Value::Text("keep".into())],
        ],
        &["group_id", "member"],
        100,
    );
    Driver::run(&catalog, &steps, &executor, None, 100).unwrap();

    let dst = catalog.get("dst").unwrap();
    assert_eq!(dst.read_rows(None).unwrap().len(), 2);

    // Second pass: g2's member changes so the transform output shrinks from
    // 2 rows to 1 for this batch — the shrink this scenario is about.
    ingest(
        &catalog,
        "src",
        vec![
            vec![Value::Text("g1".into()), Value::Text("keep".into())],
            vec![Value::Text("g2".into()), Value::Text("drop".into())],
        ],
        &["group_id", "member"],
        200,
    );
    Driver::run(&catalog, &steps, &executor, None, 200).unwrap();

    let all = dst.read_rows(None).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all.get(0, "group_id"), Some(&Value::Text("g1".into())));

    let g2 = IndexFrame::new(vec!["group_id".into()], vec![vec!["g2".into()]]);
    assert!(dst.meta().get_metadata(&g2).unwrap()[&vec!["g2".into()]].delete_ts.is_some());
}
