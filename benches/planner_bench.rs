//! Benchmarks for the change-set planner: the per-input aggregation and
//! full-outer-join that decide which keys need (re)processing.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use trickle_pipe::catalog::DataTable;
use trickle_pipe::dataframe::DataFrame;
use trickle_pipe::planner::get_full_process_ids;
use trickle_pipe::store::MemoryTableStore;
use trickle_pipe::transform_meta::TransformMetaTable;
use trickle_pipe::value::{Column, Value};

fn source_table(n_rows: usize) -> DataTable {
    let store = MemoryTableStore::new("src", vec![Column::text("id")], vec!["v".to_string()]);
    let dt = DataTable::new("src", Box::new(store));
    let rows = (0..n_rows)
        .map(|i| vec![Value::Text(format!("k{i}")), Value::Text(i.to_string())])
        .collect();
    dt.store_chunk(&DataFrame::from_rows(["id", "v"], rows), None, 1).unwrap();
    dt
}

fn transform_meta() -> TransformMetaTable {
    let store = MemoryTableStore::new(
        "tmeta",
        vec![Column::text("id")],
        TransformMetaTable::meta_data_columns(),
    );
    TransformMetaTable::new(vec!["id".to_string()], Box::new(store))
}

fn bench_full_process_ids_all_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner_full_process_ids_all_new");
    for n_rows in [10, 100, 1_000, 10_000] {
        let table = source_table(n_rows);
        let meta = transform_meta();
        group.bench_with_input(BenchmarkId::from_parameter(n_rows), &n_rows, |b, _| {
            b.iter(|| {
                get_full_process_ids(black_box(&[&table]), &["id".to_string()], &meta, 1_000, None).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_full_process_ids_already_processed(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner_full_process_ids_already_processed");
    for n_rows in [10, 100, 1_000, 10_000] {
        let table = source_table(n_rows);
        let meta = transform_meta();
        let all_idx = table.get_all_idx().unwrap();
        meta.mark_rows_processed_success(&all_idx, 2).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n_rows), &n_rows, |b, _| {
            b.iter(|| {
                get_full_process_ids(black_box(&[&table]), &["id".to_string()], &meta, 1_000, None).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_process_ids_all_new, bench_full_process_ids_already_processed);
criterion_main!(benches);
