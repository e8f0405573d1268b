//! The Change-Set Planner (spec §4.4) — the kernel of incrementality.
//!
//! Given a step's input tables, its transform keys `K`, and the step's
//! transform-meta table, produces the batched, priority-ordered sequence of
//! key tuples that need (re)processing.
//!
//! Grounded on `BaseBatchTransformStep._build_changed_idx_sql` /
//! `get_full_process_ids` / `get_change_list_process_ids`
//! (`examples/original_source/datapipe/core_steps.py`): a SQL full-outer
//! join of per-input `max(update_ts)` CTEs against the transform-meta
//! table, filtered to rows where the transform is stale, ordered by
//! `priority DESC NULLS LAST, key ASC`. This module re-expresses that join
//! as plain Rust aggregation over the in-memory row-meta tables.

use std::collections::HashMap;

use crate::catalog::DataTable;
use crate::change_list::ChangeList;
use crate::dataframe::IndexFrame;
use crate::error::EngineError;
use crate::run_config::RunConfig;
use crate::transform_meta::TransformMetaTable;
use crate::value::{Pk, PkValue};

/// One row of a per-input/combined key aggregate: a partial assignment of
/// transform-key columns to values, plus the maximum `update_ts` seen for
/// that assignment.
#[derive(Debug, Clone)]
struct AggRow {
    values: HashMap<String, PkValue>,
    update_ts: i64,
}

/// Validate the partial-PK distribution rule (spec §4.4): a transform key
/// must be present in exactly one input's PK or in all of them.
pub fn validate_partial_keys(
    step_name: &str,
    input_key_columns: &[Vec<String>],
    transform_keys: &[String],
) -> Result<(), EngineError> {
    let n = input_key_columns.len();
    for key in transform_keys {
        let count = input_key_columns.iter().filter(|cols| cols.contains(key)).count();
        if count != 1 && count != n {
            return Err(EngineError::UnsupportedPartialKey {
                step: step_name.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

fn present_keys(table_keys: &[String], transform_keys: &[String]) -> Vec<String> {
    transform_keys.iter().filter(|k| table_keys.contains(k)).cloned().collect()
}

/// Aggregate one input table's row-meta onto the subset of `transform_keys`
/// present in its own PK, grouping by those columns and taking `max(update_ts)`
/// (spec §4.4 "per-input aggregation"). `live_only` selects whether
/// tombstoned rows are excluded (the staleness aggregate) or included (the
/// "ever seen" aggregate used to detect fully-deleted keys).
fn input_aggregate(
    table: &DataTable,
    transform_keys: &[String],
    live_only: bool,
) -> Result<(Vec<String>, Vec<AggRow>), EngineError> {
    let table_keys = table.key_columns();
    let present = present_keys(&table_keys, transform_keys);
    let all_idx = table.get_all_idx()?;
    let ts_map = if live_only {
        table.get_update_ts(&all_idx)?
    } else {
        table.get_all_update_ts(&all_idx)?
    };

    let mut groups: HashMap<Vec<PkValue>, i64> = HashMap::new();
    for (pk, ts) in ts_map {
        let proj: Vec<PkValue> = present
            .iter()
            .map(|c| {
                let pos = table_keys.iter().position(|tc| tc == c).unwrap();
                pk[pos].clone()
            })
            .collect();
        groups
            .entry(proj)
            .and_modify(|e| *e = (*e).max(ts))
            .or_insert(ts);
    }

    let rows = groups
        .into_iter()
        .map(|(vals, update_ts)| AggRow {
            values: present.iter().cloned().zip(vals).collect(),
            update_ts,
        })
        .collect();

    Ok((present, rows))
}

/// Full outer join of two aggregates: equi-join on their shared columns, or
/// a cross product when they share none (spec §4.4: "if there are none,
/// the join is cross-product ... valid only for small dimension tables").
fn merge_aggregates(
    left_cols: &[String],
    left: Vec<AggRow>,
    right_cols: &[String],
    right: Vec<AggRow>,
) -> (Vec<String>, Vec<AggRow>) {
    if left.is_empty() {
        return (right_cols.to_vec(), right);
    }
    if right.is_empty() {
        return (left_cols.to_vec(), left);
    }

    let shared: Vec<String> = left_cols.iter().filter(|c| right_cols.contains(c)).cloned().collect();
    let merged_cols: Vec<String> = left_cols
        .iter()
        .cloned()
        .chain(right_cols.iter().filter(|c| !left_cols.contains(c)).cloned())
        .collect();

    if shared.is_empty() {
        let mut out = Vec::with_capacity(left.len() * right.len());
        for l in &left {
            for r in &right {
                let mut values = l.values.clone();
                values.extend(r.values.clone());
                out.push(AggRow {
                    values,
                    update_ts: l.update_ts.max(r.update_ts),
                });
            }
        }
        return (merged_cols, out);
    }

    let bucket_key = |row: &AggRow| -> Vec<PkValue> { shared.iter().map(|c| row.values[c].clone()).collect() };

    let mut left_buckets: HashMap<Vec<PkValue>, Vec<&AggRow>> = HashMap::new();
    for row in &left {
        left_buckets.entry(bucket_key(row)).or_default().push(row);
    }
    let mut right_buckets: HashMap<Vec<PkValue>, Vec<&AggRow>> = HashMap::new();
    for row in &right {
        right_buckets.entry(bucket_key(row)).or_default().push(row);
    }

    let mut out = Vec::new();
    let all_keys: std::collections::HashSet<Vec<PkValue>> =
        left_buckets.keys().chain(right_buckets.keys()).cloned().collect();

    for key in all_keys {
        match (left_buckets.get(&key), right_buckets.get(&key)) {
            (Some(ls), Some(rs)) => {
                for l in ls {
                    for r in rs {
                        let mut values = l.values.clone();
                        values.extend(r.values.clone());
                        out.push(AggRow {
                            values,
                            update_ts: l.update_ts.max(r.update_ts),
                        });
                    }
                }
            }
            (Some(ls), None) => out.extend(ls.iter().map(|l| (*l).clone())),
            (None, Some(rs)) => out.extend(rs.iter().map(|r| (*r).clone())),
            (None, None) => unreachable!(),
        }
    }

    (merged_cols, out)
}

/// Extract the full `K`-ordered PK tuple from an [`AggRow`], if it has a
/// value for every transform key. Rows missing a column (only possible in
/// the cross-cardinality edge case, spec §9) are dropped rather than
/// guessed at.
fn full_pk(row: &AggRow, transform_keys: &[String]) -> Option<Pk> {
    transform_keys.iter().map(|k| row.values.get(k).cloned()).collect()
}

/// One candidate awaiting a processing decision: its key tuple, the
/// input-side staleness signal, and the step's recorded priority.
struct Candidate {
    pk: Pk,
    priority: Option<i64>,
}

/// Build the full ordered candidate list for a step (spec §4.4, combining
/// `get_full_process_ids`'s SQL into in-memory aggregation).
fn compute_candidates(
    input_tables: &[&DataTable],
    transform_keys: &[String],
    transform_meta: &TransformMetaTable,
) -> Result<Vec<Candidate>, EngineError> {
    if input_tables.is_empty() {
        return Ok(Vec::new());
    }

    // Live staleness aggregate: max(update_ts) per key, over currently-live
    // input rows only.
    let mut live_cols: Vec<String> = Vec::new();
    let mut live_rows: Vec<AggRow> = Vec::new();
    for table in input_tables {
        let (cols, rows) = input_aggregate(table, transform_keys, true)?;
        let (c, r) = merge_aggregates(&live_cols, live_rows, &cols, rows);
        live_cols = c;
        live_rows = r;
    }

    // "Ever seen" aggregate (live + tombstoned) — used to detect keys whose
    // inputs have all disappeared (spec §4.4: deleted inputs still emit a
    // batch).
    let mut ever_cols: Vec<String> = Vec::new();
    let mut ever_rows: Vec<AggRow> = Vec::new();
    for table in input_tables {
        let (cols, rows) = input_aggregate(table, transform_keys, false)?;
        let (c, r) = merge_aggregates(&ever_cols, ever_rows, &cols, rows);
        ever_cols = c;
        ever_rows = r;
    }

    let live_pks: std::collections::HashSet<Pk> =
        live_rows.iter().filter_map(|r| full_pk(r, transform_keys)).collect();

    let transform_all_idx = transform_meta.get_all_idx()?;
    let transform_meta_rows = transform_meta.get_metadata(&transform_all_idx)?;

    let mut seen: std::collections::HashSet<Pk> = std::collections::HashSet::new();
    let mut candidates = Vec::new();

    for row in &live_rows {
        let Some(pk) = full_pk(row, transform_keys) else {
            continue;
        };
        if !seen.insert(pk.clone()) {
            continue;
        }
        let tm = transform_meta_rows.get(&pk);
        let stale = match tm {
            None => true,
            Some(m) if !m.is_success => true,
            Some(m) => row.update_ts > m.process_ts,
        };
        if stale {
            candidates.push(Candidate {
                pk,
                priority: tm.map(|m| m.priority),
            });
        }
    }

    // Deletion: a key previously processed successfully, seen by some
    // input at some point, but no longer live in any input.
    for row in &ever_rows {
        let Some(pk) = full_pk(row, transform_keys) else {
            continue;
        };
        if live_pks.contains(&pk) || !seen.insert(pk.clone()) {
            continue;
        }
        if let Some(m) = transform_meta_rows.get(&pk) {
            if m.is_success {
                candidates.push(Candidate {
                    pk,
                    priority: Some(m.priority),
                });
            }
        }
    }

    // Deterministic ordering is a correctness requirement for retry
    // convergence (spec §4.4): priority DESC NULLS LAST, key ASC.
    candidates.sort_by(|a, b| match (b.priority, a.priority) {
        (Some(bp), Some(ap)) => bp.cmp(&ap).then_with(|| a.pk.cmp(&b.pk)),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => a.pk.cmp(&b.pk),
    });

    Ok(candidates)
}

fn apply_run_config_key_filter(
    candidates: Vec<Candidate>,
    transform_keys: &[String],
    run_config: Option<&RunConfig>,
) -> Vec<Candidate> {
    let Some(rc) = run_config else {
        return candidates;
    };
    candidates
        .into_iter()
        .filter(|c| {
            rc.filters.iter().all(|(col, val)| {
                let Some(pos) = transform_keys.iter().position(|k| k == col) else {
                    return true;
                };
                c.pk[pos].matches_value(val)
            })
        })
        .collect()
}

fn batch(pks: Vec<Pk>, transform_keys: &[String], chunk_size: usize) -> (usize, Vec<IndexFrame>) {
    if pks.is_empty() {
        return (0, Vec::new());
    }
    let chunk_size = chunk_size.max(1);
    let batches: Vec<IndexFrame> = pks
        .chunks(chunk_size)
        .map(|c| IndexFrame::new(transform_keys.to_vec(), c.to_vec()))
        .collect();
    (batches.len(), batches)
}

/// Full-refresh planning (spec §4.4 `get_full_process_ids`): consult every
/// input's row-meta and the transform-meta table, return the batched
/// candidate set.
pub fn get_full_process_ids(
    input_tables: &[&DataTable],
    transform_keys: &[String],
    transform_meta: &TransformMetaTable,
    chunk_size: usize,
    run_config: Option<&RunConfig>,
) -> Result<(usize, Vec<IndexFrame>), EngineError> {
    let candidates = compute_candidates(input_tables, transform_keys, transform_meta)?;
    let candidates = apply_run_config_key_filter(candidates, transform_keys, run_config);
    let pks: Vec<Pk> = candidates.into_iter().map(|c| c.pk).collect();
    Ok(batch(pks, transform_keys, chunk_size))
}

/// Change-list planning (spec §4.4 `get_change_list_process_ids`):
/// intersect the change list with this step's input table names, project
/// onto `K`, dedup, batch. No meta consultation — purely mechanical.
pub fn get_change_list_process_ids(
    change_list: &ChangeList,
    input_table_names: &[String],
    transform_keys: &[String],
    chunk_size: usize,
) -> (usize, Vec<IndexFrame>) {
    let mut combined = IndexFrame::empty(transform_keys.to_vec());
    for name in input_table_names {
        if let Some(idx) = change_list.get(name) {
            let projected = idx.project(transform_keys);
            combined = combined.union(&projected);
        }
    }
    batch(combined.rows, transform_keys, chunk_size)
}
