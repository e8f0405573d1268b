//! The Step Executor (spec §4.5) — runs a single planned batch through the
//! fetch → transform-or-delete → store → advance-meta state machine, and
//! the pluggable [`Executor`] abstraction that decides how a step's batches
//! are scheduled.
//!
//! Grounded on `BaseBatchTransformStep.process_batch`/`run_full`
//! (`examples/original_source/datapipe/core_steps.py`): per-batch failures
//! are contained (logged, recorded in transform meta as `is_success=false`)
//! rather than aborting the run, so one bad batch never blocks the rest.

use tracing::{debug, error, instrument, warn};

use crate::catalog::DataTable;
use crate::change_list::ChangeList;
use crate::dataframe::IndexFrame;
use crate::error::EngineError;
use crate::run_config::RunConfig;
use crate::step::BatchTransformFn;
use crate::transform_meta::TransformMetaTable;

/// Run exactly one planned batch end to end. Transform/output failures are
/// contained here: they're recorded in `meta` and logged, never propagated,
/// so a single bad batch doesn't abort the step (spec §7).
#[instrument(skip_all, fields(step = step_name, batch_size = batch.len()))]
#[allow(clippy::too_many_arguments)]
pub fn process_batch(
    step_name: &str,
    inputs: &[&DataTable],
    input_names: &[String],
    outputs: &[&DataTable],
    output_names: &[String],
    transform_keys: &[String],
    func: &BatchTransformFn,
    meta: &TransformMetaTable,
    batch: &IndexFrame,
    run_config: Option<&RunConfig>,
    now: i64,
) -> Result<ChangeList, EngineError> {
    let mut changes = ChangeList::new();

    let mut input_dfs = Vec::with_capacity(inputs.len());
    for (table, name) in inputs.iter().zip(input_names) {
        let idx = batch.project(&table.key_columns());
        let mut df = table.read_rows(Some(&idx)).map_err(|e| EngineError::InputFetchError {
            table: name.clone(),
            source: e.to_string(),
        })?;
        if let Some(rc) = run_config {
            for (col, val) in &rc.filters {
                if !transform_keys.contains(col) {
                    df = df.with_constant_column(col, val.clone());
                }
            }
        }
        input_dfs.push(df);
    }

    // Every input came back empty for this batch's keys: the upstream rows
    // that used to exist are gone, so the batch means "these outputs should
    // be deleted", not "run the transform on nothing" (spec §4.5).
    if !inputs.is_empty() && input_dfs.iter().all(|d| d.is_empty()) {
        debug!(step = step_name, "all inputs empty for batch, deleting outputs");
        for (out, name) in outputs.iter().zip(output_names) {
            let idx = batch.project(&out.key_columns());
            let deleted = out.delete_by_idx(&idx, now)?;
            changes.append(name, deleted);
        }
        meta.mark_rows_processed_success(batch, now)?;
        return Ok(changes);
    }

    let dfs = match (func)(&input_dfs) {
        Ok(result) => match result.into_vec(outputs.len()) {
            Ok(dfs) => dfs,
            Err(e) => {
                error!(step = step_name, error = %e, "transform returned wrong output arity");
                meta.mark_rows_processed_error(batch, now, &e)?;
                return Ok(changes);
            }
        },
        Err(e) => {
            warn!(step = step_name, error = %e, "transform failed, batch stays a candidate");
            meta.mark_rows_processed_error(batch, now, &e)?;
            return Ok(changes);
        }
    };

    for ((out, name), df) in outputs.iter().zip(output_names).zip(dfs.iter()) {
        let processed_idx = batch.project(&out.key_columns());
        match out.store_chunk(df, Some(&processed_idx), now) {
            Ok(res) => changes.append(name, res.changed_pks(&out.key_columns())),
            Err(e) => {
                error!(step = step_name, table = %name, error = %e, "output write failed");
                meta.mark_rows_processed_error(batch, now, &e.to_string())?;
                return Ok(changes);
            }
        }
    }

    meta.mark_rows_processed_success(batch, now)?;
    Ok(changes)
}

/// Decides how a step's planned batches are scheduled. The engine core only
/// ever needs sequential execution ([`SingleThreadExecutor`]); the trait
/// exists so embedders can substitute their own scheduling (a thread pool, a
/// work queue) without touching the planner or the per-batch state machine.
pub trait Executor: Send + Sync {
    fn run_batches(
        &self,
        batches: &[IndexFrame],
        process: &mut dyn FnMut(&IndexFrame) -> Result<ChangeList, EngineError>,
    ) -> Vec<Result<ChangeList, EngineError>>;
}

/// Runs a step's batches one at a time, in planner order. The default and
/// only executor this crate ships (spec §9: concurrent backends are a
/// REDESIGN FLAG, not a committed feature).
pub struct SingleThreadExecutor;

impl Executor for SingleThreadExecutor {
    fn run_batches(
        &self,
        batches: &[IndexFrame],
        process: &mut dyn FnMut(&IndexFrame) -> Result<ChangeList, EngineError>,
    ) -> Vec<Result<ChangeList, EngineError>> {
        batches.iter().map(|b| process(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::DataFrame;
    use crate::store::MemoryTableStore;
    use crate::step::TransformResult;
    use crate::value::{Column, Value};

    fn table(name: &str) -> DataTable {
        DataTable::new(
            name,
            Box::new(MemoryTableStore::new(name, vec![Column::text("id")], vec!["v".to_string()])),
        )
    }

    fn tmeta() -> TransformMetaTable {
        let store = MemoryTableStore::new(
            "tmeta",
            vec![Column::text("id")],
            TransformMetaTable::meta_data_columns(),
        );
        TransformMetaTable::new(vec!["id".to_string()], Box::new(store))
    }

    fn idx(ids: &[&str]) -> IndexFrame {
        IndexFrame::new(vec!["id".into()], ids.iter().map(|s| vec![(*s).into()]).collect())
    }

    #[test]
    fn successful_batch_stores_output_and_marks_success() {
        let src = table("src");
        let df = DataFrame::from_rows(["id", "v"], vec![vec![Value::Text("a".into()), Value::Text("1".into())]]);
        src.store_chunk(&df, None, 100).unwrap();

        let dst = table("dst");
        let meta = tmeta();
        let func: Box<BatchTransformFn> = Box::new(|dfs: &[DataFrame]| Ok(TransformResult::Single(dfs[0].clone())));

        let changes = process_batch(
            "step",
            &[&src],
            &["src".to_string()],
            &[&dst],
            &["dst".to_string()],
            &["id".to_string()],
            &func,
            &meta,
            &idx(&["a"]),
            None,
            200,
        )
        .unwrap();

        assert_eq!(dst.read_rows(None).unwrap().len(), 1);
        assert_eq!(meta.get_error_idx().unwrap().len(), 0);
        assert!(changes.get("dst").unwrap().contains(&vec!["a".into()]));
    }

    #[test]
    fn transform_error_is_contained_and_recorded() {
        let src = table("src");
        let df = DataFrame::from_rows(["id", "v"], vec![vec![Value::Text("a".into()), Value::Text("1".into())]]);
        src.store_chunk(&df, None, 100).unwrap();

        let dst = table("dst");
        let meta = tmeta();
        let func: Box<BatchTransformFn> = Box::new(|_: &[DataFrame]| Err("boom".to_string()));

        let changes = process_batch(
            "step",
            &[&src],
            &["src".to_string()],
            &[&dst],
            &["dst".to_string()],
            &["id".to_string()],
            &func,
            &meta,
            &idx(&["a"]),
            None,
            200,
        )
        .unwrap();

        assert!(changes.is_empty());
        assert_eq!(meta.get_error_idx().unwrap().len(), 1);
    }

    #[test]
    fn all_inputs_empty_deletes_existing_output() {
        let src = table("src");
        let dst = table("dst");
        let out_df = DataFrame::from_rows(["id", "v"], vec![vec![Value::Text("a".into()), Value::Text("1".into())]]);
        dst.store_chunk(&out_df, None, 50).unwrap();

        let meta = tmeta();
        let func: Box<BatchTransformFn> = Box::new(|dfs: &[DataFrame]| Ok(TransformResult::Single(dfs[0].clone())));

        let changes = process_batch(
            "step",
            &[&src],
            &["src".to_string()],
            &[&dst],
            &["dst".to_string()],
            &["id".to_string()],
            &func,
            &meta,
            &idx(&["a"]),
            None,
            200,
        )
        .unwrap();

        assert!(dst.get_existing_idx(&idx(&["a"])).unwrap().is_empty());
        assert!(changes.get("dst").unwrap().contains(&vec!["a".into()]));
    }
}
