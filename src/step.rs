//! Steps — the unit of incremental computation (spec §4.5/§6.2).
//!
//! A [`Step`] ties a user transform function to a set of input/output
//! tables and a transform-meta sidecar, and knows how to run itself in
//! full-refresh or change-list mode. Grounded on
//! `BaseBatchTransformStep`/`BatchTransformStep`/`BatchGenerate`
//! (`examples/original_source/datapipe/core_steps.py`).

use std::collections::HashSet;

use tracing::{debug, error, info, instrument, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::catalog::Catalog;
use crate::change_list::ChangeList;
use crate::dataframe::{DataFrame, IndexFrame};
use crate::error::EngineError;
use crate::executor::Executor;
use crate::planner;
use crate::run_config::RunConfig;
use crate::transform_meta::TransformMetaTable;
use crate::value::Column;

/// What a batch/generate transform function returns: one frame if the step
/// has a single output, or one frame per output otherwise (spec §6.3).
pub enum TransformResult {
    Single(DataFrame),
    Multi(Vec<DataFrame>),
}

impl TransformResult {
    pub(crate) fn into_vec(self, expected: usize) -> Result<Vec<DataFrame>, String> {
        match self {
            TransformResult::Single(df) => {
                if expected != 1 {
                    return Err(format!(
                        "transform returned a single frame but step has {expected} outputs"
                    ));
                }
                Ok(vec![df])
            }
            TransformResult::Multi(dfs) => {
                if dfs.len() != expected {
                    return Err(format!(
                        "transform returned {} frames, step has {expected} outputs",
                        dfs.len()
                    ));
                }
                Ok(dfs)
            }
        }
    }
}

/// `(input_df_1, …, input_df_m) -> output_df | (output_df_1, …, output_df_k)`
/// (spec §6.3 "batch transform"). Kwargs are expected to be captured by the
/// closure rather than threaded through — idiomatic in Rust, equivalent to
/// the Python original's `**kwargs`.
pub type BatchTransformFn = dyn Fn(&[DataFrame]) -> Result<TransformResult, String> + Send + Sync;

/// `() -> stream of output_df | (output_df_1, …)` (spec §6.3 "batch
/// generate"). Each element of the returned `Vec` is one emitted chunk.
pub type BatchGenerateFn = dyn Fn() -> Result<Vec<TransformResult>, String> + Send + Sync;

/// Derive the stable `name_<hex5>` step name (spec §6.5): a digest of
/// `(kind, declared name, input table names, output table names)` so the
/// same step always finds the same meta tables across processes.
pub fn derive_step_name(kind: &str, declared: &str, inputs: &[String], outputs: &[String]) -> String {
    let mut s = String::from(kind);
    s.push('\u{1}');
    s.push_str(declared);
    for i in inputs {
        s.push('\u{1}');
        s.push_str(i);
    }
    for o in outputs {
        s.push('\u{1}');
        s.push_str(o);
    }
    let digest = xxh3_64(s.as_bytes());
    format!("{declared}_{:05x}", digest & 0xF_FFFF)
}

/// Compute a step's default transform keys (spec §3): the intersection of
/// all input and all output PK column names. Also validates that equally
/// named keys share a column type across every participating table (spec
/// §6.1 "column types for equal-named keys ... must match").
pub fn default_transform_keys(
    step_name: &str,
    input_schemas: &[&[Column]],
    output_schemas: &[&[Column]],
) -> Result<Vec<String>, EngineError> {
    let mut names: Option<HashSet<String>> = None;
    for schema in input_schemas.iter().chain(output_schemas.iter()) {
        let set: HashSet<String> = schema.iter().map(|c| c.name.clone()).collect();
        names = Some(match names {
            None => set,
            Some(acc) => acc.intersection(&set).cloned().collect(),
        });
    }
    let names = names.unwrap_or_default();
    if names.is_empty() {
        return Err(EngineError::EmptyTransformKeys {
            step: step_name.to_string(),
        });
    }

    for name in &names {
        let mut ty = None;
        for schema in input_schemas.iter().chain(output_schemas.iter()) {
            if let Some(col) = schema.iter().find(|c| &c.name == name) {
                match ty {
                    None => ty = Some(col.ty),
                    Some(prev) if prev != col.ty => {
                        return Err(EngineError::TypeMismatch {
                            step: step_name.to_string(),
                            key: name.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }
    }

    let mut sorted: Vec<String> = names.into_iter().collect();
    sorted.sort();
    Ok(sorted)
}

/// A runnable step: knows how to plan and execute its own batches. Spec
/// §6.2's Step trait (`name`, `input_dts`, `output_dts`, `transform_keys`,
/// `get_full_process_ids`, `get_change_list_process_ids`, `process_batch`,
/// `run_full`, `run_changelist`, `fill_metadata`, `reset_metadata`).
pub trait Step: Send + Sync {
    fn name(&self) -> &str;
    fn input_tables(&self) -> &[String];
    fn output_tables(&self) -> &[String];
    fn labels(&self) -> &[(String, String)];

    fn run_full(
        &self,
        catalog: &Catalog,
        run_config: Option<&RunConfig>,
        executor: &dyn Executor,
        now: i64,
    ) -> Result<ChangeList, EngineError>;

    fn run_changelist(
        &self,
        catalog: &Catalog,
        change_list: &ChangeList,
        run_config: Option<&RunConfig>,
        executor: &dyn Executor,
        now: i64,
    ) -> Result<ChangeList, EngineError>;

    /// Pre-populate transform-meta for every currently-stale key, without
    /// running the transform (spec §4.3 `fill_metadata`).
    fn fill_metadata(&self, catalog: &Catalog, now: i64) -> Result<(), EngineError>;

    /// Force a full reprocess on the next run (spec §4.3 `reset_metadata`).
    fn reset_metadata(&self) -> Result<(), EngineError>;
}

/// The main incremental step: a batch transform over one or more inputs,
/// producing one or more outputs (spec §4.5 `BatchTransformStep`).
pub struct BatchTransformStep {
    name: String,
    input_tables: Vec<String>,
    output_tables: Vec<String>,
    transform_keys: Vec<String>,
    chunk_size: usize,
    labels: Vec<(String, String)>,
    func: Box<BatchTransformFn>,
    meta: TransformMetaTable,
}

impl BatchTransformStep {
    /// Build a step, deriving its transform keys from the catalog's
    /// declared schemas when `transform_keys` is `None` (spec §3 default).
    pub fn build(
        catalog: &Catalog,
        declared_name: &str,
        inputs: Vec<String>,
        outputs: Vec<String>,
        transform_keys: Option<Vec<String>>,
        chunk_size: usize,
        labels: Vec<(String, String)>,
        func: Box<BatchTransformFn>,
    ) -> Result<Self, EngineError> {
        if inputs.is_empty() {
            return Err(EngineError::ConstructionError(format!(
                "step '{declared_name}' declares no inputs; use a generate step for sources"
            )));
        }

        let name = derive_step_name("batch_transform", declared_name, &inputs, &outputs);

        let input_dts: Vec<_> = inputs.iter().map(|n| catalog.get(n)).collect::<Result<_, _>>()?;
        let output_dts: Vec<_> = outputs.iter().map(|n| catalog.get(n)).collect::<Result<_, _>>()?;

        let input_schemas: Vec<&[Column]> = input_dts.iter().map(|t| t.primary_schema()).collect();
        let output_schemas: Vec<&[Column]> = output_dts.iter().map(|t| t.primary_schema()).collect();

        let keys = match transform_keys {
            Some(k) => k,
            None => default_transform_keys(&name, &input_schemas, &output_schemas)?,
        };

        let input_key_sets: Vec<Vec<String>> = input_dts.iter().map(|t| t.key_columns()).collect();
        planner::validate_partial_keys(&name, &input_key_sets, &keys)?;

        for out in &output_dts {
            if out.is_read_only() {
                return Err(EngineError::ReadOnlyStore {
                    table: out.name().to_string(),
                });
            }
        }

        let key_schema: Vec<Column> = keys
            .iter()
            .map(|k| {
                input_schemas
                    .iter()
                    .chain(output_schemas.iter())
                    .find_map(|schema| schema.iter().find(|c| &c.name == k).cloned())
                    .expect("transform key resolved from participating schemas")
            })
            .collect();

        use crate::store::MemoryTableStore;
        let meta_store = MemoryTableStore::new(
            format!("{name}_meta"),
            key_schema,
            TransformMetaTable::meta_data_columns(),
        );
        let meta = TransformMetaTable::new(keys.clone(), Box::new(meta_store));

        Ok(BatchTransformStep {
            name,
            input_tables: inputs,
            output_tables: outputs,
            transform_keys: keys,
            chunk_size,
            labels,
            func,
            meta,
        })
    }

    fn input_refs<'c>(&self, catalog: &'c Catalog) -> Result<Vec<&'c crate::catalog::DataTable>, EngineError> {
        self.input_tables.iter().map(|n| catalog.get(n)).collect()
    }

    fn output_refs<'c>(&self, catalog: &'c Catalog) -> Result<Vec<&'c crate::catalog::DataTable>, EngineError> {
        self.output_tables.iter().map(|n| catalog.get(n)).collect()
    }

    #[instrument(skip_all, fields(step = %self.name))]
    fn run_batches(
        &self,
        catalog: &Catalog,
        batches: Vec<IndexFrame>,
        run_config: Option<&RunConfig>,
        executor: &dyn Executor,
        now: i64,
    ) -> Result<ChangeList, EngineError> {
        let inputs = self.input_refs(catalog)?;
        let outputs = self.output_refs(catalog)?;

        let results = executor.run_batches(&batches, &mut |batch| {
            crate::executor::process_batch(
                &self.name,
                &inputs,
                &self.input_tables,
                &outputs,
                &self.output_tables,
                &self.transform_keys,
                &self.func,
                &self.meta,
                batch,
                run_config,
                now,
            )
        });

        let mut merged = ChangeList::new();
        for r in results {
            merged.extend(r?);
        }
        Ok(merged)
    }
}

impl Step for BatchTransformStep {
    fn name(&self) -> &str {
        &self.name
    }
    fn input_tables(&self) -> &[String] {
        &self.input_tables
    }
    fn output_tables(&self) -> &[String] {
        &self.output_tables
    }
    fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    fn run_full(
        &self,
        catalog: &Catalog,
        run_config: Option<&RunConfig>,
        executor: &dyn Executor,
        now: i64,
    ) -> Result<ChangeList, EngineError> {
        info!(step = %self.name, "running step (full)");
        let inputs = self.input_refs(catalog)?;
        let (count, batches) =
            planner::get_full_process_ids(&inputs, &self.transform_keys, &self.meta, self.chunk_size, run_config)?;
        debug!(step = %self.name, batches = count, "planned batches");
        if count == 0 {
            return Ok(ChangeList::new());
        }
        self.run_batches(catalog, batches, run_config, executor, now)
    }

    fn run_changelist(
        &self,
        catalog: &Catalog,
        change_list: &ChangeList,
        run_config: Option<&RunConfig>,
        executor: &dyn Executor,
        now: i64,
    ) -> Result<ChangeList, EngineError> {
        info!(step = %self.name, "running step (changelist)");
        let (count, batches) = planner::get_change_list_process_ids(
            change_list,
            &self.input_tables,
            &self.transform_keys,
            self.chunk_size,
        );
        debug!(step = %self.name, batches = count, "planned changelist batches");
        if count == 0 {
            return Ok(ChangeList::new());
        }
        self.run_batches(catalog, batches, run_config, executor, now)
    }

    fn fill_metadata(&self, catalog: &Catalog, now: i64) -> Result<(), EngineError> {
        let inputs = self.input_refs(catalog)?;
        let (_, batches) =
            planner::get_full_process_ids(&inputs, &self.transform_keys, &self.meta, self.chunk_size, None)?;
        for batch in &batches {
            self.meta.insert_rows(batch)?;
        }
        let _ = now;
        Ok(())
    }

    fn reset_metadata(&self) -> Result<(), EngineError> {
        warn!(step = %self.name, "resetting transform metadata — next run reprocesses everything");
        self.meta.mark_all_rows_unprocessed()
    }
}

/// A source step: produces rows for its outputs from nothing (spec §6.3
/// "batch generate"). Has no inputs, so it only ever runs in full mode —
/// a generator has no upstream change list to key off of (spec §2: this
/// is `BatchGenerate`/`do_batch_generate`).
pub struct BatchGenerateStep {
    name: String,
    output_tables: Vec<String>,
    labels: Vec<(String, String)>,
    func: Box<BatchGenerateFn>,
}

impl BatchGenerateStep {
    pub fn new(declared_name: &str, outputs: Vec<String>, labels: Vec<(String, String)>, func: Box<BatchGenerateFn>) -> Self {
        let name = derive_step_name("batch_generate", declared_name, &[], &outputs);
        BatchGenerateStep {
            name,
            output_tables: outputs,
            labels,
            func,
        }
    }

    /// Run the generator, storing every emitted chunk, then tombstoning
    /// any previously-live row in each output that this pass never
    /// touched — spec §6.3: "stale rows not re-emitted in a pass are
    /// tombstoned".
    #[instrument(skip_all, fields(step = %self.name))]
    pub fn generate(&self, catalog: &Catalog, now: i64) -> Result<ChangeList, EngineError> {
        let outputs: Vec<_> = self.output_tables.iter().map(|n| catalog.get(n)).collect::<Result<_, _>>()?;
        let mut changes = ChangeList::new();
        let mut touched: Vec<IndexFrame> = outputs.iter().map(|o| IndexFrame::empty(o.key_columns())).collect();

        let chunks = (self.func)().map_err(|e| {
            error!(step = %self.name, error = %e, "generator failed");
            EngineError::TransformError {
                step: self.name.clone(),
                source: e,
            }
        })?;

        for chunk in chunks {
            let dfs = chunk
                .into_vec(outputs.len())
                .map_err(|e| EngineError::TransformError {
                    step: self.name.clone(),
                    source: e,
                })?;
            for (k, out) in outputs.iter().enumerate() {
                let res = out.store_chunk(&dfs[k], None, now)?;
                let touched_now = dfs[k].project_index(&out.key_columns());
                touched[k] = touched[k].union(&touched_now);
                changes.append(out.name(), res.diff.to_write());
            }
        }

        for (k, out) in outputs.iter().enumerate() {
            let stale = out.get_existing_idx(&out.get_all_idx()?)?.difference(&touched[k]);
            if !stale.is_empty() {
                let deleted = out.delete_by_idx(&stale, now)?;
                changes.append(out.name(), deleted);
            }
        }

        Ok(changes)
    }
}

impl Step for BatchGenerateStep {
    fn name(&self) -> &str {
        &self.name
    }
    fn input_tables(&self) -> &[String] {
        &[]
    }
    fn output_tables(&self) -> &[String] {
        &self.output_tables
    }
    fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    fn run_full(
        &self,
        catalog: &Catalog,
        _run_config: Option<&RunConfig>,
        _executor: &dyn Executor,
        now: i64,
    ) -> Result<ChangeList, EngineError> {
        self.generate(catalog, now)
    }

    /// A generator has no inputs to key a change list off of — it only
    /// ever participates in full runs (spec §6.3).
    fn run_changelist(
        &self,
        _catalog: &Catalog,
        _change_list: &ChangeList,
        _run_config: Option<&RunConfig>,
        _executor: &dyn Executor,
        _now: i64,
    ) -> Result<ChangeList, EngineError> {
        Ok(ChangeList::new())
    }

    fn fill_metadata(&self, _catalog: &Catalog, _now: i64) -> Result<(), EngineError> {
        Ok(())
    }

    fn reset_metadata(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
