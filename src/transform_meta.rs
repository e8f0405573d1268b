//! Per-step processing metadata (spec §3/§4.3) — tracks, for every
//! transform-key tuple a step has ever seen, whether the latest batch
//! succeeded, when it last ran, and its retry priority.
//!
//! Grounded on `datapipe.metastore.TransformMetaTable`
//! (`examples/original_source/datapipe/core_steps.py` references it as
//! `self.meta_table`): a row is "processed" once a batch covering it
//! completes (success or error); `process_ts` drives the stale predicate in
//! the planner, and `is_success=false` keeps a failed key in the candidate
//! set on the next run without needing a separate retry queue.

use std::collections::HashMap;

use crate::dataframe::{DataFrame, IndexFrame};
use crate::error::EngineError;
use crate::store::TableStore;
use crate::value::{Pk, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct TransformMeta {
    pub process_ts: i64,
    pub is_success: bool,
    pub error: Option<String>,
    pub priority: i64,
}

impl Default for TransformMeta {
    fn default() -> Self {
        TransformMeta {
            process_ts: 0,
            is_success: false,
            error: None,
            priority: 0,
        }
    }
}

const META_DATA_COLUMNS: [&str; 4] = ["process_ts", "is_success", "error", "priority"];

/// Wraps a sidecar [`TableStore`] keyed by a step's transform-key columns.
pub struct TransformMetaTable {
    key_columns: Vec<String>,
    store: Box<dyn TableStore>,
}

impl TransformMetaTable {
    pub fn new(key_columns: Vec<String>, store: Box<dyn TableStore>) -> Self {
        TransformMetaTable { key_columns, store }
    }

    pub fn meta_data_columns() -> Vec<String> {
        META_DATA_COLUMNS.iter().map(|s| s.to_string()).collect()
    }

    fn row_to_meta(values: &[Value]) -> TransformMeta {
        let process_ts = match &values[0] {
            Value::Int(i) => *i,
            _ => 0,
        };
        let is_success = matches!(values[1], Value::Bool(true));
        let error = match &values[2] {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        };
        let priority = match &values[3] {
            Value::Int(i) => *i,
            _ => 0,
        };
        TransformMeta {
            process_ts,
            is_success,
            error,
            priority,
        }
    }

    pub fn get_metadata(&self, idx: &IndexFrame) -> Result<HashMap<Pk, TransformMeta>, EngineError> {
        let df = self.store.read_rows(Some(idx))?;
        let mut out = HashMap::new();
        for i in 0..df.len() {
            let Some(pk) = df.pk_at(i, &self.key_columns) else {
                continue;
            };
            let values: Vec<Value> = META_DATA_COLUMNS
                .iter()
                .map(|c| df.get(i, c).cloned().unwrap_or(Value::Null))
                .collect();
            out.insert(pk, Self::row_to_meta(&values));
        }
        Ok(out)
    }

    /// All key tuples this step has ever recorded metadata for.
    pub fn get_all_idx(&self) -> Result<IndexFrame, EngineError> {
        let df = self.store.read_rows(None)?;
        Ok(df.project_index(&self.key_columns))
    }

    /// Key tuples recorded with `is_success = false`.
    pub fn get_error_idx(&self) -> Result<IndexFrame, EngineError> {
        let all = self.get_all_idx()?;
        let meta = self.get_metadata(&all)?;
        let rows = all
            .rows
            .into_iter()
            .filter(|pk| meta.get(pk).is_some_and(|m| !m.is_success))
            .collect();
        Ok(IndexFrame::new(self.key_columns.clone(), rows))
    }

    fn write_rows(&self, rows: Vec<(Pk, TransformMeta)>) -> Result<(), EngineError> {
        if rows.is_empty() {
            return Ok(());
        }
        let cols: Vec<String> = self
            .key_columns
            .iter()
            .cloned()
            .chain(META_DATA_COLUMNS.iter().map(|s| s.to_string()))
            .collect();
        let data = rows
            .into_iter()
            .map(|(pk, m)| {
                pk.into_iter()
                    .map(Value::from)
                    .chain([
                        Value::Int(m.process_ts),
                        Value::Bool(m.is_success),
                        m.error.map(Value::Text).unwrap_or(Value::Null),
                        Value::Int(m.priority),
                    ])
                    .collect()
            })
            .collect();
        self.store.update_rows(&DataFrame::from_rows(cols, data))
    }

    /// Record a successful batch (spec §4.3 `mark_rows_processed_success`).
    /// Priority is preserved across the update if the row already existed.
    pub fn mark_rows_processed_success(&self, idx: &IndexFrame, process_ts: i64) -> Result<(), EngineError> {
        if idx.is_empty() {
            return Ok(());
        }
        let existing = self.get_metadata(idx)?;
        let rows = idx
            .rows
            .iter()
            .map(|pk| {
                let priority = existing.get(pk).map(|m| m.priority).unwrap_or(0);
                (
                    pk.clone(),
                    TransformMeta {
                        process_ts,
                        is_success: true,
                        error: None,
                        priority,
                    },
                )
            })
            .collect();
        self.write_rows(rows)
    }

    /// Record a failed batch (spec §4.3 `mark_rows_processed_error`) — the
    /// keys stay in the metadata table with `is_success = false` so they
    /// re-enter the candidate set on the next run without a separate retry
    /// mechanism.
    pub fn mark_rows_processed_error(
        &self,
        idx: &IndexFrame,
        process_ts: i64,
        error: &str,
    ) -> Result<(), EngineError> {
        if idx.is_empty() {
            return Ok(());
        }
        let existing = self.get_metadata(idx)?;
        let rows = idx
            .rows
            .iter()
            .map(|pk| {
                let priority = existing.get(pk).map(|m| m.priority).unwrap_or(0);
                (
                    pk.clone(),
                    TransformMeta {
                        process_ts,
                        is_success: false,
                        error: Some(error.to_string()),
                        priority,
                    },
                )
            })
            .collect();
        self.write_rows(rows)
    }

    /// Pre-populate metadata rows with no process timestamp yet, so they
    /// are visible to `list --status`-style tooling before the first run
    /// touches them (spec §4.3 `insert_rows`, used by `fill_metadata`).
    /// Existing rows are left untouched.
    pub fn insert_rows(&self, idx: &IndexFrame) -> Result<(), EngineError> {
        if idx.is_empty() {
            return Ok(());
        }
        let existing = self.get_metadata(idx)?;
        let rows = idx
            .rows
            .iter()
            .filter(|pk| !existing.contains_key(*pk))
            .map(|pk| (pk.clone(), TransformMeta::default()))
            .collect();
        self.write_rows(rows)
    }

    /// Reset every row to unprocessed, forcing a full reprocess on the next
    /// run (spec §4.3 `mark_all_rows_unprocessed`, used by `reset_metadata`).
    /// Priorities are preserved.
    pub fn mark_all_rows_unprocessed(&self) -> Result<(), EngineError> {
        let all = self.get_all_idx()?;
        let existing = self.get_metadata(&all)?;
        let rows = all
            .rows
            .iter()
            .map(|pk| {
                let priority = existing.get(pk).map(|m| m.priority).unwrap_or(0);
                (
                    pk.clone(),
                    TransformMeta {
                        process_ts: 0,
                        is_success: false,
                        error: None,
                        priority,
                    },
                )
            })
            .collect();
        self.write_rows(rows)
    }

    /// Drop metadata for output keys no longer produced by the step (spec
    /// §4.5: deletion via shrunk transform output).
    pub fn delete_metadata(&self, idx: &IndexFrame) -> Result<(), EngineError> {
        self.store.delete_rows(idx)
    }

    pub fn get_metadata_size(&self) -> Result<usize, EngineError> {
        Ok(self.get_all_idx()?.len())
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTableStore;
    use crate::value::Column;

    fn meta_table() -> TransformMetaTable {
        let store = MemoryTableStore::new(
            "transform_meta__step",
            vec![Column::text("id")],
            TransformMetaTable::meta_data_columns(),
        );
        TransformMetaTable::new(vec!["id".to_string()], Box::new(store))
    }

    fn idx(ids: &[&str]) -> IndexFrame {
        IndexFrame::new(
            vec!["id".into()],
            ids.iter().map(|s| vec![(*s).into()]).collect(),
        )
    }

    #[test]
    fn success_then_error_overwrites_status() {
        let mt = meta_table();
        mt.mark_rows_processed_success(&idx(&["a"]), 100).unwrap();
        assert_eq!(mt.get_error_idx().unwrap().len(), 0);

        mt.mark_rows_processed_error(&idx(&["a"]), 200, "boom").unwrap();
        let errs = mt.get_error_idx().unwrap();
        assert_eq!(errs.len(), 1);
        assert_eq!(
            mt.get_metadata(&idx(&["a"])).unwrap()[&vec!["a".into()]].error,
            Some("boom".to_string())
        );
    }

    #[test]
    fn mark_all_rows_unprocessed_forces_full_rerun() {
        let mt = meta_table();
        mt.mark_rows_processed_success(&idx(&["a", "b"]), 100).unwrap();
        mt.mark_all_rows_unprocessed().unwrap();
        let meta = mt.get_metadata(&idx(&["a", "b"])).unwrap();
        assert!(meta.values().all(|m| !m.is_success && m.process_ts == 0));
    }

    #[test]
    fn insert_rows_does_not_clobber_existing() {
        let mt = meta_table();
        mt.mark_rows_processed_success(&idx(&["a"]), 100).unwrap();
        mt.insert_rows(&idx(&["a", "b"])).unwrap();
        let meta = mt.get_metadata(&idx(&["a", "b"])).unwrap();
        assert_eq!(meta[&vec!["a".into()]].process_ts, 100);
        assert_eq!(meta[&vec!["b".into()]].process_ts, 0);
    }

    #[test]
    fn delete_metadata_removes_only_named_keys() {
        let mt = meta_table();
        mt.mark_rows_processed_success(&idx(&["a", "b"]), 100).unwrap();
        mt.delete_metadata(&idx(&["a"])).unwrap();
        assert_eq!(mt.get_metadata_size().unwrap(), 1);
    }
}
