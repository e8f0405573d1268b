//! Row-level change metadata (spec §3) — per-row content hash plus
//! create/update/process/delete timestamps, used to diff an incoming chunk
//! against what was last seen and to decide which rows are stale for a step.
//!
//! Grounded on `datapipe.datatable.DataTable.store_chunk` /
//! `get_changes_for_store_chunk` (`examples/original_source/datapipe/datatable.py`
//! and the older `c12n_pipe/datatable.py`): on every ingest, rows are
//! hashed, compared against the last known hash, and classified as new,
//! changed, or unchanged; rows previously seen but absent from the chunk are
//! left alone unless the caller explicitly reconciles a full scan.

use std::collections::HashMap;

use crate::dataframe::{DataFrame, IndexFrame};
use crate::error::EngineError;
use crate::hash::row_hash;
use crate::store::TableStore;
use crate::value::{Pk, Value};

/// One row's change-tracking record (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowMeta {
    pub hash: u64,
    pub create_ts: i64,
    pub update_ts: i64,
    pub process_ts: i64,
    pub delete_ts: Option<i64>,
}

impl RowMeta {
    /// Invariant 1 (spec §8): `create_ts <= update_ts <= process_ts` while live.
    pub fn is_well_ordered(&self) -> bool {
        if self.delete_ts.is_some() {
            return true;
        }
        self.create_ts <= self.update_ts && self.update_ts <= self.process_ts
    }
}

/// Result of diffing an incoming chunk against stored row metadata
/// (spec §4.2 `get_changes_for_store_chunk`, collapsed to the two index
/// sets callers actually need: `store_chunk` on the `TableStore` and the
/// row-meta write happen together here, so the four-frame split of the
/// Python original is not separately observable).
#[derive(Debug, Clone, Default)]
pub struct StoreChunkDiff {
    /// PKs in the chunk that are brand new (no prior meta row).
    pub new_rows: IndexFrame,
    /// PKs in the chunk whose content hash differs from the stored one.
    pub changed_rows: IndexFrame,
    /// PKs in the chunk whose content hash is unchanged since last store.
    pub unchanged_rows: IndexFrame,
}

impl StoreChunkDiff {
    /// New + changed rows — the set that actually needs a data write.
    pub fn to_write(&self) -> IndexFrame {
        self.new_rows.union(&self.changed_rows)
    }
}

const META_DATA_COLUMNS: [&str; 5] = ["hash", "create_ts", "update_ts", "process_ts", "delete_ts"];

/// Wraps a sidecar [`TableStore`] (keyed by the same PK columns as the data
/// table it shadows) to hold [`RowMeta`] records. Meta tables are themselves
/// ordinary stores — there is no separate storage primitive for metadata
/// (spec §9: uniform store).
pub struct RowMetaTable {
    key_columns: Vec<String>,
    store: Box<dyn TableStore>,
}

impl RowMetaTable {
    pub fn new(key_columns: Vec<String>, store: Box<dyn TableStore>) -> Self {
        RowMetaTable { key_columns, store }
    }

    /// The meta sidecar's non-key column schema, for callers constructing
    /// a backing store directly.
    pub fn meta_data_columns() -> Vec<String> {
        META_DATA_COLUMNS.iter().map(|s| s.to_string()).collect()
    }

    fn row_to_row_meta(values: &[Value]) -> RowMeta {
        let as_i64 = |v: &Value| match v {
            Value::Int(i) => *i,
            _ => 0,
        };
        RowMeta {
            hash: match &values[0] {
                Value::Int(i) => *i as u64,
                _ => 0,
            },
            create_ts: as_i64(&values[1]),
            update_ts: as_i64(&values[2]),
            process_ts: as_i64(&values[3]),
            delete_ts: match &values[4] {
                Value::Null => None,
                v => Some(as_i64(v)),
            },
        }
    }

    fn meta_row(pk: &Pk, m: &RowMeta) -> Vec<Value> {
        pk.iter()
            .cloned()
            .map(Value::from)
            .chain([
                Value::Int(m.hash as i64),
                Value::Int(m.create_ts),
                Value::Int(m.update_ts),
                Value::Int(m.process_ts),
                m.delete_ts.map(Value::Int).unwrap_or(Value::Null),
            ])
            .collect()
    }

    fn write_rows(&self, rows: Vec<(Pk, RowMeta)>) -> Result<(), EngineError> {
        if rows.is_empty() {
            return Ok(());
        }
        let cols: Vec<String> = self
            .key_columns
            .iter()
            .cloned()
            .chain(META_DATA_COLUMNS.iter().map(|s| s.to_string()))
            .collect();
        let data = rows.iter().map(|(pk, m)| Self::meta_row(pk, m)).collect();
        self.store.update_rows(&DataFrame::from_rows(cols, data))
    }

    /// Current metadata for the given PKs, keyed by PK.
    pub fn get_metadata(&self, idx: &IndexFrame) -> Result<HashMap<Pk, RowMeta>, EngineError> {
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
            out.insert(pk, Self::row_to_row_meta(&values));
        }
        Ok(out)
    }

    /// All PKs currently tracked, live or tombstoned.
    pub fn get_all_idx(&self) -> Result<IndexFrame, EngineError> {
        let df = self.store.read_rows(None)?;
        Ok(df.project_index(&self.key_columns))
    }

    /// The subset of `idx` that is tracked and live (`delete_ts IS NULL`) —
    /// spec §4.2 `get_existing_idx`.
    pub fn get_existing_idx(&self, idx: &IndexFrame) -> Result<IndexFrame, EngineError> {
        let meta = self.get_metadata(idx)?;
        let rows = idx
            .rows
            .iter()
            .filter(|pk| meta.get(*pk).is_some_and(|m| m.delete_ts.is_none()))
            .cloned()
            .collect();
        Ok(IndexFrame::new(self.key_columns.clone(), rows))
    }

    /// `update_ts` for every live row among `idx` (tombstoned rows are
    /// excluded — a deleted input contributes no staleness signal of its
    /// own; deletion is driven by the planner's separate all-inputs-gone
    /// check, spec §4.4).
    pub fn get_update_ts(&self, idx: &IndexFrame) -> Result<HashMap<Pk, i64>, EngineError> {
        let meta = self.get_metadata(idx)?;
        Ok(meta
            .into_iter()
            .filter(|(_, m)| m.delete_ts.is_none())
            .map(|(pk, m)| (pk, m.update_ts))
            .collect())
    }

    /// Like [`Self::get_update_ts`] but includes tombstoned rows — used by
    /// the planner to tell "never seen" apart from "seen, now deleted"
    /// (spec §4.4: deleted inputs must still surface a batch).
    pub fn get_all_update_ts(&self, idx: &IndexFrame) -> Result<HashMap<Pk, i64>, EngineError> {
        let meta = self.get_metadata(idx)?;
        Ok(meta.into_iter().map(|(pk, m)| (pk, m.update_ts)).collect())
    }

    /// Diff `chunk` against stored hashes and persist the row-meta diff
    /// (spec §4.2 `get_changes_for_store_chunk` + `insert/update_meta_for_
    /// store_chunk`, fused into one call since both operate on the same
    /// sidecar store here).
    ///
    /// - unseen PK: `create_ts = update_ts = process_ts = now`.
    /// - PK present, hash changed (or was tombstoned — a resurrection):
    ///   `create_ts` carried forward, `update_ts = process_ts = now`.
    /// - PK present, hash unchanged: only `process_ts` advances.
    pub fn store_chunk(
        &self,
        data_df: &DataFrame,
        data_columns: &[String],
        now: i64,
    ) -> Result<StoreChunkDiff, EngineError> {
        if data_df.is_empty() {
            return Ok(StoreChunkDiff::default());
        }

        let idx = data_df.project_index(&self.key_columns);
        let existing = self.get_metadata(&idx)?;

        let mut new_rows = Vec::new();
        let mut changed_rows = Vec::new();
        let mut unchanged_rows = Vec::new();
        let mut writes: Vec<(Pk, RowMeta)> = Vec::new();

        for i in 0..data_df.len() {
            let Some(pk) = data_df.pk_at(i, &self.key_columns) else {
                continue;
            };
            let values: Vec<Value> = data_columns
                .iter()
                .map(|c| data_df.get(i, c).cloned().unwrap_or(Value::Null))
                .collect();
            let refs: Vec<&Value> = values.iter().collect();
            let new_hash = row_hash(&refs);

            match existing.get(&pk) {
                Some(prev) if prev.delete_ts.is_some() => {
                    // Resurrection: treated as a fresh arrival — new
                    // create_ts, tombstone cleared (spec §3 lifecycles).
                    new_rows.push(pk.clone());
                    writes.push((
                        pk,
                        RowMeta {
                            hash: new_hash,
                            create_ts: now,
                            update_ts: now,
                            process_ts: now,
                            delete_ts: None,
                        },
                    ));
                }
                Some(prev) if prev.hash == new_hash => {
                    unchanged_rows.push(pk.clone());
                    writes.push((
                        pk,
                        RowMeta {
                            hash: new_hash,
                            create_ts: prev.create_ts,
                            update_ts: prev.update_ts,
                            process_ts: now,
                            delete_ts: None,
                        },
                    ));
                }
                Some(prev) => {
                    changed_rows.push(pk.clone());
                    writes.push((
                        pk,
                        RowMeta {
                            hash: new_hash,
                            create_ts: prev.create_ts,
                            update_ts: now,
                            process_ts: now,
                            delete_ts: None,
                        },
                    ));
                }
                None => {
                    new_rows.push(pk.clone());
                    writes.push((
                        pk,
                        RowMeta {
                            hash: new_hash,
                            create_ts: now,
                            update_ts: now,
                            process_ts: now,
                            delete_ts: None,
                        },
                    ));
                }
            }
        }

        self.write_rows(writes)?;

        Ok(StoreChunkDiff {
            new_rows: IndexFrame::new(self.key_columns.clone(), new_rows),
            changed_rows: IndexFrame::new(self.key_columns.clone(), changed_rows),
            unchanged_rows: IndexFrame::new(self.key_columns.clone(), unchanged_rows),
        })
    }

    /// Tombstone the given PKs: set `delete_ts = now`, leave the rest of
    /// the meta row untouched (spec §4.2 `mark_rows_deleted`). Already
    /// tombstoned rows are skipped — conservative choice per the open
    /// question in spec §9.
    pub fn mark_rows_deleted(&self, idx: &IndexFrame, now: i64) -> Result<IndexFrame, EngineError> {
        if idx.is_empty() {
            return Ok(IndexFrame::empty(self.key_columns.clone()));
        }
        let meta = self.get_metadata(idx)?;
        let mut writes = Vec::new();
        let mut newly_deleted = Vec::new();
        for pk in &idx.rows {
            if let Some(prev) = meta.get(pk) {
                if prev.delete_ts.is_some() {
                    continue;
                }
                newly_deleted.push(pk.clone());
                writes.push((
                    pk.clone(),
                    RowMeta {
                        delete_ts: Some(now),
                        ..*prev
                    },
                ));
            }
        }
        self.write_rows(writes)?;
        Ok(IndexFrame::new(self.key_columns.clone(), newly_deleted))
    }

    /// Mark as deleted every tracked, live PK absent from `live_idx` — a
    /// full-scan reconciliation pass over an authoritative external source
    /// (spec §4.2 sync semantics, surfaced at the `DataTable` level).
    pub fn mark_absent_as_deleted(
        &self,
        live_idx: &IndexFrame,
        now: i64,
    ) -> Result<IndexFrame, EngineError> {
        let all = self.get_all_idx()?;
        let gone = self.get_existing_idx(&all)?.difference(live_idx);
        self.mark_rows_deleted(&gone, now)
    }

    /// PKs whose `process_ts < now` — rows not touched by the current sync
    /// pass over an external store (spec §4.2 `get_stale_idx`).
    pub fn get_stale_idx(&self, now: i64) -> Result<IndexFrame, EngineError> {
        let all = self.get_all_idx()?;
        let meta = self.get_metadata(&all)?;
        let rows = all
            .rows
            .into_iter()
            .filter(|pk| meta.get(pk).is_some_and(|m| m.delete_ts.is_none() && m.process_ts < now))
            .collect();
        Ok(IndexFrame::new(self.key_columns.clone(), rows))
    }

    pub fn delete_meta(&self, idx: &IndexFrame) -> Result<(), EngineError> {
        self.store.delete_rows(idx)
    }
}
