//! Named tables and the catalog that holds them (spec §2/§4.1).
//!
//! A [`DataTable`] pairs a physical [`TableStore`] with its row-change
//! metadata store, so every read of "what changed" goes through the same
//! object that owns the data. The [`Catalog`] is just a name→`DataTable`
//! registry, grounded on `datapipe.compute.Catalog`
//! (`examples/original_source/datapipe/compute.py`).

use std::collections::{BTreeMap, HashMap};

use crate::dataframe::{DataFrame, IndexFrame};
use crate::error::EngineError;
use crate::row_meta::{RowMetaTable, StoreChunkDiff};
use crate::store::{MemoryTableStore, TableStore};
use crate::value::{Column, Pk};

/// Outcome of [`DataTable::store_chunk`]: the row-meta diff for the chunk
/// itself, plus any PKs tombstoned because they were in `processed_idx`
/// but absent from the chunk (spec §4.5: "PKs in `processed_idx` but not
/// in the data chunk and currently live in meta are tombstoned").
#[derive(Debug, Clone, Default)]
pub struct StoreChunkResult {
    pub diff: StoreChunkDiff,
    pub tombstoned: IndexFrame,
}

impl StoreChunkResult {
    /// Every PK whose row actually changed in this call — the set a
    /// Change-List entry is built from (spec §4.5).
    pub fn changed_pks(&self, key_columns: &[String]) -> IndexFrame {
        self.diff
            .to_write()
            .union(&self.tombstoned)
            .project(key_columns)
    }
}

/// A named table: its physical store plus its row-change metadata store.
pub struct DataTable {
    name: String,
    primary_schema: Vec<Column>,
    data_columns: Vec<String>,
    store: Box<dyn TableStore>,
    meta: RowMetaTable,
}

impl DataTable {
    /// Build a table backed by `store`, with row-change metadata kept in a
    /// fresh in-memory sidecar store (the default; callers needing a
    /// persisted meta store can use [`DataTable::with_meta_store`]).
    pub fn new(name: impl Into<String>, store: Box<dyn TableStore>) -> Self {
        let name = name.into();
        let primary_schema = store.primary_schema().to_vec();
        let data_columns = store.data_columns().to_vec();
        let meta_store = MemoryTableStore::new(
            format!("meta__{name}"),
            primary_schema.clone(),
            RowMetaTable::meta_data_columns(),
        );
        let key_columns: Vec<String> = primary_schema.iter().map(|c| c.name.clone()).collect();
        DataTable {
            name,
            primary_schema,
            data_columns,
            store,
            meta: RowMetaTable::new(key_columns, Box::new(meta_store)),
        }
    }

    pub fn with_meta_store(
        name: impl Into<String>,
        store: Box<dyn TableStore>,
        meta_store: Box<dyn TableStore>,
    ) -> Self {
        let name = name.into();
        let primary_schema = store.primary_schema().to_vec();
        let data_columns = store.data_columns().to_vec();
        let key_columns: Vec<String> = primary_schema.iter().map(|c| c.name.clone()).collect();
        DataTable {
            name,
            primary_schema,
            data_columns,
            store,
            meta: RowMetaTable::new(key_columns, meta_store),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_schema(&self) -> &[Column] {
        &self.primary_schema
    }

    pub fn key_columns(&self) -> Vec<String> {
        self.primary_schema.iter().map(|c| c.name.clone()).collect()
    }

    pub fn data_columns(&self) -> &[String] {
        &self.data_columns
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    pub fn read_rows(&self, idx: Option<&IndexFrame>) -> Result<DataFrame, EngineError> {
        self.store.read_rows(idx)
    }

    /// Ingest `df` (full rows): diff against row-change metadata, write
    /// only the new/changed rows to the physical store, and — when
    /// `processed_idx` is given — tombstone any PK that was in
    /// `processed_idx` but didn't reappear in `df` (spec §4.5: the
    /// mechanism by which a shrinking transform output propagates
    /// deletions).
    pub fn store_chunk(
        &self,
        df: &DataFrame,
        processed_idx: Option<&IndexFrame>,
        now: i64,
    ) -> Result<StoreChunkResult, EngineError> {
        let diff = self.meta.store_chunk(df, &self.data_columns, now)?;
        let to_write = diff.to_write();
        if !to_write.is_empty() {
            self.store
                .update_rows(&df.filter_by_index(&self.key_columns(), &to_write))?;
        }

        let tombstoned = match processed_idx {
            Some(processed) if !processed.is_empty() => {
                let present = df.project_index(&self.key_columns());
                let missing = processed.difference(&present);
                let newly_deleted = self.meta.mark_rows_deleted(&missing, now)?;
                if !newly_deleted.is_empty() {
                    self.store.delete_rows(&newly_deleted)?;
                }
                newly_deleted
            }
            _ => IndexFrame::empty(self.key_columns()),
        };

        Ok(StoreChunkResult { diff, tombstoned })
    }

    /// Delete rows outright (spec §4.5 delete-batch path: every input was
    /// empty, so the batch means "these outputs should vanish").
    pub fn delete_by_idx(&self, idx: &IndexFrame, now: i64) -> Result<IndexFrame, EngineError> {
        let deleted = self.meta.mark_rows_deleted(idx, now)?;
        if !deleted.is_empty() {
            self.store.delete_rows(&deleted)?;
        }
        Ok(deleted)
    }

    /// Reconcile a full rescan: rows tracked as live but absent from
    /// `live_idx` are tombstoned in row-change metadata (data removal is
    /// the caller's call — see [`Self::delete_by_idx`]). Mirrors a full
    /// sync pass over an authoritative external source.
    pub fn reconcile_full_scan(&self, live_idx: &IndexFrame, now: i64) -> Result<IndexFrame, EngineError> {
        self.meta.mark_absent_as_deleted(live_idx, now)
    }

    pub fn get_existing_idx(&self, idx: &IndexFrame) -> Result<IndexFrame, EngineError> {
        self.meta.get_existing_idx(idx)
    }

    pub fn get_all_idx(&self) -> Result<IndexFrame, EngineError> {
        self.meta.get_all_idx()
    }

    pub fn get_update_ts(&self, idx: &IndexFrame) -> Result<HashMap<Pk, i64>, EngineError> {
        self.meta.get_update_ts(idx)
    }

    pub fn get_all_update_ts(&self, idx: &IndexFrame) -> Result<HashMap<Pk, i64>, EngineError> {
        self.meta.get_all_update_ts(idx)
    }

    pub fn get_stale_idx(&self, now: i64) -> Result<IndexFrame, EngineError> {
        self.meta.get_stale_idx(now)
    }

    pub fn mark_rows_deleted(&self, idx: &IndexFrame, now: i64) -> Result<IndexFrame, EngineError> {
        self.meta.mark_rows_deleted(idx, now)
    }

    pub fn meta(&self) -> &RowMetaTable {
        &self.meta
    }
}

/// Name → [`DataTable`] registry.
#[derive(Default)]
pub struct Catalog {
    tables: BTreeMap<String, DataTable>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn register(&mut self, table: DataTable) {
        self.tables.insert(table.name().to_string(), table);
    }

    pub fn get(&self, name: &str) -> Result<&DataTable, EngineError> {
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::ConfigError(format!("unknown table: {name}")))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}
